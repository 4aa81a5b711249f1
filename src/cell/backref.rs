//! Back-reference index for weak references
//!
//! Maps a target cell to the cells holding weak references to it so
//! that, when the target dies, every referrer's pointer is nulled
//! before its memory is reclaimed. The single-referrer case is by far
//! the most common so it is stored as a direct entry; a list is only
//! allocated for the second referrer.

use std::collections::HashMap;

use crate::cell::head::CellRef;

/// Referrer set for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackRefs {
    One(CellRef),
    Many(Vec<CellRef>),
}

/// Target → weak referrers
#[derive(Debug, Default)]
pub struct BackRefIndex {
    map: HashMap<CellRef, BackRefs>,
}

impl BackRefIndex {
    pub fn new() -> Self {
        BackRefIndex {
            map: HashMap::new(),
        }
    }

    /// Record that `referrer` weakly points at `target`
    pub fn register(&mut self, target: CellRef, referrer: CellRef) {
        match self.map.get_mut(&target) {
            None => {
                self.map.insert(target, BackRefs::One(referrer));
            }
            Some(BackRefs::One(first)) => {
                let first = *first;
                self.map
                    .insert(target, BackRefs::Many(vec![first, referrer]));
            }
            Some(BackRefs::Many(refs)) => {
                refs.push(referrer);
            }
        }
    }

    /// Remove one registration; quietly ignores unknown pairs (the
    /// referrer may already have been severed)
    pub fn unregister(&mut self, target: CellRef, referrer: CellRef) {
        match self.map.get_mut(&target) {
            None => {}
            Some(BackRefs::One(r)) => {
                if *r == referrer {
                    self.map.remove(&target);
                }
            }
            Some(BackRefs::Many(refs)) => {
                refs.retain(|r| *r != referrer);
                match refs.len() {
                    0 => {
                        self.map.remove(&target);
                    }
                    1 => {
                        let last = refs[0];
                        self.map.insert(target, BackRefs::One(last));
                    }
                    _ => {}
                }
            }
        }
    }

    /// Take every referrer of a dying target
    pub fn take(&mut self, target: CellRef) -> Vec<CellRef> {
        match self.map.remove(&target) {
            None => vec![],
            Some(BackRefs::One(r)) => vec![r],
            Some(BackRefs::Many(refs)) => refs,
        }
    }

    pub fn referrer_count(&self, target: CellRef) -> usize {
        match self.map.get(&target) {
            None => 0,
            Some(BackRefs::One(_)) => 1,
            Some(BackRefs::Many(refs)) => refs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
pub mod tests {

    use super::*;
    use crate::cell::head::Cell;
    use crate::memory::pool::Pool;

    fn three_cells() -> (CellRef, CellRef, CellRef) {
        let mut pool: Pool<Cell> = Pool::new();
        (
            pool.alloc(Cell::new()).unwrap(),
            pool.alloc(Cell::new()).unwrap(),
            pool.alloc(Cell::new()).unwrap(),
        )
    }

    #[test]
    pub fn test_single_referrer_stays_direct() {
        let (target, a, _) = three_cells();
        let mut index = BackRefIndex::new();
        index.register(target, a);
        assert_eq!(index.referrer_count(target), 1);
        assert_eq!(index.take(target), vec![a]);
        assert!(index.is_empty());
    }

    #[test]
    pub fn test_second_referrer_promotes_to_list() {
        let (target, a, b) = three_cells();
        let mut index = BackRefIndex::new();
        index.register(target, a);
        index.register(target, b);
        assert_eq!(index.referrer_count(target), 2);
        let taken = index.take(target);
        assert!(taken.contains(&a) && taken.contains(&b));
    }

    #[test]
    pub fn test_unregister_demotes_back_to_direct() {
        let (target, a, b) = three_cells();
        let mut index = BackRefIndex::new();
        index.register(target, a);
        index.register(target, b);
        index.unregister(target, a);
        assert_eq!(index.referrer_count(target), 1);
        assert_eq!(index.take(target), vec![b]);
    }

    #[test]
    pub fn test_unregister_unknown_pair_is_quiet() {
        let (target, a, b) = three_cells();
        let mut index = BackRefIndex::new();
        index.register(target, a);
        index.unregister(target, b);
        index.unregister(b, a);
        assert_eq!(index.referrer_count(target), 1);
    }
}
