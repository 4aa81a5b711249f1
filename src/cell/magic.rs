//! Attachable per-cell metadata ("magic") hooks
//!
//! The representation core does not interpret magic entries; it only
//! guarantees the chain is walked at teardown (invoking `on_free`),
//! that weak-aware referrers hear about a cleared target, and that
//! the chain itself is freed with the body.

use std::any::Any;
use std::fmt;

use crate::cell::head::CellRef;
use crate::heap::CellHeap;

/// Discriminates entry semantics for the metadata layer; opaque here
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MagicKind(pub u8);

/// Hook invoked with the heap, the cell the chain hangs off and the
/// entry itself
pub type MagicHook = fn(&mut CellHeap, CellRef, &mut MagicEntry);

/// Static dispatch table for one kind of magic
#[derive(Default)]
pub struct MagicVtbl {
    /// Invoked while the owning cell is being torn down
    pub on_free: Option<MagicHook>,
    /// Invoked when a weak target this cell pointed at has died
    pub on_target_cleared: Option<MagicHook>,
}

/// One link in a cell's metadata chain
pub struct MagicEntry {
    pub kind: MagicKind,
    pub vtbl: &'static MagicVtbl,
    pub payload: Option<Box<dyn Any>>,
    pub next: Option<Box<MagicEntry>>,
}

impl MagicEntry {
    pub fn new(kind: MagicKind, vtbl: &'static MagicVtbl) -> Self {
        MagicEntry {
            kind,
            vtbl,
            payload: None,
            next: None,
        }
    }

    pub fn with_payload(kind: MagicKind, vtbl: &'static MagicVtbl, payload: Box<dyn Any>) -> Self {
        MagicEntry {
            kind,
            vtbl,
            payload: Some(payload),
            next: None,
        }
    }

    /// Number of entries from this link to the end of the chain
    pub fn chain_len(&self) -> usize {
        let mut n = 1;
        let mut cursor = &self.next;
        while let Some(entry) = cursor {
            n += 1;
            cursor = &entry.next;
        }
        n
    }
}

impl fmt::Debug for MagicEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MagicEntry")
            .field("kind", &self.kind)
            .field("payload", &self.payload.is_some())
            .field("chain_len", &self.chain_len())
            .finish()
    }
}

/// Push an entry onto the front of a chain
pub fn push_entry(chain: &mut Option<Box<MagicEntry>>, mut entry: MagicEntry) {
    entry.next = chain.take();
    *chain = Some(Box::new(entry));
}

#[cfg(test)]
pub mod tests {

    use super::*;

    static PLAIN: MagicVtbl = MagicVtbl {
        on_free: None,
        on_target_cleared: None,
    };

    #[test]
    pub fn test_chain_push_and_length() {
        let mut chain = None;
        push_entry(&mut chain, MagicEntry::new(MagicKind(1), &PLAIN));
        push_entry(&mut chain, MagicEntry::new(MagicKind(2), &PLAIN));
        push_entry(&mut chain, MagicEntry::new(MagicKind(3), &PLAIN));

        let head = chain.as_ref().unwrap();
        assert_eq!(head.chain_len(), 3);
        // LIFO: most recent entry at the front
        assert_eq!(head.kind, MagicKind(3));
        assert_eq!(head.next.as_ref().unwrap().kind, MagicKind(2));
    }

    #[test]
    pub fn test_payload_round_trip() {
        let entry = MagicEntry::with_payload(MagicKind(9), &PLAIN, Box::new(1234u32));
        let payload = entry.payload.as_ref().unwrap();
        assert_eq!(*payload.downcast_ref::<u32>().unwrap(), 1234);
    }
}
