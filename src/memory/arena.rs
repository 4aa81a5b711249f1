//! Fixed-slot arenas over raw blocks
//!
//! An arena is one block divided evenly into `ARENA_SLOTS` slots of a
//! single payload type, with an occupancy bitmap and a per-slot
//! generation counter. Generations let the pool layer detect any use
//! of a slot after it has been reclaimed, rather than silently reading
//! repurposed memory.

use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ptr;

use bitmaps::Bitmap;

use super::block::{Block, BlockError};

/// Slots per arena for every allocation class
pub const ARENA_SLOTS: usize = 256;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    BadRequest,
    OOM,
}

impl From<BlockError> for AllocError {
    fn from(e: BlockError) -> Self {
        match e {
            BlockError::BadSize => AllocError::BadRequest,
            BlockError::OOM => AllocError::OOM,
        }
    }
}

/// One block's worth of slots of `T`
pub struct Arena<T> {
    /// Raw storage, `ARENA_SLOTS * size_of::<T>()` bytes
    block: Block,
    /// Which slots currently hold live payloads
    occupancy: Bitmap<ARENA_SLOTS>,
    /// Per-slot generation, bumped on each reclaim
    generations: Box<[u32]>,
    _marker: PhantomData<T>,
}

impl<T> Arena<T> {
    pub fn new() -> Result<Self, AllocError> {
        debug_assert!(size_of::<T>() > 0);
        let block = Block::new(size_of::<T>() * ARENA_SLOTS, align_of::<T>())?;
        Ok(Arena {
            block,
            occupancy: Bitmap::new(),
            generations: vec![0u32; ARENA_SLOTS].into_boxed_slice(),
            _marker: PhantomData,
        })
    }

    fn slot_ptr(&self, slot: usize) -> *mut T {
        debug_assert!(slot < ARENA_SLOTS);
        unsafe { (self.block.as_mut_ptr() as *mut T).add(slot) }
    }

    pub fn occupied(&self, slot: usize) -> bool {
        self.occupancy.get(slot)
    }

    pub fn generation(&self, slot: usize) -> u32 {
        self.generations[slot]
    }

    /// Number of live slots
    pub fn live_count(&self) -> usize {
        self.occupancy.len()
    }

    /// Install a payload in a vacant slot
    pub fn write(&mut self, slot: usize, value: T) {
        debug_assert!(!self.occupied(slot));
        unsafe {
            ptr::write(self.slot_ptr(slot), value);
        }
        self.occupancy.set(slot, true);
    }

    /// Remove and return the payload, bumping the slot generation so
    /// stale handles are detectable
    pub fn take(&mut self, slot: usize) -> T {
        debug_assert!(self.occupied(slot));
        self.occupancy.set(slot, false);
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        unsafe { ptr::read(self.slot_ptr(slot)) }
    }

    pub fn get(&self, slot: usize) -> &T {
        debug_assert!(self.occupied(slot));
        unsafe { &*self.slot_ptr(slot) }
    }

    pub fn get_mut(&mut self, slot: usize) -> &mut T {
        debug_assert!(self.occupied(slot));
        unsafe { &mut *self.slot_ptr(slot) }
    }
}

impl<T> Drop for Arena<T> {
    fn drop(&mut self) {
        for slot in 0..ARENA_SLOTS {
            if self.occupied(slot) {
                unsafe {
                    ptr::drop_in_place(self.slot_ptr(slot));
                }
            }
        }
    }
}

#[cfg(test)]
pub mod tests {

    use super::*;
    use std::rc::Rc;

    #[test]
    pub fn test_write_take_roundtrip() {
        let mut arena: Arena<u64> = Arena::new().unwrap();
        arena.write(0, 42);
        arena.write(255, 99);
        assert_eq!(arena.live_count(), 2);
        assert_eq!(*arena.get(0), 42);
        assert_eq!(arena.take(255), 99);
        assert_eq!(arena.live_count(), 1);
    }

    #[test]
    pub fn test_generation_bumped_on_take() {
        let mut arena: Arena<u64> = Arena::new().unwrap();
        arena.write(7, 1);
        let g0 = arena.generation(7);
        arena.take(7);
        assert_eq!(arena.generation(7), g0 + 1);
    }

    #[test]
    pub fn test_drop_releases_live_payloads() {
        let witness = Rc::new(());
        {
            let mut arena: Arena<Rc<()>> = Arena::new().unwrap();
            arena.write(3, witness.clone());
            arena.write(9, witness.clone());
            assert_eq!(Rc::strong_count(&witness), 3);
        }
        assert_eq!(Rc::strong_count(&witness), 1);
    }
}
