//! Slot pools for one allocation class
//!
//! A pool owns a chain of arenas for a single payload type and hands
//! out slots in O(1) from a free list of slot indices. When the free
//! list runs dry the pool grows by exactly one arena and threads all
//! of its slots onto the free list in a single pass. Handles carry
//! the slot generation so any access after reclaim is caught.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use super::arena::{AllocError, Arena, ARENA_SLOTS};

/// Generation-checked handle to a pool slot
pub struct PoolRef<T> {
    index: u32,
    generation: u32,
    marker: PhantomData<fn() -> T>,
}

impl<T> PoolRef<T> {
    fn new(index: u32, generation: u32) -> Self {
        PoolRef {
            index,
            generation,
            marker: PhantomData,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<T> Clone for PoolRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PoolRef<T> {}

impl<T> PartialEq for PoolRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for PoolRef<T> {}

impl<T> Hash for PoolRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for PoolRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolRef({}.{})", self.index, self.generation)
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Arenas in the chain
    pub arenas: usize,
    /// Slots currently live
    pub live: usize,
    /// Slots on the free list
    pub free: usize,
}

/// A chain of arenas with a shared free list
pub struct Pool<T> {
    arenas: Vec<Arena<T>>,
    free: Vec<u32>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Pool::new()
    }
}

impl<T> Pool<T> {
    /// New empty pool; no memory is requested until the first alloc
    pub fn new() -> Self {
        Pool {
            arenas: vec![],
            free: vec![],
        }
    }

    /// Take a slot from the free list, growing by one arena if empty
    pub fn alloc(&mut self, value: T) -> Result<PoolRef<T>, AllocError> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.grow()?;
                self.free.pop().expect("fresh arena yielded no slots")
            }
        };
        let (arena, slot) = Self::locate(index);
        let arena = &mut self.arenas[arena];
        arena.write(slot, value);
        Ok(PoolRef::new(index, arena.generation(slot)))
    }

    /// Return the payload and push the slot back on the free list
    ///
    /// The slot generation is bumped so the handle (and any copy of
    /// it) is dead from this point on.
    pub fn free(&mut self, handle: PoolRef<T>) -> T {
        self.check_live(handle, "free");
        let (arena, slot) = Self::locate(handle.index);
        let value = self.arenas[arena].take(slot);
        self.free.push(handle.index);
        value
    }

    pub fn get(&self, handle: PoolRef<T>) -> &T {
        self.check_live(handle, "read");
        let (arena, slot) = Self::locate(handle.index);
        self.arenas[arena].get(slot)
    }

    pub fn get_mut(&mut self, handle: PoolRef<T>) -> &mut T {
        self.check_live(handle, "write");
        let (arena, slot) = Self::locate(handle.index);
        self.arenas[arena].get_mut(slot)
    }

    /// Whether the handle still refers to a live slot
    pub fn is_live(&self, handle: PoolRef<T>) -> bool {
        let (arena, slot) = Self::locate(handle.index);
        match self.arenas.get(arena) {
            Some(a) => a.occupied(slot) && a.generation(slot) == handle.generation,
            None => false,
        }
    }

    /// Handles for every live slot, in arena-chain order
    ///
    /// Walked only for whole-heap teardown (straggler collection) and
    /// for statistics, never on the allocation fast path.
    pub fn live_handles(&self) -> Vec<PoolRef<T>> {
        let mut handles = vec![];
        for (i, arena) in self.arenas.iter().enumerate() {
            for slot in 0..ARENA_SLOTS {
                if arena.occupied(slot) {
                    handles.push(PoolRef::new(
                        (i * ARENA_SLOTS + slot) as u32,
                        arena.generation(slot),
                    ));
                }
            }
        }
        handles
    }

    pub fn live_count(&self) -> usize {
        self.arenas.iter().map(|a| a.live_count()).sum()
    }

    pub fn arena_count(&self) -> usize {
        self.arenas.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            arenas: self.arenas.len(),
            live: self.live_count(),
            free: self.free.len(),
        }
    }

    fn locate(index: u32) -> (usize, usize) {
        (
            index as usize / ARENA_SLOTS,
            index as usize % ARENA_SLOTS,
        )
    }

    fn check_live(&self, handle: PoolRef<T>, action: &str) {
        if !self.is_live(handle) {
            panic!("{} through dead slot handle {:?}", action, handle);
        }
    }

    /// Add one arena and thread all its slots onto the free list
    ///
    /// Pushed in reverse so the lowest new index is handed out first.
    fn grow(&mut self) -> Result<(), AllocError> {
        let base = (self.arenas.len() * ARENA_SLOTS) as u32;
        self.arenas.push(Arena::new()?);
        self.free.reserve(ARENA_SLOTS);
        for slot in (0..ARENA_SLOTS as u32).rev() {
            self.free.push(base + slot);
        }
        Ok(())
    }
}
