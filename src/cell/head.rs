//! The fixed-size cell head
//!
//! Every runtime value is one head record: shape tag, strong count,
//! flags and either an inline scalar or a handle to a separately
//! pooled body. Heads are plain copyable data; all ownership
//! bookkeeping lives in the heap that pools them.

use bitflags::bitflags;

use crate::cell::body::BodyRef;
use crate::memory::pool::PoolRef;

/// Handle to a cell head in the heap's head pool
pub type CellRef = PoolRef<Cell>;

/// Strong count sentinel: a pinned cell that release never frees
pub const IMMORTAL_STRONG: u32 = u32::MAX;

bitflags! {
    /// Per-cell flag bits
    pub struct CellFlags: u16 {
        /// Stores through this cell are a caller bug
        const READ_ONLY = 0x01;
        /// The alias held by this cell is weak, not owning
        const WEAK = 0x02;
        /// The cell's string buffer is currently shared
        const SHARED_BUF = 0x04;
        /// The cell is a class instance (finalizer eligible)
        const OBJECT = 0x08;
        /// The finalizer has already run once
        const FINALIZED = 0x10;
    }
}

/// Lifecycle state; `Dead` is represented by slot reclamation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeState {
    Live,
    Finalizing,
}

/// Inline payload or body handle
///
/// An alias occupies the inline slot (the discriminant replaces the
/// source's pointer-tagged integer storage); whether it is weak or
/// owning is recorded in the cell flags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellSlot {
    Empty,
    Int(i64),
    Float(f64),
    Alias(CellRef),
    Body(BodyRef),
}

use crate::cell::shape::Shape;

/// One value cell
#[derive(Debug, Clone, Copy)]
pub struct Cell {
    pub(crate) shape: Shape,
    pub(crate) life: LifeState,
    pub(crate) strong: u32,
    pub(crate) flags: CellFlags,
    pub(crate) slot: CellSlot,
}

impl Cell {
    /// Fresh empty cell with the creation reference
    pub fn new() -> Self {
        Cell {
            shape: Shape::Empty,
            life: LifeState::Live,
            strong: 1,
            flags: CellFlags::empty(),
            slot: CellSlot::Empty,
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn strong(&self) -> u32 {
        self.strong
    }

    pub fn flags(&self) -> CellFlags {
        self.flags
    }

    pub fn life(&self) -> LifeState {
        self.life
    }

    pub fn is_immortal(&self) -> bool {
        self.strong == IMMORTAL_STRONG
    }
}

impl Default for Cell {
    fn default() -> Self {
        Cell::new()
    }
}
