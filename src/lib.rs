//! Value representation core for a dynamically typed runtime
//!
//! Cells are pooled fixed-size heads that widen through a shape
//! lattice as values accrue representations; bodies, shared string
//! buffers and weak back-references live in side structures owned by
//! a single-threaded [`heap::CellHeap`].

pub mod cell;
pub mod heap;
pub mod memory;
