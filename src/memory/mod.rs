//! Memory provision: blocks, arenas, slot pools and shared buffers

pub mod arena;
pub mod block;
pub mod buffer;
pub mod pool;
