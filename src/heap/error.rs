//! Heap-level errors
//!
//! Only genuine resource failures surface as errors; invariant
//! violations (lattice narrowing, double free, dead-slot access) are
//! caller bugs and panic at the point of detection.

use thiserror::Error;

use crate::memory::arena::AllocError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("pool allocation failed: arena request refused by memory provider")]
    ResourceExhausted,
    #[error("invalid allocation request")]
    BadRequest,
}

impl From<AllocError> for HeapError {
    fn from(e: AllocError) -> Self {
        match e {
            AllocError::OOM => HeapError::ResourceExhausted,
            AllocError::BadRequest => HeapError::BadRequest,
        }
    }
}
