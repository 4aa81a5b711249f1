//! Blocks of memory acquired from the OS
//!
//! A block is the unit in which the pool layer requests memory from
//! the underlying allocator. Arenas carve blocks into fixed-size
//! slots; the block itself knows nothing about its contents.

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

/// A block of memory allocated by the OS / upstream allocator
#[derive(Debug, PartialEq)]
pub struct Block {
    /// Pointer to memory
    ptr: NonNull<u8>,
    /// Size of block
    size: usize,
    /// Alignment the block was allocated with
    align: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum BlockError {
    BadSize,
    OOM,
}

impl Block {
    /// Allocate a block of `size` bytes aligned to `align` (which
    /// must be a power of two); contents start uninitialised
    pub fn new(size: usize, align: usize) -> Result<Self, BlockError> {
        if size == 0 || !align.is_power_of_two() {
            Err(BlockError::BadSize)
        } else {
            Ok(Block {
                ptr: Self::alloc_block(size, align)?,
                size,
                align,
            })
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn alloc_block(size: usize, align: usize) -> Result<NonNull<u8>, BlockError> {
        let layout = Layout::from_size_align(size, align).map_err(|_| BlockError::BadSize)?;
        unsafe {
            let ptr = alloc(layout);
            if ptr.is_null() {
                Err(BlockError::OOM)
            } else {
                Ok(NonNull::new_unchecked(ptr))
            }
        }
    }

    fn dealloc_block(ptr: NonNull<u8>, size: usize, align: usize) {
        unsafe {
            dealloc(
                ptr.as_ptr(),
                Layout::from_size_align_unchecked(size, align),
            )
        }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        Self::dealloc_block(self.ptr, self.size, self.align);
    }
}

#[cfg(test)]
pub mod tests {

    use super::*;

    #[test]
    fn test_zero_size_rejected() {
        assert_eq!(Block::new(0, 8), Err(BlockError::BadSize));
    }

    #[test]
    fn test_bad_alignment_rejected() {
        assert_eq!(Block::new(1024, 3), Err(BlockError::BadSize));
    }

    #[test]
    fn test_alignment_honoured() {
        let block = Block::new(4096, 64).unwrap();
        let loc = block.as_ptr() as usize;
        assert_eq!(loc % 64, 0);
        drop(block);
    }
}
