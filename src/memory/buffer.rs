//! Shared, refcounted string buffers
//!
//! String-shaped cell bodies do not own their bytes directly; they
//! hold a `BufferRef` into this table. A shared buffer carries its
//! own share count and is freed when the count reaches zero. A static
//! buffer is an interned constant: never counted, never freed, and
//! never handed out for mutation.

use std::collections::HashMap;

use super::arena::AllocError;
use super::pool::{Pool, PoolRef, PoolStats};

/// A refcounted byte buffer
pub struct SharedBuf {
    bytes: Vec<u8>,
    shares: u32,
}

/// Handle to a buffer in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRef {
    /// Counted, copy-on-write shared buffer
    Shared(PoolRef<SharedBuf>),
    /// Interned immutable constant
    Static(u32),
}

/// Tunable thresholds for the share-vs-copy decision on assignment
///
/// The exact values are policy, not semantics: only the qualitative
/// properties (sharing is transparent, forks break sharing exactly
/// once) are contractual.
#[derive(Debug, Clone, Copy)]
pub struct CowPolicy {
    /// Strings shorter than this are cheaper to memcpy than to track
    pub min_share_len: usize,
    /// Don't pin down a buffer whose capacity exceeds this multiple
    /// of the bytes actually used
    pub max_waste_factor: usize,
}

impl Default for CowPolicy {
    fn default() -> Self {
        CowPolicy {
            min_share_len: 16,
            max_waste_factor: 2,
        }
    }
}

impl CowPolicy {
    /// Is a buffer with this occupancy worth sharing rather than
    /// copying? Front-trimmed buffers never qualify: the trim offset
    /// is per-owner and would be lost on the other side.
    pub fn share_worthwhile(&self, len: usize, capacity: usize, trim: usize) -> bool {
        trim == 0
            && len >= self.min_share_len
            && capacity <= len.saturating_mul(self.max_waste_factor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    pub shared: PoolStats,
    pub statics: usize,
}

/// The buffer table: counted shared buffers plus an intern side table
pub struct BufferTable {
    shared: Pool<SharedBuf>,
    statics: Vec<Box<[u8]>>,
    interned: HashMap<Box<[u8]>, u32>,
}

impl Default for BufferTable {
    fn default() -> Self {
        BufferTable::new()
    }
}

impl BufferTable {
    pub fn new() -> Self {
        BufferTable {
            shared: Pool::new(),
            statics: vec![],
            interned: HashMap::new(),
        }
    }

    /// Fresh private buffer holding a copy of `bytes`, share count 1
    pub fn alloc_from(&mut self, bytes: &[u8]) -> Result<BufferRef, AllocError> {
        let handle = self.shared.alloc(SharedBuf {
            bytes: bytes.to_vec(),
            shares: 1,
        })?;
        Ok(BufferRef::Shared(handle))
    }

    /// Fresh empty private buffer with reserved capacity
    pub fn alloc_with_capacity(&mut self, capacity: usize) -> Result<BufferRef, AllocError> {
        let handle = self.shared.alloc(SharedBuf {
            bytes: Vec::with_capacity(capacity),
            shares: 1,
        })?;
        Ok(BufferRef::Shared(handle))
    }

    /// Intern a constant string, deduplicated against prior interns
    pub fn intern(&mut self, bytes: &[u8]) -> BufferRef {
        if let Some(&id) = self.interned.get(bytes) {
            return BufferRef::Static(id);
        }
        let id = self.statics.len() as u32;
        let owned: Box<[u8]> = bytes.into();
        self.statics.push(owned.clone());
        self.interned.insert(owned, id);
        BufferRef::Static(id)
    }

    /// Add an owner: bump the share count, copy no bytes
    pub fn share(&mut self, buf: BufferRef) -> BufferRef {
        if let BufferRef::Shared(handle) = buf {
            let b = self.shared.get_mut(handle);
            b.shares += 1;
        }
        buf
    }

    /// Drop an owner: decrement and free at zero. Statics are not
    /// counted and never freed.
    pub fn release(&mut self, buf: BufferRef) {
        if let BufferRef::Shared(handle) = buf {
            let b = self.shared.get_mut(handle);
            debug_assert!(b.shares > 0);
            b.shares -= 1;
            if b.shares == 0 {
                self.shared.free(handle);
            }
        }
    }

    pub fn bytes(&self, buf: BufferRef) -> &[u8] {
        match buf {
            BufferRef::Shared(handle) => &self.shared.get(handle).bytes,
            BufferRef::Static(id) => &self.statics[id as usize],
        }
    }

    pub fn capacity(&self, buf: BufferRef) -> usize {
        match buf {
            BufferRef::Shared(handle) => self.shared.get(handle).bytes.capacity(),
            BufferRef::Static(id) => self.statics[id as usize].len(),
        }
    }

    /// Current share count; statics report zero (uncounted)
    pub fn share_count(&self, buf: BufferRef) -> u32 {
        match buf {
            BufferRef::Shared(handle) => self.shared.get(handle).shares,
            BufferRef::Static(_) => 0,
        }
    }

    pub fn is_static(&self, buf: BufferRef) -> bool {
        matches!(buf, BufferRef::Static(_))
    }

    /// True when exactly one owner holds the buffer and mutation in
    /// place is permitted
    pub fn sole_owner(&self, buf: BufferRef) -> bool {
        match buf {
            BufferRef::Shared(handle) => self.shared.get(handle).shares <= 1,
            BufferRef::Static(_) => false,
        }
    }

    /// Direct mutable access; caller must have established sole
    /// ownership (fork first otherwise)
    pub fn bytes_mut(&mut self, buf: BufferRef) -> &mut Vec<u8> {
        match buf {
            BufferRef::Shared(handle) => {
                let b = self.shared.get_mut(handle);
                if b.shares > 1 {
                    panic!("mutable access to buffer with {} sharers", b.shares);
                }
                &mut b.bytes
            }
            BufferRef::Static(_) => panic!("mutable access to static buffer"),
        }
    }

    /// Fork on write: private copy of the logical window, dropping
    /// this owner's claim on the old buffer
    pub fn fork(
        &mut self,
        buf: BufferRef,
        trim: usize,
        len: usize,
    ) -> Result<BufferRef, AllocError> {
        let copy: Vec<u8> = self.bytes(buf)[trim..trim + len].to_vec();
        let fresh = self.shared.alloc(SharedBuf {
            bytes: copy,
            shares: 1,
        })?;
        self.release(buf);
        Ok(BufferRef::Shared(fresh))
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            shared: self.shared.stats(),
            statics: self.statics.len(),
        }
    }
}

#[cfg(test)]
pub mod tests {

    use super::*;

    #[test]
    pub fn test_share_and_release() {
        let mut table = BufferTable::new();
        let buf = table.alloc_from(b"hello world").unwrap();
        assert_eq!(table.share_count(buf), 1);
        table.share(buf);
        assert_eq!(table.share_count(buf), 2);
        table.release(buf);
        assert_eq!(table.share_count(buf), 1);
        table.release(buf);
        assert_eq!(table.stats().shared.live, 0);
    }

    #[test]
    pub fn test_fork_preserves_other_owner() {
        let mut table = BufferTable::new();
        let buf = table.alloc_from(b"shared bytes").unwrap();
        table.share(buf);

        let private = table.fork(buf, 0, 12).unwrap();
        assert_ne!(private, buf);
        assert_eq!(table.share_count(buf), 1);
        assert_eq!(table.share_count(private), 1);

        table.bytes_mut(private).extend_from_slice(b"!");
        assert_eq!(table.bytes(buf), b"shared bytes");
        assert_eq!(table.bytes(private), b"shared bytes!");
    }

    #[test]
    pub fn test_fork_respects_trim_window() {
        let mut table = BufferTable::new();
        let buf = table.alloc_from(b"xxabcxx").unwrap();
        table.share(buf);
        let private = table.fork(buf, 2, 3).unwrap();
        assert_eq!(table.bytes(private), b"abc");
    }

    #[test]
    pub fn test_intern_deduplicates() {
        let mut table = BufferTable::new();
        let a = table.intern(b"constant");
        let b = table.intern(b"constant");
        let c = table.intern(b"other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(table.is_static(a));
        assert_eq!(table.stats().statics, 2);
    }

    #[test]
    pub fn test_static_release_is_noop() {
        let mut table = BufferTable::new();
        let a = table.intern(b"forever");
        table.release(a);
        assert_eq!(table.bytes(a), b"forever");
    }

    #[test]
    #[should_panic(expected = "mutable access to static buffer")]
    pub fn test_static_never_mutable() {
        let mut table = BufferTable::new();
        let a = table.intern(b"forever");
        table.bytes_mut(a);
    }

    #[test]
    #[should_panic(expected = "sharers")]
    pub fn test_shared_never_mutable_in_place() {
        let mut table = BufferTable::new();
        let buf = table.alloc_from(b"twice owned here").unwrap();
        table.share(buf);
        table.bytes_mut(buf);
    }

    #[test]
    pub fn test_policy_thresholds() {
        let policy = CowPolicy::default();
        assert!(policy.share_worthwhile(32, 40, 0));
        // too short
        assert!(!policy.share_worthwhile(4, 4, 0));
        // too much slack capacity
        assert!(!policy.share_worthwhile(32, 200, 0));
        // front-trimmed
        assert!(!policy.share_worthwhile(32, 40, 2));
    }
}
