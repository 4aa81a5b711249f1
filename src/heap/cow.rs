//! Copy-on-write string operations
//!
//! Assignment between string cells shares one buffer where the policy
//! says sharing beats copying; mutation forks a private copy first.
//! Sharing is transparent: no sequence of reads and writes can tell a
//! shared buffer from a private one, only the allocation statistics
//! move differently.

use crate::cell::body::Validity;
use crate::cell::head::{CellFlags, CellRef};

use super::error::HeapError;
use super::CellHeap;

impl CellHeap {
    /// Store an interned constant string
    ///
    /// The cell sits directly on the static buffer: no copy, no
    /// count. Shapes beyond the plain string family keep private
    /// bytes instead.
    pub fn store_interned(&mut self, c: CellRef, s: &str) -> Result<(), HeapError> {
        self.check_usable(c, "store target");
        self.check_writable(c);
        let target = self.shape(c).with_string();
        if !target.supports_static_buffer() {
            return self.store_string(c, s);
        }
        self.promote(c, target)?;

        if let Some(old) = self.string_body(c).and_then(|b| b.buf) {
            self.buffers.release(old);
        }
        let buf = self.buffers.intern(s.as_bytes());
        let body = self.string_body_mut(c);
        body.buf = Some(buf);
        body.trim = 0;
        body.len = s.len();
        body.num.valid.insert(Validity::STR);
        body.num
            .valid
            .remove(Validity::INT_EXACT | Validity::FLOAT_EXACT);
        self.heads.get_mut(c).flags.insert(CellFlags::SHARED_BUF);
        Ok(())
    }

    /// String assignment `dst = src`
    ///
    /// Statics are referenced outright; counted buffers are shared
    /// when the policy finds sharing worthwhile, otherwise the bytes
    /// are copied. The source cell is untouched either way.
    pub fn assign_string(&mut self, dst: CellRef, src: CellRef) -> Result<(), HeapError> {
        self.check_usable(src, "assignment source");
        self.check_usable(dst, "store target");
        self.check_writable(dst);
        let src_body = match self.string_body(src) {
            Some(b) if b.num.valid.contains(Validity::STR) && b.buf.is_some() => b,
            _ => panic!("string assignment from cell {:?} without a string image", src),
        };
        let buf = src_body.buf.unwrap_or_else(|| unreachable!());
        let (len, trim, num) = (src_body.len, src_body.trim, src_body.num);

        let shared = self.buffers.is_static(buf)
            || self
                .policy
                .share_worthwhile(len, self.buffers.capacity(buf), trim);
        if !shared {
            let bytes = self.buffers.bytes(buf)[trim..trim + len].to_vec();
            self.store_bytes(dst, &bytes)?;
            self.string_body_mut(dst).num = num;
            return Ok(());
        }

        self.promote(dst, self.shape(dst).with_string())?;
        let new_buf = self.buffers.share(buf);
        if let Some(old) = self.string_body(dst).and_then(|b| b.buf) {
            self.buffers.release(old);
        }
        let body = self.string_body_mut(dst);
        body.buf = Some(new_buf);
        body.len = len;
        body.trim = 0;
        body.num = num;
        self.heads.get_mut(dst).flags.insert(CellFlags::SHARED_BUF);
        if !self.buffers.is_static(buf) {
            self.heads.get_mut(src).flags.insert(CellFlags::SHARED_BUF);
        }
        Ok(())
    }

    /// String assignment from an expendable source
    ///
    /// When the source is the sole owner of a counted buffer, the
    /// buffer moves to the destination outright and the source is
    /// left without a string image; no bytes are copied and no count
    /// moves. Anything else falls back to [`assign_string`].
    ///
    /// [`assign_string`]: CellHeap::assign_string
    pub fn steal_string(&mut self, dst: CellRef, src: CellRef) -> Result<(), HeapError> {
        self.check_usable(src, "assignment source");
        self.check_usable(dst, "store target");
        self.check_writable(dst);
        self.check_writable(src);
        if dst == src {
            return Ok(());
        }
        let stealable = match self.string_body(src) {
            Some(b) if b.num.valid.contains(Validity::STR) => match b.buf {
                Some(buf) => !self.buffers.is_static(buf) && self.buffers.sole_owner(buf),
                None => false,
            },
            _ => false,
        };
        if !stealable {
            return self.assign_string(dst, src);
        }

        self.promote(dst, self.shape(dst).with_string())?;
        let src_body = self.string_body_mut(src);
        let buf = src_body.buf.take();
        let (len, trim, num) = (src_body.len, src_body.trim, src_body.num);
        src_body.len = 0;
        src_body.trim = 0;
        src_body.num.valid.remove(Validity::STR);

        if let Some(old) = self.string_body(dst).and_then(|b| b.buf) {
            self.buffers.release(old);
        }
        let body = self.string_body_mut(dst);
        body.buf = buf;
        body.len = len;
        body.trim = trim;
        body.num = num;
        self.heads.get_mut(dst).flags.remove(CellFlags::SHARED_BUF);
        Ok(())
    }

    /// Mutate the cell's string bytes in place
    ///
    /// A shared or static buffer is forked to a private copy first,
    /// so the change is never visible through other owners. Length
    /// and validity are re-synchronised after the closure runs.
    pub fn update_string<F>(&mut self, c: CellRef, f: F) -> Result<(), HeapError>
    where
        F: FnOnce(&mut Vec<u8>),
    {
        self.check_usable(c, "store target");
        self.check_writable(c);
        self.promote(c, self.shape(c).with_string())?;

        let buf = match self.string_body(c).and_then(|b| b.buf) {
            Some(b) => b,
            None => {
                let fresh = self.buffers.alloc_with_capacity(0)?;
                self.string_body_mut(c).buf = Some(fresh);
                fresh
            }
        };
        let (len, trim) = {
            let body = self.string_body(c).unwrap_or_else(|| unreachable!());
            // a stale string image (invalidated by a numeric store)
            // reads as empty
            if body.num.valid.contains(Validity::STR) {
                (body.len, body.trim)
            } else {
                (0, 0)
            }
        };

        let buf = if self.buffers.is_static(buf) || !self.buffers.sole_owner(buf) {
            let private = self.buffers.fork(buf, trim, len)?;
            self.string_body_mut(c).buf = Some(private);
            self.heads.get_mut(c).flags.remove(CellFlags::SHARED_BUF);
            private
        } else {
            // normalise the window so the closure sees exactly the
            // logical string at offset zero
            let v = self.buffers.bytes_mut(buf);
            if trim > 0 {
                v.drain(..trim);
            }
            v.truncate(len);
            buf
        };

        let v = self.buffers.bytes_mut(buf);
        f(v);
        let new_len = v.len();

        let body = self.string_body_mut(c);
        body.trim = 0;
        body.len = new_len;
        body.num.valid.insert(Validity::STR);
        body.num
            .valid
            .remove(Validity::INT_EXACT | Validity::FLOAT_EXACT);
        Ok(())
    }

    /// Discard `n` bytes from the front of the string without moving
    /// the remainder; an offset adjustment, not a copy
    pub fn trim_front(&mut self, c: CellRef, n: usize) {
        self.check_writable(c);
        let body = self.string_body_mut(c);
        if !body.num.valid.contains(Validity::STR) || n > body.len {
            panic!("front trim of {} bytes exceeds string of {:?}", n, c);
        }
        body.trim += n;
        body.len -= n;
        body.num
            .valid
            .remove(Validity::INT_EXACT | Validity::FLOAT_EXACT);
    }

    /// Owners of the cell's buffer; zero for statics (uncounted) and
    /// cells without one
    pub fn buffer_share_count(&self, c: CellRef) -> u32 {
        match self.string_body(c).and_then(|b| b.buf) {
            Some(buf) => self.buffers.share_count(buf),
            None => 0,
        }
    }
}

#[cfg(test)]
pub mod tests {

    use super::*;

    #[test]
    pub fn test_assignment_shares_long_strings() {
        let mut heap = CellHeap::new();
        let src = heap.new_cell().unwrap();
        heap.store_string(src, "a string long enough to be worth sharing")
            .unwrap();
        let dst = heap.new_cell().unwrap();
        heap.assign_string(dst, src).unwrap();

        assert_eq!(heap.buffer_share_count(src), 2);
        assert_eq!(heap.buffer_share_count(dst), 2);
        assert_eq!(heap.as_str(dst), heap.as_str(src));
        assert!(heap.flags(src).contains(CellFlags::SHARED_BUF));
        assert!(heap.flags(dst).contains(CellFlags::SHARED_BUF));
    }

    #[test]
    pub fn test_assignment_copies_short_strings() {
        let mut heap = CellHeap::new();
        let src = heap.new_cell().unwrap();
        heap.store_string(src, "tiny").unwrap();
        let dst = heap.new_cell().unwrap();
        heap.assign_string(dst, src).unwrap();

        assert_eq!(heap.buffer_share_count(src), 1);
        assert_eq!(heap.buffer_share_count(dst), 1);
        assert_eq!(heap.as_str(dst), Some("tiny"));
    }

    #[test]
    pub fn test_mutation_forks_exactly_once() {
        let mut heap = CellHeap::new();
        let src = heap.new_cell().unwrap();
        heap.store_string(src, "shared until the first write")
            .unwrap();
        let dst = heap.new_cell().unwrap();
        heap.assign_string(dst, src).unwrap();
        assert_eq!(heap.buffer_share_count(dst), 2);

        heap.update_string(dst, |v| v.extend_from_slice(b"!"))
            .unwrap();
        // sharing broken, both sides now private
        assert_eq!(heap.buffer_share_count(src), 1);
        assert_eq!(heap.buffer_share_count(dst), 1);
        assert_eq!(heap.as_str(src), Some("shared until the first write"));
        assert_eq!(heap.as_str(dst), Some("shared until the first write!"));

        // a second write stays in the private buffer
        let live = heap.stats().buffers.shared.live;
        heap.update_string(dst, |v| v.truncate(6)).unwrap();
        assert_eq!(heap.stats().buffers.shared.live, live);
        assert_eq!(heap.as_str(dst), Some("shared"));
    }

    #[test]
    pub fn test_release_of_sharer_leaves_buffer_alive() {
        let mut heap = CellHeap::new();
        let src = heap.new_cell().unwrap();
        heap.store_string(src, "outlives one of its owners").unwrap();
        let dst = heap.new_cell().unwrap();
        heap.assign_string(dst, src).unwrap();

        heap.release(src);
        assert_eq!(heap.buffer_share_count(dst), 1);
        assert_eq!(heap.as_str(dst), Some("outlives one of its owners"));
    }

    #[test]
    pub fn test_interned_constants_are_free_to_assign() {
        let mut heap = CellHeap::new();
        let a = heap.new_cell().unwrap();
        let b = heap.new_cell().unwrap();
        heap.store_interned(a, "ubiquitous constant").unwrap();
        heap.store_interned(b, "ubiquitous constant").unwrap();

        assert_eq!(heap.stats().buffers.statics, 1);
        assert_eq!(heap.stats().buffers.shared.live, 0);
        assert_eq!(heap.as_str(a), Some("ubiquitous constant"));
        // statics are uncounted
        assert_eq!(heap.buffer_share_count(a), 0);

        // assignment from a static is a plain reference
        let c = heap.new_cell().unwrap();
        heap.assign_string(c, a).unwrap();
        assert_eq!(heap.stats().buffers.shared.live, 0);
        assert_eq!(heap.as_str(c), Some("ubiquitous constant"));
    }

    #[test]
    pub fn test_mutating_an_interned_cell_goes_private() {
        let mut heap = CellHeap::new();
        let a = heap.new_cell().unwrap();
        let b = heap.new_cell().unwrap();
        heap.store_interned(a, "fixed text").unwrap();
        heap.store_interned(b, "fixed text").unwrap();

        heap.update_string(a, |v| v.extend_from_slice(b" grows")).unwrap();
        assert_eq!(heap.as_str(a), Some("fixed text grows"));
        assert_eq!(heap.as_str(b), Some("fixed text"));
        assert_eq!(heap.stats().buffers.shared.live, 1);
    }

    #[test]
    pub fn test_steal_moves_the_buffer() {
        let mut heap = CellHeap::new();
        let src = heap.new_cell().unwrap();
        heap.store_string(src, "bytes changing hands").unwrap();
        let dst = heap.new_cell().unwrap();

        let live = heap.stats().buffers.shared.live;
        heap.steal_string(dst, src).unwrap();
        // same buffer, new owner, nothing allocated
        assert_eq!(heap.stats().buffers.shared.live, live);
        assert_eq!(heap.as_str(dst), Some("bytes changing hands"));
        assert_eq!(heap.as_string(src), None);
        assert_eq!(heap.buffer_share_count(dst), 1);
    }

    #[test]
    pub fn test_steal_from_shared_source_falls_back() {
        let mut heap = CellHeap::new();
        let src = heap.new_cell().unwrap();
        heap.store_string(src, "already shared with another owner")
            .unwrap();
        let other = heap.new_cell().unwrap();
        heap.assign_string(other, src).unwrap();

        let dst = heap.new_cell().unwrap();
        heap.steal_string(dst, src).unwrap();
        // source keeps its image; destination joined the share
        assert_eq!(heap.as_str(src), Some("already shared with another owner"));
        assert_eq!(heap.as_str(dst), Some("already shared with another owner"));
        assert_eq!(heap.buffer_share_count(src), 3);
    }

    #[test]
    pub fn test_trim_front_is_an_offset_adjustment() {
        let mut heap = CellHeap::new();
        let c = heap.new_cell().unwrap();
        heap.store_string(c, "prefix:payload").unwrap();
        let live = heap.stats().buffers.shared.live;

        heap.trim_front(c, 7);
        assert_eq!(heap.as_str(c), Some("payload"));
        assert_eq!(heap.string_len(c), 7);
        assert_eq!(heap.stats().buffers.shared.live, live);
    }

    #[test]
    pub fn test_trimmed_strings_are_not_shared() {
        let mut heap = CellHeap::new();
        let src = heap.new_cell().unwrap();
        heap.store_string(src, "prefix:the rest is long enough to share")
            .unwrap();
        heap.trim_front(src, 7);

        let dst = heap.new_cell().unwrap();
        heap.assign_string(dst, src).unwrap();
        assert_eq!(heap.buffer_share_count(src), 1);
        assert_eq!(heap.buffer_share_count(dst), 1);
        assert_eq!(heap.as_str(dst), Some("the rest is long enough to share"));
    }

    #[test]
    pub fn test_mutation_after_trim_normalises_window() {
        let mut heap = CellHeap::new();
        let c = heap.new_cell().unwrap();
        heap.store_string(c, "xx:rest").unwrap();
        heap.trim_front(c, 3);
        heap.update_string(c, |v| v.extend_from_slice(b"!")).unwrap();
        assert_eq!(heap.as_str(c), Some("rest!"));
    }

    #[test]
    #[should_panic(expected = "front trim")]
    pub fn test_overlong_trim_panics() {
        let mut heap = CellHeap::new();
        let c = heap.new_cell().unwrap();
        heap.store_string(c, "abc").unwrap();
        heap.trim_front(c, 4);
    }

    #[test]
    pub fn test_update_on_empty_cell_builds_a_string() {
        let mut heap = CellHeap::new();
        let c = heap.new_cell().unwrap();
        heap.update_string(c, |v| v.extend_from_slice(b"built")).unwrap();
        assert_eq!(heap.as_str(c), Some("built"));
    }
}
