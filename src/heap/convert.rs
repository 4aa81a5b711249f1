//! Scalar stores and reads
//!
//! Stores widen the cell to the join of its shape and the incoming
//! value kind, then write the payload and validity bits. Reads report
//! the cached representation and whether it is exact; they never
//! parse or convert, that is the coercion layer's business.

use crate::cell::body::{BodyRef, StringBody, Validity};
use crate::cell::head::{CellFlags, CellRef, CellSlot};
use crate::cell::shape::Shape;

use super::error::HeapError;
use super::CellHeap;

impl CellHeap {
    /// Store an integer, widening the shape as needed
    pub fn store_integer(&mut self, c: CellRef, v: i64) -> Result<(), HeapError> {
        self.check_usable(c, "store target");
        self.check_writable(c);
        let target = self.shape(c).with_integer();
        self.check_scalar_store(c, target);
        self.promote(c, target)?;
        if target == Shape::Int {
            self.heads.get_mut(c).slot = CellSlot::Int(v);
        } else {
            let num = &mut self.string_body_mut(c).num;
            num.int = v;
            num.valid.insert(Validity::INT | Validity::INT_EXACT);
            // other caches are stale now
            num.valid
                .remove(Validity::FLOAT | Validity::FLOAT_EXACT | Validity::STR);
        }
        Ok(())
    }

    /// Store a float, widening the shape as needed
    pub fn store_float(&mut self, c: CellRef, v: f64) -> Result<(), HeapError> {
        self.check_usable(c, "store target");
        self.check_writable(c);
        let target = self.shape(c).with_float();
        self.check_scalar_store(c, target);
        self.promote(c, target)?;
        if target == Shape::Float {
            self.heads.get_mut(c).slot = CellSlot::Float(v);
        } else {
            let num = &mut self.string_body_mut(c).num;
            num.float = v;
            num.valid.insert(Validity::FLOAT | Validity::FLOAT_EXACT);
            num.valid
                .remove(Validity::INT | Validity::INT_EXACT | Validity::STR);
        }
        Ok(())
    }

    /// Store string bytes, widening the shape as needed
    ///
    /// The cell's buffer is reused in place when it is private;
    /// otherwise this owner's claim is dropped and a fresh private
    /// buffer allocated. Numeric caches survive a string store but
    /// are demoted to inexact.
    pub fn store_bytes(&mut self, c: CellRef, bytes: &[u8]) -> Result<(), HeapError> {
        self.check_usable(c, "store target");
        self.check_writable(c);
        let target = self.shape(c).with_string();
        self.check_scalar_store(c, target);
        self.promote(c, target)?;

        let buf = match self.string_body(c).and_then(|b| b.buf) {
            Some(b) if !self.buffers.is_static(b) && self.buffers.sole_owner(b) => {
                let v = self.buffers.bytes_mut(b);
                v.clear();
                v.extend_from_slice(bytes);
                b
            }
            Some(b) => {
                self.buffers.release(b);
                self.buffers.alloc_from(bytes)?
            }
            None => self.buffers.alloc_from(bytes)?,
        };

        let body = self.string_body_mut(c);
        body.buf = Some(buf);
        body.trim = 0;
        body.len = bytes.len();
        body.num.valid.insert(Validity::STR);
        body.num
            .valid
            .remove(Validity::INT_EXACT | Validity::FLOAT_EXACT);
        self.heads.get_mut(c).flags.remove(CellFlags::SHARED_BUF);
        Ok(())
    }

    pub fn store_string(&mut self, c: CellRef, s: &str) -> Result<(), HeapError> {
        self.store_bytes(c, s.as_bytes())
    }

    /// Cached integer and whether it is an exact image of the live
    /// value; `(0, false)` when no integer cache exists
    pub fn as_integer(&self, c: CellRef) -> (i64, bool) {
        match self.heads.get(c).slot {
            CellSlot::Int(v) => (v, true),
            _ => match self.string_body(c) {
                Some(body) if body.num.valid.contains(Validity::INT) => {
                    (body.num.int, body.num.valid.contains(Validity::INT_EXACT))
                }
                _ => (0, false),
            },
        }
    }

    /// Cached float and its exactness; `(0.0, false)` when absent
    pub fn as_float(&self, c: CellRef) -> (f64, bool) {
        match self.heads.get(c).slot {
            CellSlot::Float(v) => (v, true),
            _ => match self.string_body(c) {
                Some(body) if body.num.valid.contains(Validity::FLOAT) => (
                    body.num.float,
                    body.num.valid.contains(Validity::FLOAT_EXACT),
                ),
                _ => (0.0, false),
            },
        }
    }

    /// Current string bytes; `None` when the cell holds no current
    /// string image
    pub fn as_string(&self, c: CellRef) -> Option<&[u8]> {
        let body = self.string_body(c)?;
        if !body.num.valid.contains(Validity::STR) {
            return None;
        }
        let buf = body.buf?;
        Some(&self.buffers.bytes(buf)[body.trim..body.trim + body.len])
    }

    /// String bytes as UTF-8, when they are
    pub fn as_str(&self, c: CellRef) -> Option<&str> {
        self.as_string(c).and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn string_len(&self, c: CellRef) -> usize {
        self.string_body(c).map_or(0, |b| b.len)
    }

    // ---- plumbing ------------------------------------------------

    pub(crate) fn string_body(&self, c: CellRef) -> Option<&StringBody> {
        match self.heads.get(c).slot {
            CellSlot::Body(BodyRef::String(r)) => Some(self.strings.get(r)),
            CellSlot::Body(BodyRef::Extended(r)) => Some(&self.extendeds.get(r).string),
            _ => None,
        }
    }

    pub(crate) fn string_body_mut(&mut self, c: CellRef) -> &mut StringBody {
        match self.heads.get(c).slot {
            CellSlot::Body(BodyRef::String(r)) => self.strings.get_mut(r),
            CellSlot::Body(BodyRef::Extended(r)) => &mut self.extendeds.get_mut(r).string,
            slot => panic!("cell {:?} has no string slots in {:?}", c, slot),
        }
    }

    pub(crate) fn check_writable(&self, c: CellRef) {
        if self.heads.get(c).flags.contains(CellFlags::READ_ONLY) {
            panic!("store through read-only cell {:?}", c);
        }
    }

    fn check_scalar_store(&self, c: CellRef, target: Shape) {
        if target.is_aggregate() {
            panic!("scalar store into {:?}-shaped cell {:?}", target, c);
        }
    }
}
