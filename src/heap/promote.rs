//! Shape promotion
//!
//! Widening a cell allocates a body for the target shape, copies
//! forward every field old and new both possess, default-initialises
//! the rest and frees the old body slot. Narrowing requests are a
//! caller bug and panic.

use crate::cell::body::{
    BodyRef, ExtendedBody, ListBody, MapBody, MetaSlots, NumericSlots, StringBody,
};
use crate::cell::head::{CellFlags, CellRef, CellSlot};
use crate::cell::shape::{BodyClass, Shape};
use crate::memory::buffer::BufferRef;

use super::error::HeapError;
use super::CellHeap;

/// Fields moved out of the old representation on their way to the new
#[derive(Default)]
struct Carried {
    num: NumericSlots,
    buf: Option<BufferRef>,
    len: usize,
    trim: usize,
    alias: Option<CellRef>,
    meta: MetaSlots,
}

fn meta_is_empty(m: &MetaSlots) -> bool {
    m.class_ident.is_none() && m.magic.is_none() && m.finalizer.is_none()
}

impl CellHeap {
    /// Widen `c` to `target`, preserving previously-stored data
    ///
    /// Promotion only ever adds capability; requesting a shape below
    /// the cell's current one (or sideways across the top tier) is a
    /// fatal logic error.
    pub fn promote(&mut self, c: CellRef, target: Shape) -> Result<(), HeapError> {
        self.check_usable(c, "promotion subject");
        let cell = *self.heads.get(c);
        let from = cell.shape;
        if from == target {
            return Ok(());
        }
        if !from.le(target) {
            panic!(
                "shape lattice violation: cell {:?} cannot narrow {:?} to {:?}",
                c, from, target
            );
        }

        let mut carried = self.extract(cell.slot);

        // an alias with no home in the target is disambiguated now:
        // weak registrations are withdrawn, owned targets released
        if target.body_class() != Some(BodyClass::Extended) {
            if let Some(t) = carried.alias.take() {
                if cell.flags.contains(CellFlags::WEAK) {
                    self.backrefs.unregister(t, c);
                    self.heads.get_mut(c).flags.remove(CellFlags::WEAK);
                } else {
                    self.release(t);
                }
            }
        }

        // static interned buffers live only behind plain string
        // shapes; force a private copy before entering the extended
        // family mid-share
        if let Some(buf) = carried.buf {
            if self.buffers.is_static(buf) && !target.supports_static_buffer() {
                carried.buf = Some(self.buffers.fork(buf, carried.trim, carried.len)?);
                carried.trim = 0;
                self.heads.get_mut(c).flags.remove(CellFlags::SHARED_BUF);
            }
        }

        // aggregate targets have no string slots
        if matches!(target.body_class(), Some(BodyClass::List) | Some(BodyClass::Map)) {
            if let Some(buf) = carried.buf.take() {
                self.buffers.release(buf);
                self.heads.get_mut(c).flags.remove(CellFlags::SHARED_BUF);
            }
        }

        let slot = self.build_slot(target, carried)?;
        {
            let cell = self.heads.get_mut(c);
            cell.shape = target;
            cell.slot = slot;
        }
        #[cfg(debug_assertions)]
        self.verify_body_class(c);
        Ok(())
    }

    /// Move every carried field out of the old representation,
    /// returning the old body slot to its pool
    fn extract(&mut self, slot: CellSlot) -> Carried {
        match slot {
            CellSlot::Empty => Carried::default(),
            CellSlot::Int(v) => Carried {
                num: NumericSlots::from_int(v),
                ..Carried::default()
            },
            CellSlot::Float(v) => Carried {
                num: NumericSlots::from_float(v),
                ..Carried::default()
            },
            CellSlot::Alias(t) => Carried {
                alias: Some(t),
                ..Carried::default()
            },
            CellSlot::Body(BodyRef::String(r)) => {
                let body = self.strings.free(r);
                Carried {
                    num: body.num,
                    buf: body.buf,
                    len: body.len,
                    trim: body.trim,
                    ..Carried::default()
                }
            }
            CellSlot::Body(BodyRef::Extended(r)) => {
                let body = self.extendeds.free(r);
                Carried {
                    num: body.string.num,
                    buf: body.string.buf,
                    len: body.string.len,
                    trim: body.string.trim,
                    alias: body.alias,
                    meta: body.meta,
                }
            }
            CellSlot::Body(BodyRef::List(_)) | CellSlot::Body(BodyRef::Map(_)) => {
                // identity promotions return early and the lattice
                // admits no other move out of an aggregate
                unreachable!("promotion out of aggregate body")
            }
        }
    }

    /// Allocate the target representation around the carried fields
    fn build_slot(&mut self, target: Shape, carried: Carried) -> Result<CellSlot, HeapError> {
        let slot = match target.body_class() {
            None => match target {
                Shape::Int => CellSlot::Int(carried.num.int),
                Shape::Float => CellSlot::Float(carried.num.float),
                _ => unreachable!("inline build for {:?}", target),
            },
            Some(BodyClass::String) => {
                let handle = self.strings.alloc(StringBody {
                    buf: carried.buf,
                    len: carried.len,
                    trim: carried.trim,
                    num: carried.num,
                })?;
                CellSlot::Body(BodyRef::String(handle))
            }
            Some(BodyClass::Extended) => {
                let handle = self.extendeds.alloc(ExtendedBody {
                    string: StringBody {
                        buf: carried.buf,
                        len: carried.len,
                        trim: carried.trim,
                        num: carried.num,
                    },
                    alias: carried.alias,
                    meta: carried.meta,
                })?;
                CellSlot::Body(BodyRef::Extended(handle))
            }
            Some(BodyClass::List) => {
                let meta = (!meta_is_empty(&carried.meta)).then(|| Box::new(carried.meta));
                let handle = self.lists.alloc(ListBody {
                    items: vec![],
                    meta,
                })?;
                CellSlot::Body(BodyRef::List(handle))
            }
            Some(BodyClass::Map) => {
                let meta = (!meta_is_empty(&carried.meta)).then(|| Box::new(carried.meta));
                let handle = self.maps.alloc(MapBody {
                    entries: Default::default(),
                    meta,
                })?;
                CellSlot::Body(BodyRef::Map(handle))
            }
        };
        Ok(slot)
    }
}
