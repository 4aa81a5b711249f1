//! Cell bodies: the variable-shape payloads
//!
//! Bodies are pooled separately from heads, one pool per allocation
//! class. A body is owned by exactly one cell at a time; only the
//! string buffer *inside* a string-shaped body may be shared.

use bitflags::bitflags;
use indexmap::IndexMap;

use crate::cell::head::CellRef;
use crate::cell::magic::MagicEntry;
use crate::cell::shape::BodyClass;
use crate::heap::CellHeap;
use crate::memory::buffer::BufferRef;
use crate::memory::pool::PoolRef;

bitflags! {
    /// Which cached representations in the numeric slots are current,
    /// and whether they are exact conversions of the live value
    pub struct Validity: u8 {
        const INT = 0x01;
        const INT_EXACT = 0x02;
        const FLOAT = 0x04;
        const FLOAT_EXACT = 0x08;
        const STR = 0x10;
    }
}

/// Integer and float storage with validity/exactness flags
#[derive(Debug, Clone, Copy)]
pub struct NumericSlots {
    pub int: i64,
    pub float: f64,
    pub valid: Validity,
}

impl Default for NumericSlots {
    fn default() -> Self {
        NumericSlots {
            int: 0,
            float: 0.0,
            valid: Validity::empty(),
        }
    }
}

impl NumericSlots {
    pub fn from_int(v: i64) -> Self {
        NumericSlots {
            int: v,
            float: 0.0,
            valid: Validity::INT | Validity::INT_EXACT,
        }
    }

    pub fn from_float(v: f64) -> Self {
        NumericSlots {
            int: 0,
            float: v,
            valid: Validity::FLOAT | Validity::FLOAT_EXACT,
        }
    }
}

/// String storage: buffer handle, logical window and numeric caches
///
/// `trim` is the offset adjustment that cheaply discards bytes from
/// the front without moving the remainder.
#[derive(Debug, Default)]
pub struct StringBody {
    pub buf: Option<BufferRef>,
    pub len: usize,
    pub trim: usize,
    pub num: NumericSlots,
}

/// User-level destructor invoked when a blessed cell's strong count
/// reaches zero
pub type Finalizer = Box<dyn FnMut(&mut CellHeap, CellRef)>;

/// Class identity, metadata chain and finalizer
///
/// Present inline in extended bodies; aggregates box one lazily the
/// first time they are blessed or magic is attached.
#[derive(Default)]
pub struct MetaSlots {
    /// Owning reference to the class cell this instance was blessed into
    pub class_ident: Option<CellRef>,
    pub magic: Option<Box<MagicEntry>>,
    pub finalizer: Option<Finalizer>,
}

/// Extended body: string/numeric slots plus alias and metadata
///
/// Callable and external-handle shapes reuse this payload; in the
/// source family they were smaller "ghost field" allocations, here the
/// distinction is purely the shape tag.
#[derive(Default)]
pub struct ExtendedBody {
    pub string: StringBody,
    /// Target of a reference cell promoted into this family
    pub alias: Option<CellRef>,
    pub meta: MetaSlots,
}

/// Ordered sequence of owned references
#[derive(Default)]
pub struct ListBody {
    pub items: Vec<CellRef>,
    pub meta: Option<Box<MetaSlots>>,
}

/// Keyed mapping of owned references; iteration order is insertion
/// order, key semantics belong to the aggregate layer above
#[derive(Default)]
pub struct MapBody {
    pub entries: IndexMap<Box<str>, CellRef>,
    pub meta: Option<Box<MetaSlots>>,
}

/// Typed handle to a pooled body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyRef {
    String(PoolRef<StringBody>),
    Extended(PoolRef<ExtendedBody>),
    List(PoolRef<ListBody>),
    Map(PoolRef<MapBody>),
}

impl BodyRef {
    /// Allocation class this handle belongs to; must always agree
    /// with the owning cell's shape tag
    pub fn class(&self) -> BodyClass {
        match self {
            BodyRef::String(_) => BodyClass::String,
            BodyRef::Extended(_) => BodyClass::Extended,
            BodyRef::List(_) => BodyClass::List,
            BodyRef::Map(_) => BodyClass::Map,
        }
    }
}

#[cfg(test)]
pub mod tests {

    use super::*;

    #[test]
    pub fn test_numeric_slot_constructors() {
        let n = NumericSlots::from_int(42);
        assert!(n.valid.contains(Validity::INT | Validity::INT_EXACT));
        assert!(!n.valid.contains(Validity::FLOAT));

        let f = NumericSlots::from_float(1.5);
        assert!(f.valid.contains(Validity::FLOAT | Validity::FLOAT_EXACT));
        assert_eq!(f.float, 1.5);
    }

    #[test]
    pub fn test_default_string_body_has_no_buffer() {
        let s = StringBody::default();
        assert!(s.buf.is_none());
        assert_eq!(s.len, 0);
        assert_eq!(s.trim, 0);
        assert_eq!(s.num.valid, Validity::empty());
    }
}
