//! The cell heap
//!
//! `CellHeap` is the facade over every pool and side table: cell
//! heads, per-class body pools, the shared string buffer table and
//! the weak back-reference index. All lifecycle, promotion, COW and
//! conversion operations hang off it. One heap belongs to one logical
//! thread of execution; nothing here is synchronised.

pub mod convert;
pub mod cow;
pub mod error;
pub mod lifecycle;
pub mod promote;

use std::process::abort;

use crate::cell::backref::BackRefIndex;
use crate::cell::body::{
    BodyRef, ExtendedBody, Finalizer, ListBody, MapBody, MetaSlots, StringBody,
};
use crate::cell::head::{Cell, CellFlags, CellRef, CellSlot, IMMORTAL_STRONG};
use crate::cell::magic::{push_entry, MagicEntry};
use crate::cell::shape::Shape;
use crate::memory::buffer::{BufferStats, BufferTable, CowPolicy};
use crate::memory::pool::{Pool, PoolStats};

use self::error::HeapError;

/// Heap statistics across every allocation class
#[derive(Debug, Clone, Copy)]
pub struct HeapStats {
    pub heads: PoolStats,
    pub strings: PoolStats,
    pub extendeds: PoolStats,
    pub lists: PoolStats,
    pub maps: PoolStats,
    pub buffers: BufferStats,
}

/// One interpreter instance's value heap
pub struct CellHeap {
    pub(crate) heads: Pool<Cell>,
    pub(crate) strings: Pool<StringBody>,
    pub(crate) extendeds: Pool<ExtendedBody>,
    pub(crate) lists: Pool<ListBody>,
    pub(crate) maps: Pool<MapBody>,
    pub(crate) buffers: BufferTable,
    pub(crate) backrefs: BackRefIndex,
    pub(crate) policy: CowPolicy,
    /// Canonical undefined
    undef: CellRef,
    /// Canonical true
    yes: CellRef,
    /// Canonical false
    no: CellRef,
    /// Inside a whole-heap teardown pass; zero-count releases and
    /// releases of already-collected cells are silent
    pub(crate) in_bulk: bool,
    pub(crate) torn_down: bool,
}

impl Default for CellHeap {
    fn default() -> Self {
        CellHeap::new()
    }
}

impl CellHeap {
    /// New heap with its immortal singletons in place
    ///
    /// Failure to allocate the bootstrap arena is fatal: a runtime
    /// that cannot represent `undef` cannot run anything.
    pub fn new() -> Self {
        Self::with_policy(CowPolicy::default())
    }

    pub fn with_policy(policy: CowPolicy) -> Self {
        let mut heads = Pool::new();
        let undef = Self::bootstrap(&mut heads, Shape::Empty, CellSlot::Empty);
        let yes = Self::bootstrap(&mut heads, Shape::Int, CellSlot::Int(1));
        let no = Self::bootstrap(&mut heads, Shape::Int, CellSlot::Int(0));
        CellHeap {
            heads,
            strings: Pool::new(),
            extendeds: Pool::new(),
            lists: Pool::new(),
            maps: Pool::new(),
            buffers: BufferTable::new(),
            backrefs: BackRefIndex::new(),
            policy,
            undef,
            yes,
            no,
            in_bulk: false,
            torn_down: false,
        }
    }

    fn bootstrap(heads: &mut Pool<Cell>, shape: Shape, slot: CellSlot) -> CellRef {
        let mut cell = Cell::new();
        cell.shape = shape;
        cell.slot = slot;
        cell.strong = IMMORTAL_STRONG;
        cell.flags = CellFlags::READ_ONLY;
        heads.alloc(cell).unwrap_or_else(|_| abort())
    }

    /// Fresh empty cell carrying the creation reference
    pub fn new_cell(&mut self) -> Result<CellRef, HeapError> {
        Ok(self.heads.alloc(Cell::new())?)
    }

    /// The canonical undefined cell
    pub fn undef(&self) -> CellRef {
        self.undef
    }

    /// Canonical true
    pub fn t(&self) -> CellRef {
        self.yes
    }

    /// Canonical false
    pub fn f(&self) -> CellRef {
        self.no
    }

    pub fn shape(&self, c: CellRef) -> Shape {
        self.heads.get(c).shape
    }

    pub fn strong_count(&self, c: CellRef) -> u32 {
        self.heads.get(c).strong
    }

    pub fn flags(&self, c: CellRef) -> CellFlags {
        self.heads.get(c).flags
    }

    pub fn is_live(&self, c: CellRef) -> bool {
        self.heads.is_live(c)
    }

    /// Pin a cell so release never frees it
    pub fn make_immortal(&mut self, c: CellRef) {
        self.heads.get_mut(c).strong = IMMORTAL_STRONG;
    }

    pub fn set_read_only(&mut self, c: CellRef) {
        self.heads.get_mut(c).flags.insert(CellFlags::READ_ONLY);
    }

    // ---- references ----------------------------------------------

    /// New cell owning a strong reference to `target`
    pub fn new_ref(&mut self, target: CellRef) -> Result<CellRef, HeapError> {
        self.check_usable(target, "reference target");
        let c = self.new_cell()?;
        self.acquire(target);
        self.heads.get_mut(c).slot = CellSlot::Alias(target);
        Ok(c)
    }

    /// New cell weakly referring to `target`; nulled automatically
    /// when the target dies
    pub fn new_weak_ref(&mut self, target: CellRef) -> Result<CellRef, HeapError> {
        self.check_usable(target, "weak reference target");
        let c = self.new_cell()?;
        {
            let cell = self.heads.get_mut(c);
            cell.slot = CellSlot::Alias(target);
            cell.flags.insert(CellFlags::WEAK);
        }
        self.backrefs.register(target, c);
        Ok(c)
    }

    /// Follow an alias, strong or weak; `None` when there is no alias
    /// or the weak target has been cleared
    pub fn deref_alias(&self, c: CellRef) -> Option<CellRef> {
        match self.heads.get(c).slot {
            CellSlot::Alias(t) => Some(t),
            CellSlot::Body(BodyRef::Extended(r)) => self.extendeds.get(r).alias,
            _ => None,
        }
    }

    /// Target of a weak reference cell; `None` once the target died
    pub fn weak_target(&self, c: CellRef) -> Option<CellRef> {
        if self.heads.get(c).flags.contains(CellFlags::WEAK) {
            self.deref_alias(c)
        } else {
            None
        }
    }

    // ---- objects and metadata ------------------------------------

    /// Metadata slots for a cell, promoting into the extended family
    /// (or boxing aggregate metadata) on first use
    pub(crate) fn meta_slots_mut(&mut self, c: CellRef) -> Result<&mut MetaSlots, HeapError> {
        self.promote(c, self.shape(c).max_with_extended())?;
        match self.heads.get(c).slot {
            CellSlot::Body(BodyRef::Extended(r)) => Ok(&mut self.extendeds.get_mut(r).meta),
            CellSlot::Body(BodyRef::List(r)) => {
                Ok(self.lists.get_mut(r).meta.get_or_insert_with(Default::default))
            }
            CellSlot::Body(BodyRef::Map(r)) => {
                Ok(self.maps.get_mut(r).meta.get_or_insert_with(Default::default))
            }
            slot => unreachable!("metadata requested on inline slot {:?}", slot),
        }
    }

    pub(crate) fn meta_slots(&self, c: CellRef) -> Option<&MetaSlots> {
        match self.heads.get(c).slot {
            CellSlot::Body(BodyRef::Extended(r)) => Some(&self.extendeds.get(r).meta),
            CellSlot::Body(BodyRef::List(r)) => self.lists.get(r).meta.as_deref(),
            CellSlot::Body(BodyRef::Map(r)) => self.maps.get(r).meta.as_deref(),
            _ => None,
        }
    }

    /// Mark a cell as an instance of `class`, taking an owned
    /// reference to the class cell
    pub fn bless(&mut self, c: CellRef, class: CellRef) -> Result<(), HeapError> {
        self.check_usable(class, "class cell");
        self.acquire(class);
        let meta = self.meta_slots_mut(c)?;
        let old = std::mem::replace(&mut meta.class_ident, Some(class));
        self.heads.get_mut(c).flags.insert(CellFlags::OBJECT);
        if let Some(old) = old {
            self.release(old);
        }
        Ok(())
    }

    /// Class identity of a blessed cell
    pub fn class_of(&self, c: CellRef) -> Option<CellRef> {
        self.meta_slots(c).and_then(|m| m.class_ident)
    }

    /// Attach a user-level destructor, run when the strong count
    /// reaches zero
    pub fn set_finalizer(&mut self, c: CellRef, finalizer: Finalizer) -> Result<(), HeapError> {
        self.meta_slots_mut(c)?.finalizer = Some(finalizer);
        self.heads.get_mut(c).flags.insert(CellFlags::OBJECT);
        Ok(())
    }

    /// Attach a magic entry to the cell's metadata chain
    pub fn attach_magic(&mut self, c: CellRef, entry: MagicEntry) -> Result<(), HeapError> {
        let meta = self.meta_slots_mut(c)?;
        push_entry(&mut meta.magic, entry);
        Ok(())
    }

    // ---- aggregates ----------------------------------------------

    /// Append an element, taking an owned reference to it
    pub fn list_push(&mut self, list: CellRef, item: CellRef) -> Result<(), HeapError> {
        self.promote(list, Shape::List)?;
        self.acquire(item);
        if let CellSlot::Body(BodyRef::List(r)) = self.heads.get(list).slot {
            self.lists.get_mut(r).items.push(item);
        }
        Ok(())
    }

    pub fn list_len(&self, list: CellRef) -> usize {
        match self.heads.get(list).slot {
            CellSlot::Body(BodyRef::List(r)) => self.lists.get(r).items.len(),
            _ => 0,
        }
    }

    pub fn list_get(&self, list: CellRef, index: usize) -> Option<CellRef> {
        match self.heads.get(list).slot {
            CellSlot::Body(BodyRef::List(r)) => self.lists.get(r).items.get(index).copied(),
            _ => None,
        }
    }

    /// Remove and return the final element; its owned reference
    /// transfers to the caller
    pub fn list_pop(&mut self, list: CellRef) -> Option<CellRef> {
        match self.heads.get(list).slot {
            CellSlot::Body(BodyRef::List(r)) => self.lists.get_mut(r).items.pop(),
            _ => None,
        }
    }

    /// Insert a keyed element, taking an owned reference; a displaced
    /// element is released
    pub fn map_insert(&mut self, map: CellRef, key: &str, value: CellRef) -> Result<(), HeapError> {
        self.promote(map, Shape::Map)?;
        self.acquire(value);
        let displaced = if let CellSlot::Body(BodyRef::Map(r)) = self.heads.get(map).slot {
            self.maps.get_mut(r).entries.insert(key.into(), value)
        } else {
            None
        };
        if let Some(old) = displaced {
            self.release(old);
        }
        Ok(())
    }

    pub fn map_get(&self, map: CellRef, key: &str) -> Option<CellRef> {
        match self.heads.get(map).slot {
            CellSlot::Body(BodyRef::Map(r)) => self.maps.get(r).entries.get(key).copied(),
            _ => None,
        }
    }

    pub fn map_len(&self, map: CellRef) -> usize {
        match self.heads.get(map).slot {
            CellSlot::Body(BodyRef::Map(r)) => self.maps.get(r).entries.len(),
            _ => 0,
        }
    }

    /// Remove a keyed element; its owned reference transfers to the
    /// caller
    pub fn map_remove(&mut self, map: CellRef, key: &str) -> Option<CellRef> {
        match self.heads.get(map).slot {
            CellSlot::Body(BodyRef::Map(r)) => self.maps.get_mut(r).entries.shift_remove(key),
            _ => None,
        }
    }

    // ---- diagnostics ---------------------------------------------

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            heads: self.heads.stats(),
            strings: self.strings.stats(),
            extendeds: self.extendeds.stats(),
            lists: self.lists.stats(),
            maps: self.maps.stats(),
            buffers: self.buffers.stats(),
        }
    }

    /// Shape tag and body allocation class must always agree
    pub fn verify_body_class(&self, c: CellRef) {
        let cell = self.heads.get(c);
        match (cell.shape.body_class(), &cell.slot) {
            (Some(class), CellSlot::Body(b)) if b.class() == class => {}
            (Some(class), slot) => panic!(
                "cell {:?} shape {:?} requires {:?} body but holds {:?}",
                c, cell.shape, class, slot
            ),
            (None, CellSlot::Body(b)) => panic!(
                "cell {:?} shape {:?} is inline but holds {:?} body",
                c,
                cell.shape,
                b.class()
            ),
            (None, _) => {}
        }
    }

    pub(crate) fn check_usable(&self, c: CellRef, role: &str) {
        if !self.heads.is_live(c) {
            panic!("{} {:?} is dead", role, c);
        }
    }
}

impl Drop for CellHeap {
    fn drop(&mut self) {
        if !self.torn_down {
            self.teardown_all();
        }
    }
}

impl Shape {
    /// Narrowest extended-family shape reachable from here; identity
    /// for shapes already in the family
    pub(crate) fn max_with_extended(self) -> Shape {
        match self {
            Shape::Extended | Shape::Callable | Shape::Handle | Shape::List | Shape::Map => self,
            _ => Shape::Extended,
        }
    }
}
