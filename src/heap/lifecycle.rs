//! Reference lifecycle: acquire, release, teardown
//!
//! Every cell carries a strong count. `acquire` adds a unit,
//! `release` removes one and tears the cell down at zero. Teardown
//! runs the finalizer (once, with resurrection honoured), walks the
//! magic chain, severs weak referrers and releases everything the
//! slot owns before the head returns to its pool.
//!
//! Whole-heap teardown abandons outstanding handles by stripping one
//! artificial unit per live cell per pass until nothing survives;
//! immortals are demoted and collected last.

use crate::cell::body::{BodyRef, Finalizer, MetaSlots};
use crate::cell::head::{CellFlags, CellRef, CellSlot, LifeState};
use crate::cell::magic::{MagicEntry, MagicHook, MagicVtbl};

use super::CellHeap;

/// Where a finalizer was borrowed from, so it can be returned after
/// the call
enum FinalizerHome {
    Own,
    Class(CellRef),
}

impl CellHeap {
    /// Add a strong count unit
    ///
    /// Immortal cells are left alone. The count saturates rather than
    /// wrapping; a cell driven to the sentinel simply becomes
    /// immortal.
    pub fn acquire(&mut self, c: CellRef) {
        let cell = self.heads.get_mut(c);
        cell.strong = cell.strong.saturating_add(1);
    }

    /// Remove a strong count unit, tearing the cell down at zero
    ///
    /// Releasing a dead handle is a caller bug outside bulk teardown,
    /// where stale releases from dismantled structures are expected
    /// and silent.
    pub fn release(&mut self, c: CellRef) {
        let in_bulk = self.in_bulk;
        if !self.heads.is_live(c) {
            if in_bulk {
                return;
            }
            panic!("release of dead cell {:?}", c);
        }
        let cell = self.heads.get_mut(c);
        if cell.is_immortal() {
            return;
        }
        if cell.strong == 0 {
            // zero while live only happens under a teardown already
            // in progress on this cell
            if in_bulk || cell.life == LifeState::Finalizing {
                return;
            }
            panic!("double release of cell {:?}", c);
        }
        cell.strong -= 1;
        if cell.strong == 0 && cell.life == LifeState::Live {
            self.teardown_cell(c);
        }
    }

    /// Full teardown of a cell whose strong count reached zero
    fn teardown_cell(&mut self, c: CellRef) {
        self.heads.get_mut(c).life = LifeState::Finalizing;

        if self.run_finalizer(c) {
            // resurrected
            return;
        }

        // callbacks may have reshaped the cell; re-read the slot
        let slot = self.heads.get(c).slot;

        if let Some(chain) = self.take_magic(c) {
            let mut chain = Some(chain);
            self.run_chain(c, &mut chain, |v| v.on_free);
        }

        self.sever_weak_refs(c);
        self.release_slot(c, slot);
        self.heads.free(c);
    }

    /// Locate and invoke the finalizer, if any; true when the cell
    /// resurrected itself
    ///
    /// The cell holds one artificial count unit while the finalizer
    /// runs so releases inside it cannot re-enter teardown. The
    /// finalizer runs at most once per cell however many times the
    /// count later returns to zero.
    fn run_finalizer(&mut self, c: CellRef) -> bool {
        let flags = self.heads.get(c).flags;
        if !flags.contains(CellFlags::OBJECT) || flags.contains(CellFlags::FINALIZED) {
            return false;
        }

        let found = match self.take_finalizer(c) {
            Some(f) => Some((f, FinalizerHome::Own)),
            None => self
                .class_of(c)
                .filter(|&class| self.heads.is_live(class))
                .and_then(|class| {
                    self.take_finalizer(class)
                        .map(|f| (f, FinalizerHome::Class(class)))
                }),
        };
        let (mut finalizer, home) = match found {
            Some(pair) => pair,
            None => return false,
        };

        {
            let cell = self.heads.get_mut(c);
            cell.flags.insert(CellFlags::FINALIZED);
            cell.strong = 1;
        }
        finalizer(self, c);
        match home {
            FinalizerHome::Own => self.put_finalizer_back(c, finalizer),
            FinalizerHome::Class(class) => self.put_finalizer_back(class, finalizer),
        }

        let cell = self.heads.get_mut(c);
        // the finalizer may have released the guard unit itself, so
        // an already-zero count just means "not resurrected"
        cell.strong = cell.strong.saturating_sub(1);
        if cell.strong > 0 {
            cell.life = LifeState::Live;
            true
        } else {
            false
        }
    }

    /// Null every weak referrer of a dying target and notify their
    /// magic chains
    fn sever_weak_refs(&mut self, target: CellRef) {
        for r in self.backrefs.take(target) {
            if !self.heads.is_live(r) {
                continue;
            }
            let cleared = self.clear_weak_alias(r, target);
            if !cleared {
                continue;
            }
            if let Some(chain) = self.take_magic(r) {
                let mut chain = Some(chain);
                self.run_chain(r, &mut chain, |v| v.on_target_cleared);
                self.put_magic_back(r, chain);
            }
        }
    }

    /// Null `referrer`'s weak alias if it still points at `target`
    fn clear_weak_alias(&mut self, referrer: CellRef, target: CellRef) -> bool {
        if !self.heads.get(referrer).flags.contains(CellFlags::WEAK) {
            return false;
        }
        let slot = self.heads.get(referrer).slot;
        match slot {
            CellSlot::Alias(t) if t == target => {
                let cell = self.heads.get_mut(referrer);
                cell.slot = CellSlot::Empty;
                cell.flags.remove(CellFlags::WEAK);
                true
            }
            CellSlot::Body(BodyRef::Extended(er)) => {
                let body = self.extendeds.get_mut(er);
                if body.alias == Some(target) {
                    body.alias = None;
                    self.heads.get_mut(referrer).flags.remove(CellFlags::WEAK);
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Release everything the slot owns, returning bodies to their
    /// pools
    fn release_slot(&mut self, c: CellRef, slot: CellSlot) {
        match slot {
            CellSlot::Empty | CellSlot::Int(_) | CellSlot::Float(_) => {}
            CellSlot::Alias(t) => {
                if self.heads.get(c).flags.contains(CellFlags::WEAK) {
                    self.backrefs.unregister(t, c);
                } else {
                    self.release(t);
                }
            }
            CellSlot::Body(BodyRef::String(r)) => {
                let body = self.strings.free(r);
                if let Some(buf) = body.buf {
                    self.buffers.release(buf);
                }
            }
            CellSlot::Body(BodyRef::Extended(r)) => {
                let body = self.extendeds.free(r);
                if let Some(buf) = body.string.buf {
                    self.buffers.release(buf);
                }
                if let Some(t) = body.alias {
                    if self.heads.get(c).flags.contains(CellFlags::WEAK) {
                        self.backrefs.unregister(t, c);
                    } else {
                        self.release(t);
                    }
                }
                self.release_meta(body.meta);
            }
            CellSlot::Body(BodyRef::List(r)) => {
                let body = self.lists.free(r);
                for item in body.items {
                    self.release(item);
                }
                if let Some(meta) = body.meta {
                    self.release_meta(*meta);
                }
            }
            CellSlot::Body(BodyRef::Map(r)) => {
                let body = self.maps.free(r);
                for (_, value) in body.entries {
                    self.release(value);
                }
                if let Some(meta) = body.meta {
                    self.release_meta(*meta);
                }
            }
        }
    }

    fn release_meta(&mut self, meta: MetaSlots) {
        if let Some(class) = meta.class_ident {
            self.release(class);
        }
        // magic chain hooks already ran; the entries just drop
    }

    /// Strip one artificial count unit per live cell per pass until
    /// the heap is empty, then collect the immortals
    ///
    /// Pass N abandons the handles the embedder never released; any
    /// cell whose count reaches zero tears down normally, finalizers
    /// and weak severing included. The total strong count strictly
    /// decreases each pass, so the loop terminates even through
    /// reference cycles.
    pub fn teardown_all(&mut self) {
        if self.torn_down {
            return;
        }
        self.in_bulk = true;
        loop {
            let pending: Vec<CellRef> = self
                .heads
                .live_handles()
                .into_iter()
                .filter(|&c| {
                    let cell = self.heads.get(c);
                    !cell.is_immortal() && cell.life == LifeState::Live
                })
                .collect();
            if pending.is_empty() {
                break;
            }
            for c in pending {
                if !self.heads.is_live(c) {
                    continue;
                }
                self.release(c);
            }
        }

        let immortals: Vec<CellRef> = self
            .heads
            .live_handles()
            .into_iter()
            .filter(|&c| self.heads.get(c).is_immortal())
            .collect();
        for c in immortals {
            if !self.heads.is_live(c) {
                continue;
            }
            let cell = self.heads.get_mut(c);
            cell.strong = 1;
            cell.flags.remove(CellFlags::READ_ONLY);
            self.release(c);
        }

        self.in_bulk = false;
        self.torn_down = true;
    }

    // ---- metadata plumbing ---------------------------------------

    /// Metadata slots as the cell currently stores them, without
    /// promoting
    fn meta_in_place_mut(&mut self, c: CellRef) -> Option<&mut MetaSlots> {
        match self.heads.get(c).slot {
            CellSlot::Body(BodyRef::Extended(r)) => Some(&mut self.extendeds.get_mut(r).meta),
            CellSlot::Body(BodyRef::List(r)) => self.lists.get_mut(r).meta.as_deref_mut(),
            CellSlot::Body(BodyRef::Map(r)) => self.maps.get_mut(r).meta.as_deref_mut(),
            _ => None,
        }
    }

    fn take_finalizer(&mut self, c: CellRef) -> Option<Finalizer> {
        self.meta_in_place_mut(c).and_then(|m| m.finalizer.take())
    }

    /// Return a borrowed finalizer; dropped if its home has no
    /// metadata any more
    fn put_finalizer_back(&mut self, home: CellRef, finalizer: Finalizer) {
        if !self.heads.is_live(home) {
            return;
        }
        if let Some(meta) = self.meta_in_place_mut(home) {
            if meta.finalizer.is_none() {
                meta.finalizer = Some(finalizer);
            }
        }
    }

    fn take_magic(&mut self, c: CellRef) -> Option<Box<MagicEntry>> {
        self.meta_in_place_mut(c).and_then(|m| m.magic.take())
    }

    fn put_magic_back(&mut self, c: CellRef, chain: Option<Box<MagicEntry>>) {
        if let Some(meta) = self.meta_in_place_mut(c) {
            if meta.magic.is_none() {
                meta.magic = chain;
            }
        }
    }

    /// Walk a (detached) magic chain invoking the selected hook on
    /// each entry
    fn run_chain(
        &mut self,
        c: CellRef,
        chain: &mut Option<Box<MagicEntry>>,
        select: fn(&MagicVtbl) -> Option<MagicHook>,
    ) {
        let mut cursor = chain.as_deref_mut();
        while let Some(entry) = cursor {
            if let Some(hook) = select(entry.vtbl) {
                hook(self, c, entry);
            }
            cursor = entry.next.as_deref_mut();
        }
    }
}
