//! Per-(entity, type) container cell for polymorphic components.
//!
//! A [`PolyCell`] is the fixed-size slot a polymorphic storage keeps per
//! entity. It holds, in one of four states, either an owned component value,
//! a single foreign reference, a value plus an overflow reference list, or a
//! foreign reference plus an overflow list. Two low bits of an auxiliary
//! pointer-sized word encode the state:
//!
//! | REF | LIST | payload           | tag word (masked)        |
//! |-----|------|-------------------|--------------------------|
//! | 0   | 0    | owned value       | null-list sentinel       |
//! | 1   | 0    | deleter           | target component address |
//! | 0   | 1    | owned value       | list base                |
//! | 1   | 1    | list base         | any target from the list |
//!
//! ## Invariants
//! - When LIST is set the list holds at least two records, and the record
//!   immediately reachable from the cell (the stored single reference, or the
//!   owned value through its self-reference) is also present in the list.
//! - REF clear means the cell uniquely owns a value of the exact component
//!   type; destroying the value sets REF before the payload is reused.
//! - Once emplaced, a value's address never changes for the lifetime of the
//!   cell. Cells are never copied, moved, or swapped after insertion; the
//!   owning storage constructs and drops them in place.
//!
//! Hierarchy fan-out is *not* performed here: every operation that must
//! re-enter the registry (mirroring references into ancestor storages,
//! cascading deleters) lives at the registry layer, which sequences those
//! re-entrant steps without holding a cell borrow across them.

use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};

use crate::engine::every::{Every, EveryMut};
use crate::engine::hierarchy::Polymorphic;
use crate::engine::ref_list::{null_list_base, Deleter, PolyRef, RefList};
use crate::engine::registry;

/// Tag bit: set when the cell does not own a value.
const REF_BIT: usize = 0b01;
/// Tag bit: set when the cell carries an overflow reference list.
const LIST_BIT: usize = 0b10;
/// Both tag bits.
const TAG_MASK: usize = 0b11;

/// Payload word: an owned value, a deleter, or a list base, per the state
/// table above. Sized and aligned for whichever is larger.
#[repr(C)]
union CellPayload<U> {
    value: ManuallyDrop<U>,
    word: usize,
}

/// Fixed-size container for one (entity, component type) slot.
///
/// See the module documentation for the state machine. All mutation routes
/// through cell methods so the four-state invariant is preserved.
pub struct PolyCell<U: Polymorphic> {
    payload: CellPayload<U>,
    tag: usize,
}

impl<U: Polymorphic> PolyCell<U> {
    /// Cell owning `value`, with no references (state V).
    pub(crate) fn with_value(value: U) -> Self {
        Self {
            payload: CellPayload {
                value: ManuallyDrop::new(value),
            },
            tag: null_list_base().as_ptr() as usize,
        }
    }

    /// Cell holding a single foreign reference (state R).
    pub(crate) fn with_ref(record: PolyRef) -> Self {
        Self {
            payload: CellPayload {
                word: record.deleter as usize,
            },
            tag: record.target.as_ptr() as usize | REF_BIT,
        }
    }

    #[inline]
    fn flag(&self, bit: usize) -> bool {
        self.tag & bit != 0
    }

    /// Address of the value buffer, regardless of state.
    #[inline]
    pub(crate) fn value_base(&self) -> NonNull<U> {
        NonNull::from(&self.payload).cast::<U>()
    }

    /// Pointer to the single canonical value: the owned value when REF is
    /// clear, the masked tag target otherwise. Selected by a two-entry table
    /// indexed with the REF bit.
    #[inline]
    pub(crate) fn ref_value_ptr(&self) -> *mut U {
        let choices = [self.value_base().as_ptr() as usize, self.tag & !TAG_MASK];
        choices[self.tag & REF_BIT] as *mut U
    }

    /// Reference to the single canonical value, whether owned here or held
    /// remotely.
    #[inline]
    pub fn ref_value(&self) -> &U {
        unsafe { &*self.ref_value_ptr() }
    }

    /// The overflow list. Undefined to call while LIST is clear.
    #[inline]
    fn get_list(&self) -> RefList {
        debug_assert!(self.flag(LIST_BIT));
        let base = if self.flag(REF_BIT) {
            unsafe { self.payload.word }
        } else {
            self.tag & !TAG_MASK
        };
        RefList::from_base(unsafe { NonNull::new_unchecked(base as *mut usize) })
    }

    /// Stores `list` in the state-appropriate field and sets LIST.
    #[inline]
    fn set_list(&mut self, list: RefList) {
        let base = list.base().as_ptr() as usize;
        if self.flag(REF_BIT) {
            self.payload.word = base;
        } else {
            self.tag = base;
        }
        self.tag |= LIST_BIT;
    }

    /// Installs a single reference, clearing LIST (state R).
    #[inline]
    fn set_single_ref(&mut self, record: PolyRef) {
        self.tag = record.target.as_ptr() as usize | REF_BIT;
        self.payload.word = record.deleter as usize;
    }

    /// The held reference in state R.
    #[inline]
    fn single_ref(&self) -> PolyRef {
        debug_assert!(self.flag(REF_BIT) && !self.flag(LIST_BIT));
        unsafe {
            PolyRef {
                target: NonNull::new_unchecked((self.tag & !TAG_MASK) as *mut u8),
                deleter: std::mem::transmute::<usize, Deleter>(self.payload.word),
            }
        }
    }

    /// In state RL, replaces the tag target with `ptr`.
    #[inline]
    fn replace_ref_from_list(&mut self, ptr: *mut u8) {
        self.tag = ptr as usize | REF_BIT | LIST_BIT;
    }

    /// State V: value owned, no list, tag parked on the null sentinel.
    #[inline]
    fn set_only_value(&mut self) {
        self.tag = null_list_base().as_ptr() as usize;
    }

    /// Self-reference record for the owned value.
    #[inline]
    fn self_ref(&self) -> PolyRef {
        PolyRef {
            target: self.value_base().cast::<u8>(),
            deleter: registry::erase_value_of::<U>,
        }
    }

    /// Creates the overflow list, seeded with the cell's current content:
    /// the held single reference, or a self-reference to the owned value.
    fn create_list(&mut self) -> RefList {
        let mut list = RefList::null();
        list.reserve(4);
        if self.flag(REF_BIT) {
            list.push_back(self.single_ref());
        } else {
            list.push_back(self.self_ref());
        }
        self.set_list(list);
        list
    }

    /// Copies the surviving record back into the cell and clears LIST.
    fn collapse_list(&mut self, survivor: PolyRef) {
        if self.flag(REF_BIT) {
            self.set_single_ref(survivor);
        } else {
            self.set_only_value();
        }
    }

    /// Removes the record matching `ptr` from `list` by swap-and-pop. When
    /// one record remains it is copied back into the cell and the list is
    /// freed. Returns `false` if no record matched.
    fn delete_ref_internal(&mut self, mut list: RefList, ptr: *mut u8) -> bool {
        let len = list.len();
        let records = list.records_mut();
        for i in 0..len {
            if records[i].target.as_ptr() == ptr {
                records.swap(i, len - 1);
                list.pop_back();
                if len == 2 {
                    let survivor = list.records()[0];
                    self.collapse_list(survivor);
                    list.pop_back();
                } else {
                    self.set_list(list);
                }
                return true;
            }
        }
        false
    }

    /// Adds a foreign reference, creating the overflow list on demand.
    pub(crate) fn add_ref(&mut self, record: PolyRef) {
        debug_assert!(
            record.target.as_ptr() != self.value_base().cast::<u8>().as_ptr(),
            "add_ref must not receive a reference to the cell's own value"
        );
        let mut list = if self.flag(LIST_BIT) {
            self.get_list()
        } else {
            self.create_list()
        };
        list.push_back(record);
        self.set_list(list);
    }

    /// Removes the reference whose target equals `ptr`.
    ///
    /// Returns `true` iff the cell is now empty and must be released by the
    /// owning storage. With LIST clear and REF clear the match is against the
    /// canonical value held elsewhere on this cell's behalf, and the caller
    /// is destroying the owned value through a different path.
    pub(crate) fn delete_ref(&mut self, ptr: *mut u8) -> bool {
        debug_assert!(
            ptr != self.value_base().cast::<u8>().as_ptr(),
            "delete_ref must not receive the cell's own value"
        );
        if self.flag(LIST_BIT) {
            let list = self.get_list();
            let found = self.delete_ref_internal(list, ptr);
            debug_assert!(found, "delete_ref received an unknown reference");
            false
        } else {
            debug_assert!(
                self.ref_value_ptr().cast::<u8>() == ptr,
                "delete_ref received an unknown reference"
            );
            self.flag(REF_BIT)
        }
    }

    /// Writes an owned value into a cell currently holding references only.
    ///
    /// The overflow list is created first (capturing the held single
    /// reference before the payload is overwritten), then the value is
    /// constructed in place, REF is cleared, and the self-reference is
    /// pushed. Hierarchy fan-out is the caller's next step.
    pub(crate) fn install_value(&mut self, value: U) {
        debug_assert!(
            self.flag(REF_BIT),
            "install_value called while already holding a value"
        );
        let mut list = if self.flag(LIST_BIT) {
            self.get_list()
        } else {
            self.create_list()
        };
        unsafe { ptr::write(self.value_base().as_ptr(), value) };
        self.tag &= !REF_BIT;
        list.push_back(self.self_ref());
        self.set_list(list);
    }

    /// Destroys the owned value in place.
    ///
    /// Sets REF, removes the self-reference from the list (collapsing it
    /// when one record remains), and, if a list survives, promotes its first
    /// target into the tag word. Returns `true` iff no references remain and
    /// the cell must be released. Hierarchy fan-out must already have run.
    pub(crate) fn extract_value(&mut self) -> bool {
        debug_assert!(
            !self.flag(REF_BIT),
            "extract_value called while not holding a value"
        );
        unsafe { ptr::drop_in_place(self.value_base().as_ptr()) };
        if self.flag(LIST_BIT) {
            let list = self.get_list();
            self.tag |= REF_BIT;
            let found = self.delete_ref_internal(list, self.value_base().cast::<u8>().as_ptr());
            debug_assert!(found, "self reference missing from the list");
            if self.flag(LIST_BIT) {
                let first = self.get_list().records()[0].target;
                self.replace_ref_from_list(first.as_ptr());
            }
            false
        } else {
            self.tag |= REF_BIT;
            true
        }
    }

    /// Highest-positioned record that does not reference the cell's own
    /// value, if any.
    ///
    /// Drives the reverse cascade used by remove-by-ancestor: each returned
    /// record's deleter removes exactly that record (possibly collapsing or
    /// freeing the list), and the caller re-reads the cell state before
    /// asking again, so swap-and-pop mutations are never observed through a
    /// stale base.
    pub(crate) fn next_foreign_ref(&self) -> Option<PolyRef> {
        if self.flag(LIST_BIT) {
            let own = self
                .holds_value()
                .then(|| self.value_base().cast::<u8>().as_ptr());
            self.get_list()
                .records()
                .iter()
                .rev()
                .find(|record| Some(record.target.as_ptr()) != own)
                .copied()
        } else if self.flag(REF_BIT) {
            Some(self.single_ref())
        } else {
            None
        }
    }

    /// Lazy sequence over every value reachable from this cell.
    ///
    /// With a list present the sequence walks the record array; otherwise it
    /// is the single-element sequence referencing the canonical value
    /// directly (offset −1 encoding).
    pub fn each(&self) -> Every<'_, U> {
        if self.flag(LIST_BIT) {
            let list = self.get_list();
            Every::from_records(list.records_ptr(), list.len())
        } else {
            Every::single(self.ref_value_ptr())
        }
    }

    /// Mutable lazy sequence over every value reachable from this cell.
    pub fn each_mut(&mut self) -> EveryMut<'_, U> {
        if self.flag(LIST_BIT) {
            let list = self.get_list();
            EveryMut::from_records(list.records_ptr(), list.len())
        } else {
            EveryMut::single(self.ref_value_ptr())
        }
    }

    /// Returns `true` iff the cell owns a value of the exact type `U`.
    #[inline]
    pub fn holds_value(&self) -> bool {
        !self.flag(REF_BIT)
    }

    /// Returns `true` iff the cell carries an overflow reference list.
    #[inline]
    pub fn has_list(&self) -> bool {
        self.flag(LIST_BIT)
    }

    /// Length of the overflow list, zero when absent.
    #[inline]
    pub fn list_len(&self) -> usize {
        if self.flag(LIST_BIT) {
            self.get_list().len()
        } else {
            0
        }
    }
}

impl<U: Polymorphic> Drop for PolyCell<U> {
    /// Destroys the owned value when one is present. This only fires during
    /// storage teardown; every erase path sets REF before releasing the
    /// cell.
    fn drop(&mut self) {
        if !self.flag(REF_BIT) {
            unsafe { ptr::drop_in_place(self.value_base().as_ptr()) };
        }
    }
}
