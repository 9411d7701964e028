//! Per-component-type storages.
//!
//! [`PolyStorage`] keeps one [`PolyCell`] per entity for a polymorphic
//! component type. Cells live in fixed-size boxed chunks and are constructed
//! and dropped **in place**: a slot freed by an erase is recycled through a
//! free list, never compacted, so cell and value addresses stay stable for
//! the cell's whole lifetime. That pointer stability is what the hierarchy's
//! reference records rely on.
//!
//! [`PlainStorage`] is the ordinary one-value-per-entity map used for
//! non-polymorphic components. It makes no stability promises.
//!
//! ## Invariants
//! - `index` maps an entity to an initialized slot; every slot outside
//!   `index` and `free` below the high-water mark is dead.
//! - Chunks are never shrunk or reordered while the storage lives.

use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};

use rustc_hash::FxHashMap;

use crate::engine::cell::PolyCell;
use crate::engine::entity::Entity;
use crate::engine::hierarchy::Polymorphic;

/// Cells per storage chunk.
pub const CELL_CHUNK_CAP: usize = 128;

/// Marker trait for ordinary (non-polymorphic) component types.
///
/// Implement it for any `'static` type that should be attachable through
/// [`Registry::insert`](crate::Registry::insert) and usable as a plain view
/// part:
///
/// ```
/// use polymorph_ecs::Component;
///
/// struct Transform { x: i64, y: i64 }
/// impl Component for Transform {}
/// ```
pub trait Component: 'static {}

/// Storage for one polymorphic component type.
///
/// Maps entity → container cell over a chunked, never-moving slab. Exposed
/// for introspection (tests assert on cell states through it); all mutation
/// goes through the registry so hierarchy fan-out stays consistent.
pub struct PolyStorage<U: Polymorphic> {
    index: FxHashMap<Entity, u32>,
    chunks: Vec<Box<[MaybeUninit<PolyCell<U>>; CELL_CHUNK_CAP]>>,
    next_slot: u32,
    free: Vec<u32>,
}

impl<U: Polymorphic> Default for PolyStorage<U> {
    fn default() -> Self {
        Self {
            index: FxHashMap::default(),
            chunks: Vec::new(),
            next_slot: 0,
            free: Vec::new(),
        }
    }
}

impl<U: Polymorphic> PolyStorage<U> {
    #[inline]
    fn slot_ptr(&self, slot: u32) -> *mut PolyCell<U> {
        let chunk = slot as usize / CELL_CHUNK_CAP;
        let row = slot as usize % CELL_CHUNK_CAP;
        self.chunks[chunk][row].as_ptr() as *mut PolyCell<U>
    }

    /// The cell attached to `entity`, if any.
    pub fn cell(&self, entity: Entity) -> Option<&PolyCell<U>> {
        let slot = *self.index.get(&entity)?;
        Some(unsafe { &*self.slot_ptr(slot) })
    }

    /// Mutable access to the cell attached to `entity`, if any.
    pub fn cell_mut(&mut self, entity: Entity) -> Option<&mut PolyCell<U>> {
        let slot = *self.index.get(&entity)?;
        Some(unsafe { &mut *self.slot_ptr(slot) })
    }

    /// Constructs `cell` in place for `entity` and returns its address.
    ///
    /// The returned pointer stays valid until [`release`](Self::release); the
    /// caller performs hierarchy fan-out only after the cell is in place.
    pub(crate) fn insert_cell(&mut self, entity: Entity, cell: PolyCell<U>) -> NonNull<PolyCell<U>> {
        debug_assert!(
            !self.index.contains_key(&entity),
            "entity already has a cell in this storage"
        );
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                let slot = self.next_slot;
                if slot as usize / CELL_CHUNK_CAP == self.chunks.len() {
                    self.chunks
                        .push(Box::new(std::array::from_fn(|_| MaybeUninit::uninit())));
                }
                self.next_slot += 1;
                slot
            }
        };
        let ptr = self.slot_ptr(slot);
        unsafe { ptr.write(cell) };
        self.index.insert(entity, slot);
        unsafe { NonNull::new_unchecked(ptr) }
    }

    /// Drops the cell for `entity` in place and recycles its slot.
    pub(crate) fn release(&mut self, entity: Entity) {
        let Some(slot) = self.index.remove(&entity) else {
            debug_assert!(false, "release on an entity without a cell");
            return;
        };
        unsafe { ptr::drop_in_place(self.slot_ptr(slot)) };
        self.free.push(slot);
    }

    /// Returns `true` if `entity` has a cell in this storage.
    pub fn contains(&self, entity: Entity) -> bool {
        self.index.contains_key(&entity)
    }

    /// Number of live cells.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if the storage holds no cells.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Snapshot of the entities that currently have a cell.
    pub(crate) fn entities(&self) -> Vec<Entity> {
        self.index.keys().copied().collect()
    }
}

impl<U: Polymorphic> Drop for PolyStorage<U> {
    fn drop(&mut self) {
        for &slot in self.index.values() {
            unsafe { ptr::drop_in_place(self.slot_ptr(slot)) };
        }
    }
}

/// Storage for one ordinary component type: a plain entity → value map.
pub struct PlainStorage<T: Component> {
    map: FxHashMap<Entity, T>,
}

impl<T: Component> Default for PlainStorage<T> {
    fn default() -> Self {
        Self {
            map: FxHashMap::default(),
        }
    }
}

impl<T: Component> PlainStorage<T> {
    /// Attaches `value`, returning any displaced previous value.
    pub(crate) fn insert(&mut self, entity: Entity, value: T) -> Option<T> {
        self.map.insert(entity, value)
    }

    /// Detaches and returns the value for `entity`, if present.
    pub(crate) fn remove(&mut self, entity: Entity) -> Option<T> {
        self.map.remove(&entity)
    }

    /// The value attached to `entity`, if any.
    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.map.get(&entity)
    }

    /// Mutable access to the value attached to `entity`, if any.
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        self.map.get_mut(&entity)
    }

    /// Returns `true` if `entity` has a value in this storage.
    pub fn contains(&self, entity: Entity) -> bool {
        self.map.contains_key(&entity)
    }

    /// Number of attached values.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the storage holds no values.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Snapshot of the entities that currently have a value.
    pub(crate) fn entities(&self) -> Vec<Entity> {
        self.map.keys().copied().collect()
    }
}
