//! The entity-component registry and hierarchy fan-out protocol.
//!
//! [`Registry`] owns the entity allocator and one storage per component
//! type, resolved through a `TypeId`-keyed table created on first use. All
//! polymorphic mutation goes through registry-level operations because a
//! single emplace or erase of a concrete value must *fan out*: for every
//! type `U` in the concrete type's parent closure, the storage for `U` gains
//! or loses a reference record targeting that value's `U` subobject.
//!
//! ## Fan-out ordering
//! Within one emplace or erase, parent-storage operations execute in the
//! declared transitive-parent order. No public method returns between the
//! start and completion of a fan-out, so callers never observe a partially
//! mirrored hierarchy.
//!
//! Remove-by-ancestor cascades are the one place mutation re-enters the
//! registry mid-operation: every reference record carries a deleter that
//! erases its concrete value, and that erase fans `erase_ref` back into the
//! very cell being drained. The cascade therefore walks the list in reverse
//! and re-reads the cell state between deleter invocations instead of
//! holding a list base across them; swap-and-pop removal and list collapse
//! performed by the callee can never be observed through a stale pointer.
//!
//! ## Borrow discipline
//! A cell borrow is never held across a re-entrant registry call. Every
//! operation extracts the raw pointers it needs, ends the storage borrow,
//! and re-acquires state afterwards. Cell and value addresses are stable
//! (in-place storage), which is what makes the re-acquisition sound.

use std::any::{type_name, Any, TypeId};
use std::ptr::NonNull;

use log::debug;
use rustc_hash::FxHashMap;

use crate::engine::cell::PolyCell;
use crate::engine::entity::{Entities, Entity};
use crate::engine::error::{DuplicateValueError, EmplaceError, StaleEntityError};
use crate::engine::every::{Every, EveryMut};
use crate::engine::hierarchy::Polymorphic;
use crate::engine::ref_list::{Deleter, PolyRef};
use crate::engine::storage::{Component, PlainStorage, PolyStorage};
use crate::engine::types::MIN_POLY_ALIGN;
use crate::engine::view::{Query, View};

struct StorageEntry {
    storage: Box<dyn Any>,
    /// Type-erased remover used by entity destruction.
    remove_all: fn(&mut Registry, Entity) -> usize,
}

/// Entity-component registry with polymorphic component support.
///
/// ## Usage
/// ```
/// use polymorph_ecs::{polymorphic, Registry};
///
/// polymorphic! {
///     #[derive(Debug)]
///     pub struct Health { pub points: i32, }
/// }
///
/// polymorphic! {
///     #[derive(Debug)]
///     pub struct Regenerating: inherit(health: Health) {}
/// }
///
/// let mut registry = Registry::new();
/// let entity = registry.create();
/// registry
///     .emplace(entity, Regenerating { health: Health { points: 10 } })
///     .unwrap();
///
/// // The concrete value is visible under its parent type.
/// assert_eq!(registry.try_get::<Health>(entity).unwrap().points, 10);
/// assert_eq!(registry.remove::<Health>(entity), 1);
/// assert!(registry.try_get::<Regenerating>(entity).is_none());
/// ```
#[derive(Default)]
pub struct Registry {
    entities: Entities,
    storages: FxHashMap<TypeId, StorageEntry>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // ── entities ────────────────────────────────────────────────────────

    /// Allocates a new entity.
    pub fn create(&mut self) -> Entity {
        self.entities.spawn()
    }

    /// Returns `true` if `entity` is alive and not stale.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Destroys an entity, removing all of its components.
    ///
    /// Every owned polymorphic value is destroyed exactly once and every
    /// ancestor-storage reference to it is cleared. Returns `false` if the
    /// handle was stale.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        if !self.entities.is_alive(entity) {
            return false;
        }
        let removers: Vec<fn(&mut Registry, Entity) -> usize> = self
            .storages
            .values()
            .map(|entry| entry.remove_all)
            .collect();
        for remove in removers {
            remove(self, entity);
        }
        self.entities.despawn(entity)
    }

    // ── storage acquisition ─────────────────────────────────────────────

    /// The storage for polymorphic type `U`, creating it on first use.
    pub fn assure_poly<U: Polymorphic>(&mut self) -> &mut PolyStorage<U> {
        const {
            assert!(
                std::mem::align_of::<U>() >= MIN_POLY_ALIGN,
                "polymorphic component types require an alignment of at least 4"
            )
        };
        let entry = self
            .storages
            .entry(TypeId::of::<U>())
            .or_insert_with(|| {
                debug!("creating polymorphic storage for {}", type_name::<U>());
                StorageEntry {
                    storage: Box::new(PolyStorage::<U>::default()),
                    remove_all: remove_all_poly::<U>,
                }
            });
        entry
            .storage
            .downcast_mut::<PolyStorage<U>>()
            .expect("storage entry type confusion")
    }

    /// The storage for plain type `T`, creating it on first use.
    pub fn assure_plain<T: Component>(&mut self) -> &mut PlainStorage<T> {
        let entry = self
            .storages
            .entry(TypeId::of::<T>())
            .or_insert_with(|| {
                debug!("creating plain storage for {}", type_name::<T>());
                StorageEntry {
                    storage: Box::new(PlainStorage::<T>::default()),
                    remove_all: remove_all_plain::<T>,
                }
            });
        entry
            .storage
            .downcast_mut::<PlainStorage<T>>()
            .expect("storage entry type confusion")
    }

    /// The storage for polymorphic type `U`, if it has been created.
    pub fn poly_storage<U: Polymorphic>(&self) -> Option<&PolyStorage<U>> {
        self.storages
            .get(&TypeId::of::<U>())
            .and_then(|entry| entry.storage.downcast_ref())
    }

    /// Mutable access to the storage for polymorphic type `U`, if created.
    pub fn poly_storage_mut<U: Polymorphic>(&mut self) -> Option<&mut PolyStorage<U>> {
        self.storages
            .get_mut(&TypeId::of::<U>())
            .and_then(|entry| entry.storage.downcast_mut())
    }

    /// The storage for plain type `T`, if it has been created.
    pub fn plain_storage<T: Component>(&self) -> Option<&PlainStorage<T>> {
        self.storages
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.storage.downcast_ref())
    }

    /// Mutable access to the storage for plain type `T`, if created.
    pub fn plain_storage_mut<T: Component>(&mut self) -> Option<&mut PlainStorage<T>> {
        self.storages
            .get_mut(&TypeId::of::<T>())
            .and_then(|entry| entry.storage.downcast_mut())
    }

    pub(crate) fn poly_storage_ptr<U: Polymorphic>(&mut self) -> Option<NonNull<PolyStorage<U>>> {
        self.poly_storage_mut::<U>().map(NonNull::from)
    }

    pub(crate) fn plain_storage_ptr<T: Component>(&mut self) -> Option<NonNull<PlainStorage<T>>> {
        self.plain_storage_mut::<T>().map(NonNull::from)
    }

    // ── polymorphic components ──────────────────────────────────────────

    /// Attaches a concrete polymorphic value to `entity`.
    ///
    /// ## Behavior
    /// - With no cell present, the cell is created owning the value.
    /// - With a references-only cell present, the value is constructed into
    ///   it and joins the existing reference list.
    /// - In both cases the value is then mirrored into every storage of the
    ///   type's parent closure, in declared order.
    ///
    /// ## Errors
    /// - [`EmplaceError::Duplicate`] if the entity already owns a value of
    ///   exactly `C`; the existing value is untouched.
    /// - [`EmplaceError::StaleEntity`] if the handle is dead.
    pub fn emplace<C: Polymorphic>(
        &mut self,
        entity: Entity,
        value: C,
    ) -> Result<&mut C, EmplaceError> {
        if !self.entities.is_alive(entity) {
            return Err(StaleEntityError.into());
        }
        let storage = self.assure_poly::<C>();
        let value_ptr: NonNull<C> = match storage.cell_mut(entity) {
            Some(cell) => {
                if cell.holds_value() {
                    return Err(DuplicateValueError {
                        entity,
                        component: type_name::<C>(),
                    }
                    .into());
                }
                cell.install_value(value);
                cell.value_base()
            }
            None => {
                let cell = storage.insert_cell(entity, PolyCell::with_value(value));
                unsafe { cell.as_ref() }.value_base()
            }
        };

        let deleter: Deleter = erase_value_of::<C>;
        for link in C::parents() {
            let target =
                unsafe { NonNull::new_unchecked(value_ptr.as_ptr().cast::<u8>().add(link.offset())) };
            link.call_emplace(self, entity, target, deleter);
        }
        Ok(unsafe { &mut *value_ptr.as_ptr() })
    }

    /// Removes everything attached to `entity` under type `U`.
    ///
    /// Every reference held in `U`'s cell is cascaded through its deleter,
    /// erasing the corresponding descendant value (which in turn clears its
    /// records from all other ancestor storages, including `U` itself); an
    /// owned `U` value is erased last. Each value is destroyed exactly once
    /// regardless of how many ancestors list it.
    ///
    /// Returns the number of cells removed from `U`'s storage: 1 when a cell
    /// was present, 0 otherwise.
    pub fn remove<U: Polymorphic>(&mut self, entity: Entity) -> usize {
        if self
            .poly_storage::<U>()
            .map_or(true, |storage| !storage.contains(entity))
        {
            return 0;
        }

        // Reverse cascade: take the topmost foreign record, invoke its
        // deleter, and re-read the cell, which the deleter has mutated (or
        // released) behind us.
        loop {
            let Some(record) = self
                .poly_storage::<U>()
                .and_then(|storage| storage.cell(entity))
                .and_then(|cell| cell.next_foreign_ref())
            else {
                break;
            };
            (record.deleter)(self, entity);
        }

        if self
            .poly_storage::<U>()
            .and_then(|storage| storage.cell(entity))
            .is_some_and(|cell| cell.holds_value())
        {
            erase_value_of::<U>(self, entity);
        }

        debug_assert!(self
            .poly_storage::<U>()
            .map_or(true, |storage| !storage.contains(entity)));
        1
    }

    /// A pointer to any one value satisfying the `U` view on `entity`.
    ///
    /// For an ancestor cell this is the first matching reference's target;
    /// for a concrete cell, the owned value.
    pub fn try_get<U: Polymorphic>(&self, entity: Entity) -> Option<&U> {
        self.poly_storage::<U>()?
            .cell(entity)
            .map(|cell| cell.ref_value())
    }

    /// Mutable access to the canonical value satisfying `U` on `entity`.
    pub fn try_get_mut<U: Polymorphic>(&mut self, entity: Entity) -> Option<&mut U> {
        let ptr = self.poly_storage::<U>()?.cell(entity)?.ref_value_ptr();
        Some(unsafe { &mut *ptr })
    }

    /// Returns `true` if anything is attached to `entity` under `U`.
    pub fn contains<U: Polymorphic>(&self, entity: Entity) -> bool {
        self.poly_storage::<U>()
            .is_some_and(|storage| storage.contains(entity))
    }

    /// Lazy sequence of all values matching `U` on `entity`.
    pub fn every<U: Polymorphic>(&self, entity: Entity) -> Every<'_, U> {
        match self.poly_storage::<U>().and_then(|s| s.cell(entity)) {
            Some(cell) => cell.each(),
            None => Every::empty(),
        }
    }

    /// Mutable lazy sequence of all values matching `U` on `entity`.
    pub fn every_mut<U: Polymorphic>(&mut self, entity: Entity) -> EveryMut<'_, U> {
        match self
            .poly_storage_mut::<U>()
            .and_then(|s| s.cell_mut(entity))
        {
            Some(cell) => cell.each_mut(),
            None => EveryMut::empty(),
        }
    }

    // ── plain components ────────────────────────────────────────────────

    /// Attaches an ordinary component, returning any displaced value.
    ///
    /// ## Errors
    /// [`EmplaceError::StaleEntity`] if the handle is dead.
    pub fn insert<T: Component>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<Option<T>, EmplaceError> {
        if !self.entities.is_alive(entity) {
            return Err(StaleEntityError.into());
        }
        Ok(self.assure_plain::<T>().insert(entity, value))
    }

    /// Detaches and returns the ordinary component for `entity`, if present.
    pub fn remove_plain<T: Component>(&mut self, entity: Entity) -> Option<T> {
        self.plain_storage_mut::<T>()?.remove(entity)
    }

    /// The ordinary component attached to `entity`, if any.
    pub fn get_plain<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.plain_storage::<T>()?.get(entity)
    }

    /// Mutable access to the ordinary component attached to `entity`.
    pub fn get_plain_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        self.plain_storage_mut::<T>()?.get_mut(entity)
    }

    /// Returns `true` if `entity` has an ordinary component of type `T`.
    pub fn plain_contains<T: Component>(&self, entity: Entity) -> bool {
        self.plain_storage::<T>()
            .is_some_and(|storage| storage.contains(entity))
    }

    // ── views ───────────────────────────────────────────────────────────

    /// Builds a view over the query `Q`.
    ///
    /// `Q` is a single view part or a tuple of parts; see
    /// [`ViewPart`](crate::engine::view::ViewPart) for the part types.
    /// Panics if two parts could alias mutably.
    pub fn view<Q: Query>(&mut self) -> View<'_, Q> {
        View::new(self)
    }

    pub(crate) fn poly_entities<U: Polymorphic>(&self) -> Vec<Entity> {
        self.poly_storage::<U>()
            .map(|storage| storage.entities())
            .unwrap_or_default()
    }

    pub(crate) fn plain_entities<T: Component>(&self) -> Vec<Entity> {
        self.plain_storage::<T>()
            .map(|storage| storage.entities())
            .unwrap_or_default()
    }
}

// ── fan-out entry points ────────────────────────────────────────────────

/// Adds a reference record to `P`'s storage for `entity`.
///
/// Called by descendant emplace fan-out through the parent links. Creates
/// the cell in the single-reference state or extends the existing cell's
/// list; never transitions a cell into owning a value.
pub(crate) fn fan_emplace_ref<P: Polymorphic>(
    registry: &mut Registry,
    entity: Entity,
    target: NonNull<u8>,
    deleter: Deleter,
) {
    let storage = registry.assure_poly::<P>();
    match storage.cell_mut(entity) {
        Some(cell) => cell.add_ref(PolyRef { target, deleter }),
        None => {
            storage.insert_cell(entity, PolyCell::with_ref(PolyRef { target, deleter }));
        }
    }
}

/// Removes the reference record targeting `target` from `P`'s storage.
///
/// Called by descendant erase fan-out; releases the cell when it empties.
pub(crate) fn fan_erase_ref<P: Polymorphic>(
    registry: &mut Registry,
    entity: Entity,
    target: NonNull<u8>,
) {
    let storage = registry.assure_poly::<P>();
    match storage.cell_mut(entity) {
        Some(cell) => {
            if cell.delete_ref(target.as_ptr()) {
                storage.release(entity);
            }
        }
        None => debug_assert!(false, "erase_ref on an entity without a cell"),
    }
}

/// Erases the owned `C` value on `entity` from its home storage.
///
/// This is the deleter stored in every reference record for `C` values: it
/// fans `erase_ref` into every parent storage (declared order), destroys the
/// value, and releases the cell if nothing remains.
pub(crate) fn erase_value_of<C: Polymorphic>(registry: &mut Registry, entity: Entity) {
    let Some(base) = registry
        .poly_storage::<C>()
        .and_then(|storage| storage.cell(entity))
        .filter(|cell| cell.holds_value())
        .map(|cell| cell.value_base().cast::<u8>())
    else {
        debug_assert!(false, "erase_value on an entity without an owned value");
        return;
    };

    for link in C::parents() {
        let target = unsafe { NonNull::new_unchecked(base.as_ptr().add(link.offset())) };
        link.call_erase(registry, entity, target);
    }

    let storage = registry.assure_poly::<C>();
    if let Some(cell) = storage.cell_mut(entity) {
        if cell.extract_value() {
            storage.release(entity);
        }
    }
}

fn remove_all_poly<U: Polymorphic>(registry: &mut Registry, entity: Entity) -> usize {
    registry.remove::<U>(entity)
}

fn remove_all_plain<T: Component>(registry: &mut Registry, entity: Entity) -> usize {
    registry.remove_plain::<T>(entity).is_some() as usize
}
