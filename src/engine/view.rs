//! Typed view construction and execution.
//!
//! A view iterates the entities satisfying a query and hands the requested
//! component access to a caller-provided closure. A query is a single *view
//! part* or a tuple of parts:
//!
//! * `&T` / `&mut T` — ordinary component access.
//! * [`Poly<U>`] / [`PolyMut<U>`] — polymorphic access to the canonical
//!   value satisfying `U` (first match). As a *single-part* view these
//!   flatten: the closure runs once per matching value, so an entity with
//!   two descendants of `U` is visited twice.
//! * [`Every<U>`](crate::Every) / [`EveryMut<U>`](crate::EveryMut) — the
//!   lazy sequence of all values matching `U` on the entity.
//!
//! ## Execution model
//! The first part leads: its storage provides the candidate entities, every
//! part re-checks presence, and matching rows are yielded in turn. Component
//! mutation from inside the closure is fine; structural mutation is not
//! possible because the closure receives no registry access.
//!
//! ## Access discipline
//! The borrow checker cannot see through a view, so conflicts are checked at
//! view construction: a part that writes conflicts with any other part whose
//! hierarchy closure intersects its own (for plain parts the closure is just
//! the type itself). Conflicting views panic with the offending type names.
//! The check is conservative — writing through a sibling is rejected even
//! though sibling values never alias.

use std::any::{type_name, TypeId};
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::engine::entity::Entity;
use crate::engine::every::{Every, EveryMut};
use crate::engine::hierarchy::Polymorphic;
use crate::engine::registry::Registry;
use crate::engine::storage::Component;

/// Declared access of one view part, used for conflict validation.
pub struct PartAccess {
    /// Display name of the accessed component type.
    pub name: &'static str,

    /// The accessed type and, for polymorphic parts, its parent closure.
    pub ids: Vec<TypeId>,

    /// `true` when the part hands out mutable references.
    pub mutable: bool,
}

fn closure_ids<U: Polymorphic>() -> Vec<TypeId> {
    let mut ids = vec![TypeId::of::<U>()];
    ids.extend(U::parents().iter().map(|link| link.parent_id()));
    ids
}

/// One component slot of a view query.
///
/// Implemented for `&T`/`&mut T` (ordinary components), [`Poly`]/[`PolyMut`]
/// and the [`Every`]/[`EveryMut`] sequence markers.
pub trait ViewPart {
    /// What the closure receives for this part.
    type Item<'w>;

    /// Declared access, for conflict validation.
    fn access() -> PartAccess;

    /// Returns `true` if `entity` satisfies this part.
    fn contains(registry: &Registry, entity: Entity) -> bool;

    /// Candidate entities when this part leads the view.
    fn lead(registry: &Registry) -> Vec<Entity>;

    /// Produces the item for a matching entity.
    ///
    /// ## Safety
    /// The caller must have validated part accesses against one another,
    /// hold exclusive access to the registry for `'w`, and only call this
    /// for entities that satisfy the part.
    unsafe fn fetch<'w>(registry: *mut Registry, entity: Entity) -> Self::Item<'w>;

    /// Single-part iteration. Polymorphic single parts override this to
    /// flatten (one row per matching value).
    ///
    /// ## Safety
    /// As for [`fetch`](Self::fetch).
    unsafe fn each_flat<'w, F: FnMut(Entity, Self::Item<'w>)>(registry: *mut Registry, f: &mut F) {
        let lead = Self::lead(unsafe { &*registry });
        for entity in lead {
            unsafe {
                if !Self::contains(&*registry, entity) {
                    continue;
                }
                f(entity, Self::fetch(registry, entity));
            }
        }
    }
}

impl<T: Component> ViewPart for &'static T {
    type Item<'w> = &'w T;

    fn access() -> PartAccess {
        PartAccess {
            name: type_name::<T>(),
            ids: vec![TypeId::of::<T>()],
            mutable: false,
        }
    }

    fn contains(registry: &Registry, entity: Entity) -> bool {
        registry.plain_contains::<T>(entity)
    }

    fn lead(registry: &Registry) -> Vec<Entity> {
        registry.plain_entities::<T>()
    }

    unsafe fn fetch<'w>(registry: *mut Registry, entity: Entity) -> Self::Item<'w> {
        let storage = unsafe { (*registry).plain_storage_ptr::<T>() }
            .expect("view fetched from a missing storage");
        unsafe { (*storage.as_ptr()).get(entity) }.expect("view fetched an absent component")
    }
}

impl<T: Component> ViewPart for &'static mut T {
    type Item<'w> = &'w mut T;

    fn access() -> PartAccess {
        PartAccess {
            name: type_name::<T>(),
            ids: vec![TypeId::of::<T>()],
            mutable: true,
        }
    }

    fn contains(registry: &Registry, entity: Entity) -> bool {
        registry.plain_contains::<T>(entity)
    }

    fn lead(registry: &Registry) -> Vec<Entity> {
        registry.plain_entities::<T>()
    }

    unsafe fn fetch<'w>(registry: *mut Registry, entity: Entity) -> Self::Item<'w> {
        let storage = unsafe { (*registry).plain_storage_ptr::<T>() }
            .expect("view fetched from a missing storage");
        unsafe { (*storage.as_ptr()).get_mut(entity) }.expect("view fetched an absent component")
    }
}

/// Shared polymorphic single-value view part.
///
/// Yields `&U` for the canonical value satisfying `U`. In a single-part view
/// this flattens to one row per matching value.
pub struct Poly<U>(PhantomData<U>);

impl<U: Polymorphic> ViewPart for Poly<U> {
    type Item<'w> = &'w U;

    fn access() -> PartAccess {
        PartAccess {
            name: type_name::<U>(),
            ids: closure_ids::<U>(),
            mutable: false,
        }
    }

    fn contains(registry: &Registry, entity: Entity) -> bool {
        registry.contains::<U>(entity)
    }

    fn lead(registry: &Registry) -> Vec<Entity> {
        registry.poly_entities::<U>()
    }

    unsafe fn fetch<'w>(registry: *mut Registry, entity: Entity) -> Self::Item<'w> {
        let storage = unsafe { (*registry).poly_storage_ptr::<U>() }
            .expect("view fetched from a missing storage");
        let cell = unsafe { (*storage.as_ptr()).cell(entity) }
            .expect("view fetched an absent component");
        unsafe { &*cell.ref_value_ptr() }
    }

    unsafe fn each_flat<'w, F: FnMut(Entity, Self::Item<'w>)>(registry: *mut Registry, f: &mut F) {
        let lead = Self::lead(unsafe { &*registry });
        for entity in lead {
            let targets: Vec<NonNull<U>> =
                unsafe { (*registry).every::<U>(entity) }.raw_targets().collect();
            for target in targets {
                f(entity, unsafe { &*target.as_ptr() });
            }
        }
    }
}

/// Mutable polymorphic single-value view part.
///
/// Yields `&mut U`; conflicts with any other part overlapping `U`'s
/// hierarchy closure.
pub struct PolyMut<U>(PhantomData<U>);

impl<U: Polymorphic> ViewPart for PolyMut<U> {
    type Item<'w> = &'w mut U;

    fn access() -> PartAccess {
        PartAccess {
            name: type_name::<U>(),
            ids: closure_ids::<U>(),
            mutable: true,
        }
    }

    fn contains(registry: &Registry, entity: Entity) -> bool {
        registry.contains::<U>(entity)
    }

    fn lead(registry: &Registry) -> Vec<Entity> {
        registry.poly_entities::<U>()
    }

    unsafe fn fetch<'w>(registry: *mut Registry, entity: Entity) -> Self::Item<'w> {
        let storage = unsafe { (*registry).poly_storage_ptr::<U>() }
            .expect("view fetched from a missing storage");
        let cell = unsafe { (*storage.as_ptr()).cell(entity) }
            .expect("view fetched an absent component");
        unsafe { &mut *cell.ref_value_ptr() }
    }

    unsafe fn each_flat<'w, F: FnMut(Entity, Self::Item<'w>)>(registry: *mut Registry, f: &mut F) {
        let lead = Self::lead(unsafe { &*registry });
        for entity in lead {
            let targets: Vec<NonNull<U>> =
                unsafe { (*registry).every::<U>(entity) }.raw_targets().collect();
            for target in targets {
                f(entity, unsafe { &mut *target.as_ptr() });
            }
        }
    }
}

impl<U: Polymorphic> ViewPart for Every<'static, U> {
    type Item<'w> = Every<'w, U>;

    fn access() -> PartAccess {
        PartAccess {
            name: type_name::<U>(),
            ids: closure_ids::<U>(),
            mutable: false,
        }
    }

    fn contains(registry: &Registry, entity: Entity) -> bool {
        registry.contains::<U>(entity)
    }

    fn lead(registry: &Registry) -> Vec<Entity> {
        registry.poly_entities::<U>()
    }

    unsafe fn fetch<'w>(registry: *mut Registry, entity: Entity) -> Self::Item<'w> {
        unsafe { (*registry).every::<U>(entity).detach() }
    }
}

impl<U: Polymorphic> ViewPart for EveryMut<'static, U> {
    type Item<'w> = EveryMut<'w, U>;

    fn access() -> PartAccess {
        PartAccess {
            name: type_name::<U>(),
            ids: closure_ids::<U>(),
            mutable: true,
        }
    }

    fn contains(registry: &Registry, entity: Entity) -> bool {
        registry.contains::<U>(entity)
    }

    fn lead(registry: &Registry) -> Vec<Entity> {
        registry.poly_entities::<U>()
    }

    unsafe fn fetch<'w>(registry: *mut Registry, entity: Entity) -> Self::Item<'w> {
        unsafe { (*registry).every_mut::<U>(entity).detach() }
    }
}

/// A complete view query: one part or a tuple of parts.
pub trait Query {
    /// What the closure receives per row.
    type Item<'w>;

    /// Collects the access declarations of every part.
    fn accesses(out: &mut Vec<PartAccess>);

    /// Runs the view.
    ///
    /// ## Safety
    /// The caller must hold exclusive registry access for `'w` and have
    /// validated the collected accesses with [`validate_accesses`].
    unsafe fn run<'w, F: FnMut(Entity, Self::Item<'w>)>(registry: *mut Registry, f: &mut F);
}

/// Single-part queries delegate to the part, so `view::<Poly<U>>()` works
/// without tuple wrapping (and keeps the flattening semantics of
/// `each_flat`).
macro_rules! impl_query_single {
    ($(<$param:ident: $bound:ident> $part:ty;)+) => {
        $(
            impl<$param: $bound> Query for $part {
                type Item<'w> = <$part as ViewPart>::Item<'w>;

                fn accesses(out: &mut Vec<PartAccess>) {
                    out.push(<$part as ViewPart>::access());
                }

                unsafe fn run<'w, F: FnMut(Entity, Self::Item<'w>)>(
                    registry: *mut Registry,
                    f: &mut F,
                ) {
                    unsafe { <$part as ViewPart>::each_flat(registry, f) }
                }
            }
        )+
    };
}

impl_query_single! {
    <T: Component> &'static T;
    <T: Component> &'static mut T;
    <U: Polymorphic> Poly<U>;
    <U: Polymorphic> PolyMut<U>;
    <U: Polymorphic> Every<'static, U>;
    <U: Polymorphic> EveryMut<'static, U>;
}

macro_rules! impl_query_tuple {
    ($first:ident $(, $rest:ident)+) => {
        impl<$first: ViewPart, $($rest: ViewPart,)+> Query for ($first, $($rest,)+) {
            type Item<'w> = ($first::Item<'w>, $($rest::Item<'w>,)+);

            fn accesses(out: &mut Vec<PartAccess>) {
                out.push($first::access());
                $(out.push($rest::access());)+
            }

            unsafe fn run<'w, F: FnMut(Entity, Self::Item<'w>)>(
                registry: *mut Registry,
                f: &mut F,
            ) {
                let lead = $first::lead(unsafe { &*registry });
                for entity in lead {
                    unsafe {
                        if !$first::contains(&*registry, entity) {
                            continue;
                        }
                        $(
                            if !$rest::contains(&*registry, entity) {
                                continue;
                            }
                        )+
                        f(entity, (
                            $first::fetch(registry, entity),
                            $($rest::fetch(registry, entity),)+
                        ));
                    }
                }
            }
        }
    };
}

impl_query_tuple!(A, B);
impl_query_tuple!(A, B, C);
impl_query_tuple!(A, B, C, D);
impl_query_tuple!(A, B, C, D, E);
impl_query_tuple!(A, B, C, D, E, F2);

/// Panics when two parts could alias mutably.
///
/// Two parts conflict when at least one writes and their id sets intersect.
pub fn validate_accesses(accesses: &[PartAccess]) {
    for i in 0..accesses.len() {
        for j in (i + 1)..accesses.len() {
            let (a, b) = (&accesses[i], &accesses[j]);
            if !(a.mutable || b.mutable) {
                continue;
            }
            if a.ids.iter().any(|id| b.ids.contains(id)) {
                panic!(
                    "view parts {} and {} could alias mutably; split the view or drop to shared access",
                    a.name, b.name
                );
            }
        }
    }
}

/// An executable view over the query `Q`.
///
/// Produced by [`Registry::view`]; consumed by [`each`](View::each).
pub struct View<'r, Q: Query> {
    registry: &'r mut Registry,
    _query: PhantomData<Q>,
}

impl<'r, Q: Query> View<'r, Q> {
    /// Builds the view, validating part accesses.
    ///
    /// ## Panics
    /// Panics when two parts could alias mutably.
    pub(crate) fn new(registry: &'r mut Registry) -> Self {
        let mut accesses = Vec::new();
        Q::accesses(&mut accesses);
        validate_accesses(&accesses);
        Self {
            registry,
            _query: PhantomData,
        }
    }

    /// Invokes `f` for every matching row.
    pub fn each<F: FnMut(Entity, Q::Item<'r>)>(self, mut f: F) {
        let registry: *mut Registry = self.registry;
        unsafe { Q::run(registry, &mut f) }
    }
}
