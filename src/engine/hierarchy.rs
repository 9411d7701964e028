//! Polymorphic component hierarchy metadata.
//!
//! A polymorphic component declares parent component types; a value attached
//! under the concrete type is then queryable under every ancestor. Rust has
//! no struct inheritance, so the hierarchy is declared by **composition**:
//! the [`polymorphic!`](crate::polymorphic) macro places each parent as a
//! leading named field of the component struct and records the field offsets.
//! Casting a concrete value to one of its ancestors is then plain offset
//! arithmetic, and offsets compose by addition across hierarchy levels.
//!
//! ## Metadata model
//! For each polymorphic type the trait exposes:
//!
//! - `direct_parents()` — the declared parent links, in declaration order.
//! - `parents()` — the flattened transitive closure: direct parents first,
//!   then each direct parent's own closure rebased by the embedding offset,
//!   de-duplicated by `TypeId` keeping the first occurrence.
//! - `dedup_changed()` — diagnostic flag reporting whether de-duplication
//!   removed entries. Duplicates arise from diamond reconvergence (or from
//!   listing the same parent twice); only the first occurrence receives
//!   hierarchy references.
//!
//! Each [`ParentLink`] also carries monomorphized fan-out entry points bound
//! to the parent type, so walking the closure needs no type dispatch at
//! runtime.
//!
//! ## Alignment
//! The macro gives every declared component `#[repr(C, align(4))]`: `repr(C)`
//! puts parent subobjects at stable offsets (the first parent at offset
//! zero), and the alignment keeps the two low bits of every value pointer
//! free for the container's state flags.

use std::any::{type_name, TypeId};
use std::ptr::NonNull;

use log::warn;

use crate::engine::entity::Entity;
use crate::engine::ref_list::Deleter;
use crate::engine::registry::{self, Registry};

/// Compile-time-declared polymorphic component.
///
/// Implemented by the [`polymorphic!`](crate::polymorphic) macro; a manual
/// implementation must uphold the same contract: parent links report valid
/// subobject offsets, and the type's alignment is at least
/// [`MIN_POLY_ALIGN`](crate::engine::types::MIN_POLY_ALIGN).
///
/// A *root* is a polymorphic type with no direct parents.
pub trait Polymorphic: Sized + 'static {
    /// Declared parent links, in declaration order.
    fn direct_parents() -> &'static [ParentLink];

    /// The cached transitive parent closure of this type.
    fn closure() -> &'static ParentClosure;

    /// Flattened, de-duplicated transitive parents, in fan-out order.
    fn parents() -> &'static [ParentLink] {
        &Self::closure().links
    }

    /// Diagnostic: `true` iff de-duplication changed the closure.
    fn dedup_changed() -> bool {
        Self::closure().dedup_changed
    }
}

/// One edge of a flattened parent closure.
///
/// Links a concrete component type to one of its (possibly transitive)
/// parents: the parent's identity, the byte offset of the parent subobject
/// inside the concrete type, and the fan-out operations bound to the parent's
/// storage.
#[derive(Clone, Copy)]
pub struct ParentLink {
    parent: TypeId,
    parent_name: &'static str,
    offset: usize,
    emplace_ref: fn(&mut Registry, Entity, NonNull<u8>, Deleter),
    erase_ref: fn(&mut Registry, Entity, NonNull<u8>),
}

impl ParentLink {
    /// Builds the link for a directly embedded parent at `offset`.
    pub fn direct<P: Polymorphic>(offset: usize) -> Self {
        Self {
            parent: TypeId::of::<P>(),
            parent_name: type_name::<P>(),
            offset,
            emplace_ref: registry::fan_emplace_ref::<P>,
            erase_ref: registry::fan_erase_ref::<P>,
        }
    }

    /// The same link, shifted by the offset of the embedding subobject.
    pub fn rebased(&self, base: usize) -> Self {
        let mut link = *self;
        link.offset += base;
        link
    }

    /// `TypeId` of the parent component type.
    #[inline]
    pub fn parent_id(&self) -> TypeId {
        self.parent
    }

    /// Type name of the parent component type.
    #[inline]
    pub fn parent_name(&self) -> &'static str {
        self.parent_name
    }

    /// Byte offset of the parent subobject inside the concrete type.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Adds a reference record for `target` to the parent's storage.
    #[inline]
    pub(crate) fn call_emplace(
        &self,
        registry: &mut Registry,
        entity: Entity,
        target: NonNull<u8>,
        deleter: Deleter,
    ) {
        (self.emplace_ref)(registry, entity, target, deleter);
    }

    /// Removes the reference record for `target` from the parent's storage.
    #[inline]
    pub(crate) fn call_erase(&self, registry: &mut Registry, entity: Entity, target: NonNull<u8>) {
        (self.erase_ref)(registry, entity, target);
    }
}

/// Cached transitive parent closure of a polymorphic type.
pub struct ParentClosure {
    /// Flattened parent links in fan-out order.
    pub links: Vec<ParentLink>,

    /// `true` iff de-duplication removed entries from the raw concatenation.
    pub dedup_changed: bool,
}

/// De-duplicates a raw closure, keeping first occurrences.
///
/// Used by the [`polymorphic!`](crate::polymorphic) macro after concatenating
/// the direct parents with each direct parent's rebased closure. A changed
/// list is the diamond-reconvergence (or duplicate-parent) diagnostic and is
/// logged once per type.
pub fn finish_closure(type_name: &str, mut links: Vec<ParentLink>) -> ParentClosure {
    let before = links.len();
    let mut seen: Vec<TypeId> = Vec::with_capacity(links.len());
    links.retain(|link| {
        if seen.contains(&link.parent) {
            false
        } else {
            seen.push(link.parent);
            true
        }
    });
    let dedup_changed = links.len() != before;
    if dedup_changed {
        warn!("parent closure of {type_name} contained duplicates; keeping first occurrences");
    }
    ParentClosure {
        links,
        dedup_changed,
    }
}

/// Returns `true` if `P` is `C` itself or appears in `C`'s parent closure.
pub fn is_same_or_parent_of<P: Polymorphic, C: Polymorphic>() -> bool {
    TypeId::of::<P>() == TypeId::of::<C>()
        || C::parents()
            .iter()
            .any(|link| link.parent_id() == TypeId::of::<P>())
}

/// Declares a polymorphic component type.
///
/// Two forms are accepted. A *root* component declares no parents:
///
/// ```
/// use polymorph_ecs::polymorphic;
///
/// polymorphic! {
///     /// Base marker every damageable component inherits from.
///     #[derive(Debug, Default)]
///     pub struct Damageable {
///         pub hit_points: i32,
///     }
/// }
/// ```
///
/// A derived component lists `field: ParentType` pairs; the parents become
/// the leading fields of the generated struct, and all listed types must be
/// polymorphic themselves:
///
/// ```
/// use polymorph_ecs::polymorphic;
///
/// polymorphic! {
///     #[derive(Debug, Default)]
///     pub struct Armor {
///         pub rating: u32,
///     }
/// }
/// # polymorphic! {
/// #     #[derive(Debug, Default)]
/// #     pub struct Damageable { pub hit_points: i32, }
/// # }
///
/// polymorphic! {
///     #[derive(Debug, Default)]
///     pub struct ArmoredHull: inherit(damageable: Damageable, armor: Armor) {
///         pub plating: u8,
///     }
/// }
/// ```
///
/// The macro emits `#[repr(C, align(4))]`, implements
/// [`Polymorphic`](crate::Polymorphic), and caches the flattened parent
/// closure on first use. Parent fields are public: a derived component is
/// constructed like any plain struct, parents included.
#[macro_export]
macro_rules! polymorphic {
    // Root component: no parents.
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $($(#[$fmeta:meta])* $fvis:vis $field:ident : $fty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(C, align(4))]
        $vis struct $name {
            $($(#[$fmeta])* $fvis $field : $fty,)*
        }

        impl $crate::engine::hierarchy::Polymorphic for $name {
            fn direct_parents() -> &'static [$crate::engine::hierarchy::ParentLink] {
                &[]
            }

            fn closure() -> &'static $crate::engine::hierarchy::ParentClosure {
                static CLOSURE: ::std::sync::OnceLock<$crate::engine::hierarchy::ParentClosure> =
                    ::std::sync::OnceLock::new();
                CLOSURE.get_or_init(|| {
                    $crate::engine::hierarchy::finish_closure(
                        ::std::any::type_name::<$name>(),
                        ::std::vec::Vec::new(),
                    )
                })
            }
        }
    };
    // Derived component: parent subobjects become the leading fields.
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident : inherit( $($pfield:ident : $parent:ty),+ $(,)? ) {
            $($(#[$fmeta:meta])* $fvis:vis $field:ident : $fty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(C, align(4))]
        $vis struct $name {
            $(pub $pfield : $parent,)+
            $($(#[$fmeta])* $fvis $field : $fty,)*
        }

        impl $crate::engine::hierarchy::Polymorphic for $name {
            fn direct_parents() -> &'static [$crate::engine::hierarchy::ParentLink] {
                static DIRECT: ::std::sync::OnceLock<
                    ::std::vec::Vec<$crate::engine::hierarchy::ParentLink>,
                > = ::std::sync::OnceLock::new();
                DIRECT.get_or_init(|| {
                    ::std::vec![
                        $($crate::engine::hierarchy::ParentLink::direct::<$parent>(
                            ::std::mem::offset_of!($name, $pfield)
                        ),)+
                    ]
                })
            }

            fn closure() -> &'static $crate::engine::hierarchy::ParentClosure {
                static CLOSURE: ::std::sync::OnceLock<$crate::engine::hierarchy::ParentClosure> =
                    ::std::sync::OnceLock::new();
                CLOSURE.get_or_init(|| {
                    let mut links =
                        <$name as $crate::engine::hierarchy::Polymorphic>::direct_parents()
                            .to_vec();
                    $(
                        let base = ::std::mem::offset_of!($name, $pfield);
                        for link in <$parent as $crate::engine::hierarchy::Polymorphic>::parents() {
                            links.push(link.rebased(base));
                        }
                    )+
                    $crate::engine::hierarchy::finish_closure(
                        ::std::any::type_name::<$name>(),
                        links,
                    )
                })
            }
        }
    };
}
