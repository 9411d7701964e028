//! # polymorph-ecs
//!
//! Entity-component registry with **polymorphic components**: a component
//! type may declare parent component types, and a value attached under the
//! concrete type becomes queryable under every ancestor in its hierarchy.
//! Multiple components on one entity sharing an ancestor are all visible
//! under that ancestor's type.
//!
//! ## Design Goals
//! - One cheap fixed-size cell per (entity, type), tag bits in a pointer
//! - No allocation for single values or single references
//! - Stable value addresses for the whole component lifetime
//! - Flattened parent closures: fan-out touches each ancestor exactly once
//!
//! ## Quick tour
//! ```
//! use polymorph_ecs::{polymorphic, Every, Registry};
//!
//! polymorphic! {
//!     #[derive(Debug)]
//!     pub struct Drawable { pub layer: i32, }
//! }
//!
//! polymorphic! {
//!     #[derive(Debug)]
//!     pub struct Sprite: inherit(drawable: Drawable) { pub frame: u32, }
//! }
//!
//! polymorphic! {
//!     #[derive(Debug)]
//!     pub struct Text: inherit(drawable: Drawable) { pub glyphs: u32, }
//! }
//!
//! let mut registry = Registry::new();
//! let entity = registry.create();
//! registry.emplace(entity, Sprite { drawable: Drawable { layer: 1 }, frame: 0 }).unwrap();
//! registry.emplace(entity, Text { drawable: Drawable { layer: 2 }, glyphs: 12 }).unwrap();
//!
//! // Both concrete values are visible under the shared parent.
//! assert_eq!(registry.every::<Drawable>(entity).len(), 2);
//!
//! let mut layers: Vec<i32> = Vec::new();
//! registry.view::<Every<Drawable>>().each(|_, drawables| {
//!     layers.extend(drawables.iter().map(|d| d.layer));
//! });
//! layers.sort_unstable();
//! assert_eq!(layers, [1, 2]);
//!
//! // Removing by the parent type cascades into both concrete storages.
//! assert_eq!(registry.remove::<Drawable>(entity), 1);
//! assert!(registry.try_get::<Sprite>(entity).is_none());
//! assert!(registry.try_get::<Text>(entity).is_none());
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![deny(dead_code)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use engine::entity::Entity;
pub use engine::registry::Registry;

pub use engine::hierarchy::{is_same_or_parent_of, ParentClosure, ParentLink, Polymorphic};

pub use engine::every::{Every, EveryIter, EveryIterMut, EveryMut};

pub use engine::storage::Component;

pub use engine::view::{Poly, PolyMut, Query, View, ViewPart};

pub use engine::error::{DuplicateValueError, EmplaceError, StaleEntityError};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used registry types.
///
/// Import with:
/// ```rust
/// use polymorph_ecs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        polymorphic, Component, Entity, Every, EveryMut, Poly, PolyMut, Polymorphic, Registry,
    };
}
