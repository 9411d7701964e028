//! Core identifiers, bit layouts, and layout constants.
//!
//! This module defines the **fundamental types and compile-time constants**
//! shared across the registry: the packed entity identifier layout and the
//! alignment contract the polymorphic container machinery relies on.
//!
//! ## Entity Representation
//!
//! Entities are encoded as a packed 64-bit integer:
//!
//! ```text
//! | version | index |
//! ```
//!
//! - **Index** identifies the entity slot in the allocator.
//! - **Version** is bumped on despawn and enables stale-handle detection.
//!
//! The exact bit widths are controlled by compile-time constants and validated
//! with static assertions.
//!
//! ## Alignment Contract
//!
//! Polymorphic component containers store two state flags in the low bits of
//! a pointer-sized word. That is only sound when every pointer that can land
//! in that word has its two low bits free, which is why every polymorphic
//! component type must have an alignment of at least [`MIN_POLY_ALIGN`]. The
//! [`polymorphic!`](crate::polymorphic) declaration macro forces this, and
//! storage acquisition re-checks it at compile time for hand-written
//! implementations.

/// Bit-width type used for compile-time layout calculations.
pub type Bits = u8;

/// Globally unique entity identifier encoded as a packed 64-bit value.
pub type EntityID = u64;
/// Index of an entity slot within the allocator.
pub type IndexID = u32;
/// Generation counter used to detect stale entities.
pub type VersionID = u32;

/// Total number of bits in an [`EntityID`].
pub const ENTITY_BITS: Bits = 64;
/// Number of bits reserved for entity versioning.
pub const VERSION_BITS: Bits = 32;
/// Number of bits reserved for the entity index.
pub const INDEX_BITS: Bits = ENTITY_BITS - VERSION_BITS;

const _: [(); 1] = [(); (VERSION_BITS < ENTITY_BITS) as usize];
const _: [(); 1] = [(); (INDEX_BITS > 0) as usize];
const _: [(); 1] = [(); (INDEX_BITS < ENTITY_BITS) as usize];

const fn mask(bits: Bits) -> EntityID {
    if bits == 0 {
        0
    } else {
        ((1 as EntityID) << bits) - 1
    }
}

/// Mask selecting the index portion of an [`EntityID`].
pub const INDEX_MASK: EntityID = mask(INDEX_BITS);
/// Maximum valid entity index.
pub const INDEX_CAP: IndexID = INDEX_MASK as IndexID;

/// Minimum alignment required of every polymorphic component type.
///
/// Two low bits of every pointer to a polymorphic value must be zero so the
/// container cell can use them as state flags.
pub const MIN_POLY_ALIGN: usize = 4;

const _: [(); 1] = [(); (MIN_POLY_ALIGN >= 4) as usize];
