//! Entity identity and lifecycle.
//!
//! Entities are lightweight, opaque identifiers that components are attached
//! to. This module is responsible for:
//!
//! - Generating stable entity identifiers
//! - Tracking entity liveness via versioning
//! - Recycling entity slots through a free list
//!
//! ## Entity Model
//! An [`Entity`] is a compact, versioned handle composed of:
//!
//! - An **index**, identifying the slot within the allocator
//! - A **version**, used to detect stale or recycled entities
//!
//! This layout allows fast validation and prevents use-after-free bugs when
//! entities are destroyed and their slots reused.
//!
//! ## Invariants
//! - An entity is alive if and only if its version matches the version stored
//!   in its slot and the slot is marked alive.
//! - Destroying an entity invalidates all previously issued handles to it.
//!
//! ## Concurrency
//! The allocator is **not thread-safe**; the owning registry is a
//! single-threaded structure and provides no synchronization.

use crate::engine::types::{EntityID, IndexID, VersionID, INDEX_BITS, INDEX_CAP, INDEX_MASK};

/// Opaque, versioned identifier for an entity.
///
/// ## Representation
/// Internally, an `Entity` packs two values into a single integer:
///
/// - **Index** — slot within the allocator
/// - **Version** — incremented on destroy to invalidate stale handles
///
/// ## Invariants
/// Two entities with the same index but different versions are distinct.
///
/// ## Notes
/// `Entity` values are cheap to copy, compare, and hash.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Entity(pub EntityID);

#[inline]
const fn make_id(index: IndexID, version: VersionID) -> EntityID {
    ((version as EntityID) << INDEX_BITS) | (index as EntityID)
}

#[inline]
fn make_entity(index: IndexID, version: VersionID) -> Entity {
    debug_assert!((index as EntityID) <= INDEX_MASK);
    Entity(make_id(index, version))
}

#[inline]
const fn split_entity(entity: Entity) -> (IndexID, VersionID) {
    let id = entity.0;
    let index = (id & INDEX_MASK) as IndexID;
    let version = (id >> INDEX_BITS) as VersionID;
    (index, version)
}

impl Entity {
    /// Returns the index component of this entity.
    #[inline]
    pub fn index(self) -> IndexID {
        (self.0 & INDEX_MASK) as IndexID
    }

    /// Returns the version component of this entity.
    #[inline]
    pub fn version(self) -> VersionID {
        (self.0 >> INDEX_BITS) as VersionID
    }
}

/// Entity slot allocator.
///
/// ## Design
/// - Entities are allocated from a free list of indices, growing storage when
///   the free list is exhausted.
/// - Versions are incremented on destroy to invalidate stale handles.
///
/// ## Invariants
/// - `versions.len() == alive.len()`.
/// - Free indices always refer to dead entity slots.
#[derive(Default)]
pub struct Entities {
    versions: Vec<VersionID>,
    alive: Vec<bool>,
    free_store: Vec<IndexID>,
}

impl Entities {
    /// Creates an empty entity allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new entity slot.
    ///
    /// ## Behavior
    /// - Reuses a free slot if available, otherwise grows storage.
    /// - The version is unchanged from the previous occupant of the slot, so
    ///   handles destroyed earlier stay invalid.
    ///
    /// ## Panics
    /// Panics if the index space is exhausted.
    pub fn spawn(&mut self) -> Entity {
        let index = if let Some(index) = self.free_store.pop() {
            index
        } else {
            let index = self.versions.len();
            assert!(index <= INDEX_CAP as usize, "entity index space exhausted");
            self.versions.push(0);
            self.alive.push(false);
            index as IndexID
        };

        let version = self.versions[index as usize];
        self.alive[index as usize] = true;
        make_entity(index, version)
    }

    /// Destroys an entity slot and invalidates its handle.
    ///
    /// ## Returns
    /// `true` if the entity was alive and was despawned, `false` if the
    /// handle was stale or invalid.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        let (index, version) = split_entity(entity);
        match self.versions.get_mut(index as usize) {
            Some(live) if *live == version && self.alive[index as usize] => {
                *live = live.wrapping_add(1);
                self.alive[index as usize] = false;
                self.free_store.push(index);
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if the entity is alive and not stale.
    pub fn is_alive(&self, entity: Entity) -> bool {
        let (index, version) = split_entity(entity);
        let index = index as usize;
        index < self.versions.len() && self.alive[index] && self.versions[index] == version
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.versions.len() - self.free_store.len()
    }

    /// Returns `true` if no entity is alive.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
