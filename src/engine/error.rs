//! Error types for component attachment and entity lifecycle.
//!
//! This module declares focused, composable error types used across the
//! registry surface. Each error carries enough context to make failures
//! actionable while remaining small and cheap to pass around or convert into
//! the aggregate [`EmplaceError`].
//!
//! ## Goals
//! * **Specificity:** Each error type models a single failure mode (e.g. a
//!   duplicate concrete value, a stale entity handle).
//! * **Ergonomics:** All errors implement [`std::error::Error`] and
//!   [`fmt::Display`], and provide `From<T>` conversions into aggregate
//!   variants.
//! * **Actionability:** Structured fields (offending entity, component type
//!   name) make logs useful without reproducing the issue.
//!
//! ## What is *not* an error type
//! Internal invariant violations (container state machine preconditions,
//! page-ownership mismatches in the reference-list pool) are programmer
//! errors. They are asserted, not surfaced, so no recoverable variants exist
//! for them here. Allocation failure aborts through the global allocation
//! error hook, as is conventional for infallible collection growth.
//!
//! ## Display vs. Debug
//! * [`fmt::Display`] is optimized for operator logs (short, imperative
//!   phrasing).
//! * [`fmt::Debug`] (derived) retains full structure for diagnostics.

use std::fmt;

use crate::engine::entity::Entity;

/// Returned when a concrete polymorphic value is emplaced on an entity that
/// already owns a value of that exact type.
///
/// The existing value is left untouched; the rejected value is dropped.
///
/// ### Fields
/// * `entity` — The entity that already owns the component.
/// * `component` — Type name of the duplicated component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateValueError {
    /// Entity that already owns a value of this component type.
    pub entity: Entity,

    /// Type name of the duplicated component.
    pub component: &'static str,
}

impl fmt::Display for DuplicateValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entity {:?} already owns a value of component {}",
            self.entity, self.component
        )
    }
}

impl std::error::Error for DuplicateValueError {}

/// Returned when an `Entity` handle is no longer valid, typically because it
/// was destroyed and its version no longer matches live storage.
///
/// Use this to prevent use-after-free style logic errors at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleEntityError;

impl fmt::Display for StaleEntityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("stale or dead entity reference")
    }
}

impl std::error::Error for StaleEntityError {}

/// Aggregate error for component attachment.
///
/// Wraps the failure modes of [`Registry::emplace`](crate::Registry::emplace)
/// and [`Registry::insert`](crate::Registry::insert). `From<T>` conversions
/// are implemented for the underlying errors so internal code can use `?` and
/// still return a single, expressive type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmplaceError {
    /// The entity already owns a value of the exact component type.
    Duplicate(DuplicateValueError),

    /// The entity handle was stale or referred to a destroyed entity.
    StaleEntity(StaleEntityError),
}

impl fmt::Display for EmplaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmplaceError::Duplicate(e) => write!(f, "{e}"),
            EmplaceError::StaleEntity(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EmplaceError {}

impl From<DuplicateValueError> for EmplaceError {
    fn from(e: DuplicateValueError) -> Self {
        EmplaceError::Duplicate(e)
    }
}

impl From<StaleEntityError> for EmplaceError {
    fn from(e: StaleEntityError) -> Self {
        EmplaceError::StaleEntity(e)
    }
}
