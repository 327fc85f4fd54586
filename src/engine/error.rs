//! Error types for registration, storage, and entity access.
//!
//! This module declares focused, composable error types used across the
//! component registry, the columnar storage layer, and the world directory.
//! Each error carries enough context to make failures actionable while
//! remaining small and cheap to pass around or convert into the aggregate
//! [`EcsError`].
//!
//! ## Goals
//! * **Specificity:** Each error type models a single failure mode (ID-space
//!   exhaustion, unregistered component use, stale entity handles, column
//!   misuse).
//! * **Ergonomics:** All errors implement [`std::error::Error`] and
//!   [`fmt::Display`], and provide `From<T>` conversions into [`EcsError`]
//!   so call sites can use `?`.
//! * **Fail fast:** Every failure is local and synchronous at the operation
//!   that triggered it; nothing is retried or masked.
//!
//! ## Display vs. Debug
//! * [`fmt::Display`] is optimized for operator logs (short, imperative
//!   phrasing).
//! * [`fmt::Debug`] (derived) retains full structure for diagnostics.

use std::fmt;

use crate::engine::types::{EntityID, SlotID};

/// Errors raised by the process-wide component registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// More distinct component types were registered than the fixed ID
    /// space supports.
    CapacityExceeded {
        /// The fixed width of the component ID space.
        capacity: usize,
    },

    /// A component type was used before `register_component` was called
    /// for it.
    NotRegistered {
        /// Rust type name of the offending component.
        name: &'static str,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::CapacityExceeded { capacity } => {
                write!(f, "component ID space exhausted (capacity {})", capacity)
            }
            RegistryError::NotRegistered { name } => {
                write!(f, "component type not registered: {}", name)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Errors raised by the type-erased column storage seam.
///
/// These indicate internal misuse of the columnar layer (a buffer addressed
/// out of bounds, or a cross-buffer move between different element types)
/// rather than recoverable user-facing conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// A cross-buffer operation paired columns of different element types.
    TypeMismatch {
        /// Element type the operation expected.
        expected: &'static str,
        /// Element type actually found.
        actual: &'static str,
    },

    /// A slot index addressed storage outside its grown capacity.
    SlotOutOfBounds {
        /// The offending slot index.
        slot: SlotID,
        /// Current capacity of the column.
        capacity: usize,
    },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::TypeMismatch { expected, actual } => {
                write!(f, "column type mismatch: expected {}, actual {}", expected, actual)
            }
            StorageError::SlotOutOfBounds { slot, capacity } => {
                write!(f, "slot {} out of bounds (column capacity {})", slot, capacity)
            }
        }
    }
}

impl std::error::Error for StorageError {}

/// Aggregate error for world and query operations.
///
/// Low-level registry and storage failures convert into this type via
/// `From`, so orchestration code can bubble everything with `?` while
/// callers still match on the precise failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// A component registry operation failed.
    Registry(RegistryError),

    /// A columnar storage operation failed.
    Storage(StorageError),

    /// An entity handle whose generation no longer matches the directory's
    /// live record (destroyed and reused, or never allocated).
    StaleEntity {
        /// The stale handle.
        id: EntityID,
    },

    /// A zero-size tag component was used where a stored value is required.
    TagAccess {
        /// Rust type name of the tag component.
        name: &'static str,
    },

    /// A component type was requested from a query that was not built
    /// with it.
    ComponentNotInQuery {
        /// Rust type name of the missing component.
        name: &'static str,
    },

    /// An entity's current signature does not include the requested
    /// component.
    MissingComponent {
        /// Rust type name of the absent component.
        name: &'static str,
    },

    /// An internal consistency invariant was violated.
    Internal(&'static str),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::Registry(e) => write!(f, "{e}"),
            EcsError::Storage(e) => write!(f, "{e}"),
            EcsError::StaleEntity { id } => {
                write!(f, "stale or invalid entity handle {:#x}", id)
            }
            EcsError::TagAccess { name } => {
                write!(f, "tag component {} has no stored value", name)
            }
            EcsError::ComponentNotInQuery { name } => {
                write!(f, "component {} is not part of this query", name)
            }
            EcsError::MissingComponent { name } => {
                write!(f, "entity does not carry component {}", name)
            }
            EcsError::Internal(what) => write!(f, "internal invariant violated: {}", what),
        }
    }
}

impl std::error::Error for EcsError {}

impl From<RegistryError> for EcsError {
    fn from(e: RegistryError) -> Self { EcsError::Registry(e) }
}

impl From<StorageError> for EcsError {
    fn from(e: StorageError) -> Self { EcsError::Storage(e) }
}

/// Convenience alias for results carrying [`EcsError`].
pub type EcsResult<T> = Result<T, EcsError>;
