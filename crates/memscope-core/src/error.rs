//! Domain-specific error types following panic-free policy.

use crate::WatchHandle;
use thiserror::Error;

/// Errors that can occur while mutating a watch tree.
///
/// Every variant describes a request that would break the tree's
/// handle-map / parent-link invariant; the tree is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Handle 0 addresses the root set and can never name a node
    #[error("Handle 0 is reserved for the root set")]
    ReservedHandle,

    /// A node with this handle is already in the tree
    #[error("Watch handle already in use: {handle}")]
    DuplicateHandle { handle: WatchHandle },

    /// The requested parent category does not exist
    #[error("Parent category not found: {parent}")]
    ParentNotFound { parent: WatchHandle },

    /// The requested parent exists but is a memory watch (a leaf)
    #[error("Parent {parent} is a memory watch and cannot hold children")]
    ParentNotCategory { parent: WatchHandle },

    /// Inserting below this parent would exceed the nesting limit
    #[error("Category {parent} is nested too deeply (max depth: {max})")]
    TooDeep { parent: WatchHandle, max: usize },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
