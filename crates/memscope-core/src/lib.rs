//! memscope core - shared domain types for remote memory introspection
//!
//! This crate provides the domain model used by the daemon (memscoped)
//! and by anything that consumes its events:
//! - `tree` / `watch` - handle-addressed hierarchy of categories and memory watches
//! - `conversion` - per-process registry turning raw bytes into display strings
//! - `memory` - the process-memory access capability (procfs on Linux)
//! - `process` - an attached process owning its tree and converters
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod conversion;
pub mod error;
pub mod log;
pub mod memory;
pub mod privileges;
pub mod process;
pub mod tree;
pub mod watch;

// Re-exports for convenience
pub use conversion::{BaseType, ConversionError, ConversionRegistry};
pub use error::{DomainError, DomainResult};
pub use log::{LogMessage, MessageOrigin};
pub use memory::{platform_memory, MemoryAccess, MemoryError, ProcessMemory};
pub use privileges::{elevate, PrivilegeReport};
pub use process::{AttachId, AttachedProcess, ProcessInfo};
pub use tree::{RemovedSubtree, WatchTree};
pub use watch::{
    MemoryWatch, NewWatch, ReadOutcome, WatchHandle, WatchKind, WatchObject, WatchView,
    WatchViewKind, MAX_WATCH_SIZE,
};
