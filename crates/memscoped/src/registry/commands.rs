//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `WatchEvent`: Events published by the registry for subscribers

use std::sync::Arc;

use memscope_core::{
    AttachId, ConversionRegistry, DomainError, LogMessage, NewWatch, ProcessInfo, ProcessMemory,
    ReadOutcome, WatchHandle, WatchView,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command carries a oneshot channel for the response, so a
/// connection can await the outcome before reading its next frame.
pub enum RegistryCommand {
    /// Attach an opened process to a connection.
    ///
    /// # Errors
    /// - `RegistryError::AlreadyAttached` if the connection already has a process
    RegisterProcess {
        attach_id: AttachId,
        memory: Arc<dyn ProcessMemory>,
        respond_to: oneshot::Sender<Result<ProcessInfo, RegistryError>>,
    },

    /// Insert a category or memory watch into a process's tree.
    ///
    /// # Errors
    /// - `RegistryError::NotAttached` if the connection has no process
    /// - `RegistryError::Domain` if the tree rejects the insert
    AddWatch {
        attach_id: AttachId,
        parent: Option<WatchHandle>,
        watch: NewWatch,
        respond_to: oneshot::Sender<Result<WatchView, RegistryError>>,
    },

    /// Remove a watch object and everything below it.
    ///
    /// Responds with the removed nodes, children first. An unknown handle
    /// yields an empty list.
    RemoveWatch {
        attach_id: AttachId,
        handle: WatchHandle,
        respond_to: oneshot::Sender<Result<Vec<WatchView>, RegistryError>>,
    },

    /// Record a log message, optionally tied to a connection's process.
    AddLog {
        attach_id: Option<AttachId>,
        message: LogMessage,
        respond_to: oneshot::Sender<()>,
    },

    /// Drop a connection's process, if it has one.
    Detach {
        attach_id: AttachId,
        respond_to: oneshot::Sender<Option<ProcessInfo>>,
    },

    /// List every attached process.
    GetProcesses {
        respond_to: oneshot::Sender<Vec<ProcessInfo>>,
    },

    /// Look up one attached process.
    GetProcess {
        attach_id: AttachId,
        respond_to: oneshot::Sender<Option<ProcessInfo>>,
    },

    /// Nested snapshot of one watch object.
    GetWatch {
        attach_id: AttachId,
        handle: WatchHandle,
        respond_to: oneshot::Sender<Option<WatchView>>,
    },

    /// Nested snapshot of a process's whole tree.
    GetTree {
        attach_id: AttachId,
        respond_to: oneshot::Sender<Option<Vec<WatchView>>>,
    },

    /// Collect what is needed to read a memory watch outside the actor.
    PrepareRead {
        attach_id: AttachId,
        handle: WatchHandle,
        respond_to: oneshot::Sender<Result<ReadRequest, RegistryError>>,
    },

    /// Store the outcome of a read. Responds false if the watch that was
    /// read is gone, even if its handle now names a newer watch.
    StoreRead {
        attach_id: AttachId,
        handle: WatchHandle,
        serial: u64,
        outcome: ReadOutcome,
        respond_to: oneshot::Sender<bool>,
    },
}

/// Everything needed to read one memory watch without touching the tree.
#[derive(Clone)]
pub struct ReadRequest {
    pub memory: Arc<dyn ProcessMemory>,
    pub converters: Arc<ConversionRegistry>,
    pub type_name: String,
    pub base_address: u64,
    pub max_size: u32,
    /// Serial of the watch when the read was prepared
    pub serial: u64,
}

impl ReadRequest {
    /// Performs the blocking OS read and conversion.
    pub fn perform(&self) -> ReadOutcome {
        ReadOutcome::perform(
            self.memory.as_ref(),
            self.base_address,
            self.max_size,
            &self.type_name,
            &self.converters,
        )
    }
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The connection has not registered a process.
    #[error("no process attached to connection {0}")]
    NotAttached(AttachId),

    /// The connection already registered a process.
    #[error("connection {0} already has an attached process")]
    AlreadyAttached(AttachId),

    /// No watch object with this handle.
    #[error("watch not found: {0}")]
    WatchNotFound(WatchHandle),

    /// The handle names a category, which has no memory.
    #[error("watch {0} is a category, not a memory watch")]
    NotMemoryWatch(WatchHandle),

    /// The watch tree rejected a mutation.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Watch Events
// ============================================================================

/// Events published by the registry to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchEvent {
    ProcessConnected {
        process: ProcessInfo,
    },

    ProcessDisconnected {
        process: ProcessInfo,
    },

    CategoryAdded {
        attach_id: AttachId,
        watch: WatchView,
    },

    CategoryRemoved {
        attach_id: AttachId,
        watch: WatchView,
    },

    MemoryWatchAdded {
        attach_id: AttachId,
        watch: WatchView,
    },

    MemoryWatchRemoved {
        attach_id: AttachId,
        watch: WatchView,
    },

    /// A log message arrived; `process` is set when the sender had registered.
    LogAdded {
        process: Option<ProcessInfo>,
        message: LogMessage,
    },
}

impl WatchEvent {
    /// Add event matching the variant of `watch`.
    pub fn added(attach_id: AttachId, watch: WatchView) -> Self {
        if watch.is_category() {
            Self::CategoryAdded { attach_id, watch }
        } else {
            Self::MemoryWatchAdded { attach_id, watch }
        }
    }

    /// Remove event matching the variant of `watch`.
    pub fn removed(attach_id: AttachId, watch: WatchView) -> Self {
        if watch.is_category() {
            Self::CategoryRemoved { attach_id, watch }
        } else {
            Self::MemoryWatchRemoved { attach_id, watch }
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProcessConnected { .. } => "process_connected",
            Self::ProcessDisconnected { .. } => "process_disconnected",
            Self::CategoryAdded { .. } => "category_added",
            Self::CategoryRemoved { .. } => "category_removed",
            Self::MemoryWatchAdded { .. } => "memory_watch_added",
            Self::MemoryWatchRemoved { .. } => "memory_watch_removed",
            Self::LogAdded { .. } => "log_added",
        }
    }
}
