//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending commands
//! to the registry actor and subscribing to watch events.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use memscope_core::{
    AttachId, LogMessage, NewWatch, ProcessInfo, ProcessMemory, ReadOutcome, WatchHandle,
    WatchView,
};

use super::commands::{RegistryCommand, RegistryError, WatchEvent};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// Cheap to clone; every connection task holds one.
///
/// # Usage
///
/// ```ignore
/// let info = handle.register_process(attach_id, memory).await?;
/// handle.add_watch(attach_id, None, NewWatch::category(WatchHandle::new(1), "Player")).await?;
///
/// let mut rx = handle.subscribe();
/// while let Ok(event) = rx.recv().await {
///     // Handle event
/// }
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<WatchEvent>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<WatchEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Sends a command built around a fresh oneshot and awaits the reply.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(build(tx))
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Attach an opened process to a connection.
    ///
    /// # Errors
    ///
    /// - `RegistryError::AlreadyAttached` if the connection already has a process
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register_process(
        &self,
        attach_id: AttachId,
        memory: Arc<dyn ProcessMemory>,
    ) -> Result<ProcessInfo, RegistryError> {
        self.request(|respond_to| RegistryCommand::RegisterProcess {
            attach_id,
            memory,
            respond_to,
        })
        .await?
    }

    /// Insert a category or memory watch under `parent` (`None` = root set).
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotAttached` if the connection has no process
    /// - `RegistryError::Domain` if the tree rejects the node
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn add_watch(
        &self,
        attach_id: AttachId,
        parent: Option<WatchHandle>,
        watch: NewWatch,
    ) -> Result<WatchView, RegistryError> {
        self.request(|respond_to| RegistryCommand::AddWatch {
            attach_id,
            parent,
            watch,
            respond_to,
        })
        .await?
    }

    /// Remove a watch object and its descendants.
    ///
    /// Returns the removed nodes, children first; empty for an unknown handle.
    pub async fn remove_watch(
        &self,
        attach_id: AttachId,
        handle: WatchHandle,
    ) -> Result<Vec<WatchView>, RegistryError> {
        self.request(|respond_to| RegistryCommand::RemoveWatch {
            attach_id,
            handle,
            respond_to,
        })
        .await?
    }

    /// Record a log message and publish it.
    pub async fn add_log(
        &self,
        attach_id: Option<AttachId>,
        message: LogMessage,
    ) -> Result<(), RegistryError> {
        self.request(|respond_to| RegistryCommand::AddLog {
            attach_id,
            message,
            respond_to,
        })
        .await
    }

    /// Drop the process attached to a connection.
    ///
    /// Returns `None` if the connection never registered one.
    pub async fn detach(&self, attach_id: AttachId) -> Result<Option<ProcessInfo>, RegistryError> {
        self.request(|respond_to| RegistryCommand::Detach {
            attach_id,
            respond_to,
        })
        .await
    }

    /// All attached processes, ordered by attach id.
    ///
    /// Returns an empty vector if the actor has shut down.
    pub async fn get_processes(&self) -> Vec<ProcessInfo> {
        self.request(|respond_to| RegistryCommand::GetProcesses { respond_to })
            .await
            .unwrap_or_default()
    }

    pub async fn get_process(&self, attach_id: AttachId) -> Option<ProcessInfo> {
        self.request(|respond_to| RegistryCommand::GetProcess {
            attach_id,
            respond_to,
        })
        .await
        .ok()
        .flatten()
    }

    /// Nested snapshot of one watch object.
    pub async fn get_watch(&self, attach_id: AttachId, handle: WatchHandle) -> Option<WatchView> {
        self.request(|respond_to| RegistryCommand::GetWatch {
            attach_id,
            handle,
            respond_to,
        })
        .await
        .ok()
        .flatten()
    }

    /// Nested snapshot of a process's tree.
    pub async fn get_tree(&self, attach_id: AttachId) -> Option<Vec<WatchView>> {
        self.request(|respond_to| RegistryCommand::GetTree {
            attach_id,
            respond_to,
        })
        .await
        .ok()
        .flatten()
    }

    /// Reads a memory watch and stores the result.
    ///
    /// The OS read runs on the blocking pool, so the actor keeps serving
    /// other connections meanwhile. The result is stored only if the same
    /// watch still exists afterwards; a watch re-added under the handle
    /// mid-read keeps its own state. The outcome is returned either way.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotAttached`, `WatchNotFound` or `NotMemoryWatch`
    ///   if there is nothing to read
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn read_memory(
        &self,
        attach_id: AttachId,
        handle: WatchHandle,
    ) -> Result<ReadOutcome, RegistryError> {
        let request = self
            .request(|respond_to| RegistryCommand::PrepareRead {
                attach_id,
                handle,
                respond_to,
            })
            .await??;

        let serial = request.serial;
        let outcome = match tokio::task::spawn_blocking(move || request.perform()).await {
            Ok(outcome) => outcome,
            Err(e) => ReadOutcome::Failed {
                error: format!("Memory read task failed: {e}"),
            },
        };

        let stored = self
            .request(|respond_to| RegistryCommand::StoreRead {
                attach_id,
                handle,
                serial,
                outcome: outcome.clone(),
                respond_to,
            })
            .await?;

        if !stored {
            debug!(attach_id = %attach_id, handle = %handle, "Watch removed during read, result dropped");
        }

        Ok(outcome)
    }

    /// Subscribe to watch events.
    ///
    /// Events sent before subscribing are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.event_sender.subscribe()
    }

    /// Number of active event subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.event_sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::spawn_registry;
    use memscope_core::{ConversionRegistry, MemoryError};

    struct Bytes(Vec<u8>);

    impl ProcessMemory for Bytes {
        fn pid(&self) -> u64 {
            55
        }

        fn name(&self) -> String {
            "bytes".to_string()
        }

        fn read(&self, _address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
            Ok(self.0.iter().copied().take(size).collect())
        }
    }

    struct Broken;

    impl ProcessMemory for Broken {
        fn pid(&self) -> u64 {
            56
        }

        fn name(&self) -> String {
            "broken".to_string()
        }

        fn read(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
            Err(MemoryError::ReadFailed {
                address,
                size,
                reason: "process handle is invalid".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_register_and_list() {
        let handle = spawn_registry(ConversionRegistry::new(), 16);
        let id = AttachId::new(1);

        handle
            .register_process(id, Arc::new(Bytes(vec![])))
            .await
            .unwrap();

        let processes = handle.get_processes().await;
        assert_eq!(processes.len(), 1);
        assert_eq!(handle.get_process(id).await.map(|p| p.pid), Some(55));
        assert!(handle.get_process(AttachId::new(2)).await.is_none());
    }

    #[tokio::test]
    async fn test_read_memory_decodes_and_stores() {
        let handle = spawn_registry(ConversionRegistry::new(), 16);
        let id = AttachId::new(1);
        let hp = WatchHandle::new(4);

        handle
            .register_process(id, Arc::new(Bytes(1000i32.to_le_bytes().to_vec())))
            .await
            .unwrap();
        handle
            .add_watch(id, None, NewWatch::memory(hp, "Health", "Int32", 0x10, 4))
            .await
            .unwrap();

        let outcome = handle.read_memory(id, hp).await.unwrap();
        assert_eq!(outcome.display(), "1000");

        let view = handle.get_watch(id, hp).await.unwrap();
        assert_eq!(
            view.kind,
            memscope_core::WatchViewKind::Memory {
                type_name: "Int32".to_string(),
                base_address: 0x10,
                max_size: 4,
                value: Some("1000".to_string()),
                last_error: None,
            }
        );
    }

    #[tokio::test]
    async fn test_read_memory_failure_is_an_outcome() {
        let handle = spawn_registry(ConversionRegistry::new(), 16);
        let id = AttachId::new(1);
        let hp = WatchHandle::new(4);

        handle.register_process(id, Arc::new(Broken)).await.unwrap();
        handle
            .add_watch(id, None, NewWatch::memory(hp, "Health", "Int32", 0x10, 4))
            .await
            .unwrap();

        let outcome = handle.read_memory(id, hp).await.unwrap();
        assert!(outcome.is_failure());
        assert!(!outcome.display().is_empty());

        let tree = handle.get_tree(id).await.unwrap();
        match &tree.first().unwrap().kind {
            memscope_core::WatchViewKind::Memory {
                value, last_error, ..
            } => {
                assert!(last_error.is_some());
                assert_eq!(value, last_error);
            }
            memscope_core::WatchViewKind::Category => panic!("expected memory watch"),
        }
    }

    #[tokio::test]
    async fn test_read_memory_without_process() {
        let handle = spawn_registry(ConversionRegistry::new(), 16);
        let err = handle
            .read_memory(AttachId::new(9), WatchHandle::new(1))
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::NotAttached(AttachId::new(9)));
    }

    #[tokio::test]
    async fn test_subscribe_receives_events() {
        let handle = spawn_registry(ConversionRegistry::new(), 16);
        let mut events = handle.subscribe();
        assert_eq!(handle.subscriber_count(), 1);

        handle
            .add_log(None, LogMessage::client("hello", ""))
            .await
            .unwrap();

        match events.recv().await {
            Ok(WatchEvent::LogAdded { message, .. }) => assert_eq!(message.message(), "hello"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
