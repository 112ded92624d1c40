//! Applies decoded commands on behalf of one connection.
//!
//! The dispatcher decides what a connection may do: remote peers may only
//! log, watch commands need a registered process, and anything the
//! registry rejects ends the connection.

use std::sync::Arc;

use tracing::debug;

use memscope_core::{AttachId, LogMessage, MemoryAccess, NewWatch, WatchHandle};
use memscope_protocol::Command;

use super::connection::ConnectionError;
use crate::registry::RegistryHandle;

/// Per-connection command dispatcher.
pub struct Dispatcher {
    attach_id: AttachId,
    is_remote: bool,
    registry: RegistryHandle,
    memory: Arc<dyn MemoryAccess>,
    /// Pid of the registered process, once RegisterProcess succeeded
    attached_pid: Option<u64>,
}

impl Dispatcher {
    pub fn new(
        attach_id: AttachId,
        is_remote: bool,
        registry: RegistryHandle,
        memory: Arc<dyn MemoryAccess>,
    ) -> Self {
        Self {
            attach_id,
            is_remote,
            registry,
            memory,
            attached_pid: None,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.is_remote
    }

    /// Pid of the process this connection registered, if any.
    pub(crate) fn attached_pid(&self) -> Option<u64> {
        self.attached_pid
    }

    /// Decodes and applies one frame.
    pub async fn dispatch(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
        let command = Command::decode(frame)?;
        self.apply(command).await
    }

    /// Applies one decoded command.
    ///
    /// # Errors
    ///
    /// Any error means the connection must be closed.
    pub async fn apply(&mut self, command: Command) -> Result<(), ConnectionError> {
        if self.is_remote && !command.allowed_remotely() {
            debug!(
                connection = %self.attach_id,
                command = command.name(),
                "Ignoring command from remote client"
            );
            return Ok(());
        }

        match command {
            Command::RegisterProcess { pid } => self.register_process(pid).await,
            Command::AddWatch {
                type_name,
                name,
                parent,
                handle,
                base_address,
                max_size,
            } => {
                let watch = NewWatch::memory(handle.into(), name, type_name, base_address, max_size);
                self.add(parent, watch).await
            }
            Command::AddCategory {
                name,
                parent,
                handle,
            } => self.add(parent, NewWatch::category(handle.into(), name)).await,
            Command::RemoveWatch { handle } => self.remove(handle.into()).await,
            Command::AddLogMessage { message, filter } => {
                self.registry
                    .add_log(Some(self.attach_id), LogMessage::client(message, filter))
                    .await?;
                Ok(())
            }
            Command::Unknown { tag } => {
                debug!(connection = %self.attach_id, tag, "Ignoring unknown command");
                Ok(())
            }
        }
    }

    async fn register_process(&mut self, pid: u64) -> Result<(), ConnectionError> {
        let process = self
            .memory
            .open(pid)
            .map_err(|source| ConnectionError::ProcessOpen { pid, source })?;

        self.registry
            .register_process(self.attach_id, process)
            .await?;
        self.attached_pid = Some(pid);
        Ok(())
    }

    async fn add(&mut self, parent: u32, watch: NewWatch) -> Result<(), ConnectionError> {
        let parent = WatchHandle::new(parent).as_parent();
        self.registry.add_watch(self.attach_id, parent, watch).await?;
        Ok(())
    }

    async fn remove(&mut self, handle: WatchHandle) -> Result<(), ConnectionError> {
        if self.attached_pid.is_none() {
            debug!(connection = %self.attach_id, handle = %handle, "RemoveWatch before RegisterProcess ignored");
            return Ok(());
        }
        self.registry.remove_watch(self.attach_id, handle).await?;
        Ok(())
    }

    /// Detaches this connection's process, if any. Called once per connection.
    pub async fn finish(&mut self) {
        match self.registry.detach(self.attach_id).await {
            Ok(Some(info)) => debug!(connection = %self.attach_id, pid = info.pid, "Detached process"),
            Ok(None) => {}
            Err(e) => debug!(connection = %self.attach_id, error = %e, "Detach failed"),
        }
        self.attached_pid = None;
    }
}
