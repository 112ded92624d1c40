//! Registry actor - owns every attached process and its watch tree.
//!
//! The RegistryActor is the single owner of shared state. It receives
//! commands via an mpsc channel, applies them one at a time, and publishes
//! events via broadcast. Connections never touch a tree directly.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel send failures are ignored; the requester may have gone away

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use memscope_core::{
    AttachId, AttachedProcess, ConversionRegistry, LogMessage, NewWatch, ProcessInfo,
    ProcessMemory, ReadOutcome, WatchHandle, WatchView,
};

use super::commands::{ReadRequest, RegistryCommand, RegistryError, WatchEvent};

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all attached processes.
///
/// Runs in a single task and processes commands sequentially, so two
/// connections can never interleave inside one mutation.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Attached processes keyed by the owning connection
    processes: HashMap<AttachId, AttachedProcess>,

    /// Template cloned into every new process
    converters: ConversionRegistry,

    /// Event publisher for subscribers
    event_publisher: broadcast::Sender<WatchEvent>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `converters` - Conversion registry every process starts from
    /// * `event_publisher` - Broadcast channel for publishing events
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        converters: ConversionRegistry,
        event_publisher: broadcast::Sender<WatchEvent>,
    ) -> Self {
        Self {
            receiver,
            processes: HashMap::new(),
            converters,
            event_publisher,
        }
    }

    /// Runs the actor event loop until every sender is dropped.
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            processes = self.processes.len(),
            "Registry actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::RegisterProcess {
                attach_id,
                memory,
                respond_to,
            } => {
                let result = self.handle_register(attach_id, memory);
                let _ = respond_to.send(result);
            }
            RegistryCommand::AddWatch {
                attach_id,
                parent,
                watch,
                respond_to,
            } => {
                let result = self.handle_add_watch(attach_id, parent, watch);
                let _ = respond_to.send(result);
            }
            RegistryCommand::RemoveWatch {
                attach_id,
                handle,
                respond_to,
            } => {
                let result = self.handle_remove_watch(attach_id, handle);
                let _ = respond_to.send(result);
            }
            RegistryCommand::AddLog {
                attach_id,
                message,
                respond_to,
            } => {
                self.handle_add_log(attach_id, message);
                let _ = respond_to.send(());
            }
            RegistryCommand::Detach {
                attach_id,
                respond_to,
            } => {
                let result = self.handle_detach(attach_id);
                let _ = respond_to.send(result);
            }
            RegistryCommand::GetProcesses { respond_to } => {
                let mut processes: Vec<ProcessInfo> =
                    self.processes.values().map(AttachedProcess::info).collect();
                processes.sort_by_key(|p| p.attach_id);
                let _ = respond_to.send(processes);
            }
            RegistryCommand::GetProcess {
                attach_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.processes.get(&attach_id).map(AttachedProcess::info));
            }
            RegistryCommand::GetWatch {
                attach_id,
                handle,
                respond_to,
            } => {
                let view = self
                    .processes
                    .get(&attach_id)
                    .and_then(|p| p.tree().snapshot_of(handle));
                let _ = respond_to.send(view);
            }
            RegistryCommand::GetTree {
                attach_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.processes.get(&attach_id).map(AttachedProcess::snapshot));
            }
            RegistryCommand::PrepareRead {
                attach_id,
                handle,
                respond_to,
            } => {
                let result = self.handle_prepare_read(attach_id, handle);
                let _ = respond_to.send(result);
            }
            RegistryCommand::StoreRead {
                attach_id,
                handle,
                serial,
                outcome,
                respond_to,
            } => {
                let stored = self.handle_store_read(attach_id, handle, serial, &outcome);
                let _ = respond_to.send(stored);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_register(
        &mut self,
        attach_id: AttachId,
        memory: Arc<dyn ProcessMemory>,
    ) -> Result<ProcessInfo, RegistryError> {
        if self.processes.contains_key(&attach_id) {
            warn!(attach_id = %attach_id, "Connection tried to register a second process");
            return Err(RegistryError::AlreadyAttached(attach_id));
        }

        let process = AttachedProcess::new(attach_id, memory, Arc::new(self.converters.clone()));
        let info = process.info();
        self.processes.insert(attach_id, process);

        info!(
            attach_id = %attach_id,
            pid = info.pid,
            name = %info.name,
            "Process attached"
        );

        self.publish(WatchEvent::ProcessConnected {
            process: info.clone(),
        });

        Ok(info)
    }

    fn handle_add_watch(
        &mut self,
        attach_id: AttachId,
        parent: Option<WatchHandle>,
        watch: NewWatch,
    ) -> Result<WatchView, RegistryError> {
        let process = self
            .processes
            .get_mut(&attach_id)
            .ok_or(RegistryError::NotAttached(attach_id))?;

        let view = process.insert(parent, watch)?.view();

        debug!(
            attach_id = %attach_id,
            handle = %view.handle,
            name = %view.name,
            category = view.is_category(),
            "Watch object added"
        );

        self.publish(WatchEvent::added(attach_id, view.clone()));
        Ok(view)
    }

    fn handle_remove_watch(
        &mut self,
        attach_id: AttachId,
        handle: WatchHandle,
    ) -> Result<Vec<WatchView>, RegistryError> {
        let process = self
            .processes
            .get_mut(&attach_id)
            .ok_or(RegistryError::NotAttached(attach_id))?;

        let Some(removed) = process.remove(handle) else {
            debug!(attach_id = %attach_id, handle = %handle, "RemoveWatch for unknown handle ignored");
            return Ok(Vec::new());
        };

        let views: Vec<WatchView> = removed.into_post_order().map(|node| node.view()).collect();

        debug!(
            attach_id = %attach_id,
            handle = %handle,
            removed = views.len(),
            "Watch object removed"
        );

        for view in &views {
            self.publish(WatchEvent::removed(attach_id, view.clone()));
        }

        Ok(views)
    }

    fn handle_add_log(&mut self, attach_id: Option<AttachId>, message: LogMessage) {
        let process = attach_id
            .and_then(|id| self.processes.get(&id))
            .map(AttachedProcess::info);

        debug!(
            pid = process.as_ref().map(|p| p.pid),
            filter = message.filter(),
            "Log message: {}",
            message.message()
        );

        self.publish(WatchEvent::LogAdded { process, message });
    }

    fn handle_detach(&mut self, attach_id: AttachId) -> Option<ProcessInfo> {
        let process = self.processes.remove(&attach_id)?;
        let info = process.info();

        info!(
            attach_id = %attach_id,
            pid = info.pid,
            name = %info.name,
            "Process detached"
        );

        self.publish(WatchEvent::ProcessDisconnected {
            process: info.clone(),
        });

        Some(info)
    }

    fn handle_prepare_read(
        &self,
        attach_id: AttachId,
        handle: WatchHandle,
    ) -> Result<ReadRequest, RegistryError> {
        let process = self
            .processes
            .get(&attach_id)
            .ok_or(RegistryError::NotAttached(attach_id))?;

        let object = process
            .tree()
            .get(handle)
            .ok_or(RegistryError::WatchNotFound(handle))?;

        let watch = object
            .as_memory()
            .ok_or(RegistryError::NotMemoryWatch(handle))?;

        Ok(ReadRequest {
            memory: Arc::clone(process.memory()),
            converters: Arc::clone(process.converters()),
            type_name: watch.type_name().to_string(),
            base_address: watch.base_address(),
            max_size: watch.max_size(),
            serial: object.serial(),
        })
    }

    fn handle_store_read(
        &mut self,
        attach_id: AttachId,
        handle: WatchHandle,
        serial: u64,
        outcome: &ReadOutcome,
    ) -> bool {
        self.processes
            .get_mut(&attach_id)
            .is_some_and(|process| process.apply_read(handle, serial, outcome))
    }

    /// Publishes an event; having no subscribers is not an error.
    fn publish(&self, event: WatchEvent) {
        let _ = self.event_publisher.send(event);
    }

    #[cfg(test)]
    pub fn process_count(&self) -> usize {
        self.processes.len()
    }
}
