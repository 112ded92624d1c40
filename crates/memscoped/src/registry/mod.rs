//! Process registry using Actor pattern.
//!
//! The registry owns every attached process and its watch tree. It receives
//! commands via a tokio mpsc channel and is the single writer of that state.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │   Connections   │────▶│  RegistryActor  │────▶│ Broadcast Channel│
//! └─────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                       │                       │
//!         │   RegistryCommand     │   WatchEvent          │
//!         │   (mpsc channel)      │   (broadcast)         │
//!         ▼                       ▼                       ▼
//!   Register/AddWatch/     HashMap<AttachId,        Viewers, --json
//!   RemoveWatch/Log        AttachedProcess>          printer, tests
//! ```

use tokio::sync::{broadcast, mpsc};

use memscope_core::ConversionRegistry;

mod actor;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use commands::{ReadRequest, RegistryCommand, RegistryError, WatchEvent};
pub use handle::RegistryHandle;

/// Command channel buffer size
const COMMAND_BUFFER: usize = 100;

/// Default event channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Spawn the registry actor and return a handle for interaction.
///
/// Every attached process gets its own clone of `converters`.
/// `event_capacity` bounds how far a slow subscriber may lag before it
/// starts missing events; it is clamped to at least 1.
pub fn spawn_registry(converters: ConversionRegistry, event_capacity: usize) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(event_capacity.max(1));

    let actor = RegistryActor::new(cmd_rx, converters, event_tx.clone());
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
