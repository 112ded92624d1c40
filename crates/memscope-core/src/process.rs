//! Attached processes.
//!
//! An [`AttachedProcess`] is created when a connection registers a pid. It
//! owns the process's watch tree and conversion registry and lives until
//! the connection closes.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversion::ConversionRegistry;
use crate::error::DomainResult;
use crate::memory::ProcessMemory;
use crate::tree::{RemovedSubtree, WatchTree};
use crate::watch::{NewWatch, ReadOutcome, WatchHandle, WatchObject, WatchView};

/// Identifies one attachment; equal to the id of the owning connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachId(u64);

impl AttachId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttachId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered process with its watch tree.
pub struct AttachedProcess {
    attach_id: AttachId,
    pid: u64,
    name: String,
    memory: Arc<dyn ProcessMemory>,
    tree: WatchTree,
    converters: Arc<ConversionRegistry>,
    attached_at: DateTime<Utc>,
}

impl AttachedProcess {
    /// Creates an attachment with an empty tree.
    pub fn new(
        attach_id: AttachId,
        memory: Arc<dyn ProcessMemory>,
        converters: Arc<ConversionRegistry>,
    ) -> Self {
        Self {
            attach_id,
            pid: memory.pid(),
            name: memory.name(),
            memory,
            tree: WatchTree::new(),
            converters,
            attached_at: Utc::now(),
        }
    }

    pub fn attach_id(&self) -> AttachId {
        self.attach_id
    }

    pub fn pid(&self) -> u64 {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attached_at(&self) -> DateTime<Utc> {
        self.attached_at
    }

    pub fn tree(&self) -> &WatchTree {
        &self.tree
    }

    /// OS handle used for memory reads.
    pub fn memory(&self) -> &Arc<dyn ProcessMemory> {
        &self.memory
    }

    pub fn converters(&self) -> &Arc<ConversionRegistry> {
        &self.converters
    }

    /// Inserts a node under `parent` (`None` = root set).
    pub fn insert(&mut self, parent: Option<WatchHandle>, new: NewWatch) -> DomainResult<&WatchObject> {
        self.tree.insert(parent, new)
    }

    /// Removes a node and everything below it.
    pub fn remove(&mut self, handle: WatchHandle) -> Option<RemovedSubtree> {
        self.tree.remove(handle)
    }

    /// Reads a memory watch in place. `None` if `handle` is not a memory watch.
    pub fn read_memory(&mut self, handle: WatchHandle) -> Option<ReadOutcome> {
        let watch = self.tree.get_mut(handle)?.as_memory_mut()?;
        Some(watch.read_memory(self.memory.as_ref(), &self.converters))
    }

    /// Stores a read performed elsewhere.
    ///
    /// `serial` is the watch's serial when the read was prepared. Returns
    /// false, storing nothing, if that watch is gone, even when its handle
    /// has since been reused.
    pub fn apply_read(&mut self, handle: WatchHandle, serial: u64, outcome: &ReadOutcome) -> bool {
        let watch = self
            .tree
            .get_mut(handle)
            .filter(|object| object.serial() == serial)
            .and_then(WatchObject::as_memory_mut);

        match watch {
            Some(watch) => {
                watch.apply(outcome);
                true
            }
            None => false,
        }
    }

    /// Summary for events and listings.
    pub fn info(&self) -> ProcessInfo {
        ProcessInfo {
            attach_id: self.attach_id,
            pid: self.pid,
            name: self.name.clone(),
            attached_at: self.attached_at,
            watch_count: self.tree.len(),
        }
    }

    /// Nested snapshot of the whole tree.
    pub fn snapshot(&self) -> Vec<WatchView> {
        self.tree.snapshot()
    }
}

impl fmt::Debug for AttachedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachedProcess")
            .field("attach_id", &self.attach_id)
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("watches", &self.tree.len())
            .finish()
    }
}

/// Owned description of an attached process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub attach_id: AttachId,
    pub pid: u64,
    pub name: String,
    pub attached_at: DateTime<Utc>,
    pub watch_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryError;

    struct Counter(u32);

    impl ProcessMemory for Counter {
        fn pid(&self) -> u64 {
            77
        }

        fn name(&self) -> String {
            "game".to_string()
        }

        fn read(&self, _address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
            Ok(self.0.to_le_bytes().iter().copied().take(size).collect())
        }
    }

    fn attached() -> AttachedProcess {
        AttachedProcess::new(
            AttachId::new(1),
            Arc::new(Counter(300)),
            Arc::new(ConversionRegistry::new()),
        )
    }

    #[test]
    fn test_new_takes_identity_from_memory() {
        let process = attached();
        assert_eq!(process.pid(), 77);
        assert_eq!(process.name(), "game");
        assert!(process.tree().is_empty());
    }

    #[test]
    fn test_read_memory_in_place() {
        let mut process = attached();
        let cat = WatchHandle::new(1);
        let hp = WatchHandle::new(2);
        process.insert(None, NewWatch::category(cat, "Player")).unwrap();
        process
            .insert(Some(cat), NewWatch::memory(hp, "Health", "UInt32", 0x40, 4))
            .unwrap();

        let outcome = process.read_memory(hp).unwrap();
        assert_eq!(outcome.display(), "300");
        assert_eq!(
            process.tree().get(hp).and_then(|w| w.as_memory()).and_then(|m| m.value()),
            Some("300")
        );

        // Categories have no memory to read
        assert!(process.read_memory(cat).is_none());
    }

    #[test]
    fn test_apply_read_after_removal() {
        let mut process = attached();
        let hp = WatchHandle::new(2);
        process
            .insert(None, NewWatch::memory(hp, "Health", "UInt32", 0x40, 4))
            .unwrap();
        let serial = process.tree().get(hp).unwrap().serial();
        process.remove(hp);

        let outcome = ReadOutcome::Failed {
            error: "gone".to_string(),
        };
        assert!(!process.apply_read(hp, serial, &outcome));
    }

    #[test]
    fn test_apply_read_skips_reused_handle() {
        let mut process = attached();
        let hp = WatchHandle::new(2);
        process
            .insert(None, NewWatch::memory(hp, "Health", "UInt32", 0x40, 4))
            .unwrap();
        let old_serial = process.tree().get(hp).unwrap().serial();

        process.remove(hp);
        process
            .insert(None, NewWatch::memory(hp, "Label", "ANSIString", 0x80, 8))
            .unwrap();
        let new_serial = process.tree().get(hp).unwrap().serial();
        assert_ne!(old_serial, new_serial);

        let stale = ReadOutcome::Decoded {
            raw: 300u32.to_le_bytes().to_vec(),
            value: "300".to_string(),
        };
        assert!(!process.apply_read(hp, old_serial, &stale));
        let label = process.tree().get(hp).and_then(|w| w.as_memory()).unwrap();
        assert_eq!(label.value(), None);

        assert!(process.apply_read(hp, new_serial, &stale));
    }

    #[test]
    fn test_info_counts_watches() {
        let mut process = attached();
        process
            .insert(None, NewWatch::category(WatchHandle::new(1), "A"))
            .unwrap();
        let info = process.info();
        assert_eq!(info.attach_id, AttachId::new(1));
        assert_eq!(info.watch_count, 1);
    }
}
