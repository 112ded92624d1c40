//! Integration tests for the registry actor.
//!
//! These tests drive `spawn_registry()` through `RegistryHandle` only.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::sync::Arc;
use std::time::Duration;

use memscope_core::{
    AttachId, ConversionRegistry, DomainError, MemoryError, NewWatch, ProcessMemory, WatchHandle,
    WatchViewKind,
};
use memscoped::registry::{spawn_registry, RegistryError, RegistryHandle, WatchEvent};

// ============================================================================
// Test Helpers
// ============================================================================

/// Memory that reads as an incrementing byte pattern.
struct PatternProcess {
    pid: u64,
}

impl ProcessMemory for PatternProcess {
    fn pid(&self) -> u64 {
        self.pid
    }

    fn name(&self) -> String {
        format!("pattern-{}", self.pid)
    }

    fn read(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
        if address == 0 {
            return Err(MemoryError::ReadFailed {
                address,
                size,
                reason: "null page".to_string(),
            });
        }
        Ok((0..size).map(|i| i as u8).collect())
    }
}

/// Memory whose reads take a while and always return the i32 42.
struct SlowProcess;

impl ProcessMemory for SlowProcess {
    fn pid(&self) -> u64 {
        90
    }

    fn name(&self) -> String {
        "slow".to_string()
    }

    fn read(&self, _address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(42i32.to_le_bytes().iter().copied().take(size).collect())
    }
}

fn process(pid: u64) -> Arc<dyn ProcessMemory> {
    Arc::new(PatternProcess { pid })
}

fn h(raw: u32) -> WatchHandle {
    WatchHandle::new(raw)
}

async fn attached(registry: &RegistryHandle, id: u64, pid: u64) -> AttachId {
    let attach_id = AttachId::new(id);
    registry
        .register_process(attach_id, process(pid))
        .await
        .expect("register process");
    attach_id
}

fn bytes_watch(handle: u32, name: &str, address: u64) -> NewWatch {
    NewWatch::memory(h(handle), name, "UInt16", address, 2)
}

// ============================================================================
// Process Tests
// ============================================================================

#[tokio::test]
async fn test_same_pid_from_two_connections() {
    let registry = spawn_registry(ConversionRegistry::new(), 16);

    let first = attached(&registry, 1, 77).await;
    let second = attached(&registry, 2, 77).await;

    let processes = registry.get_processes().await;
    assert_eq!(processes.len(), 2);

    registry
        .add_watch(first, None, NewWatch::category(h(1), "Only in first"))
        .await
        .unwrap();

    assert_eq!(registry.get_tree(first).await.unwrap().len(), 1);
    assert!(registry.get_tree(second).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_detach_unknown_is_none() {
    let registry = spawn_registry(ConversionRegistry::new(), 16);
    let mut events = registry.subscribe();

    assert_eq!(registry.detach(AttachId::new(9)).await.unwrap(), None);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_register_twice_rejected() {
    let registry = spawn_registry(ConversionRegistry::new(), 16);
    let id = attached(&registry, 1, 10).await;

    let err = registry.register_process(id, process(11)).await.unwrap_err();
    assert!(matches!(err, RegistryError::AlreadyAttached(_)));

    let info = registry.get_process(id).await.unwrap();
    assert_eq!(info.pid, 10);
}

// ============================================================================
// Tree Consistency Tests
// ============================================================================

#[tokio::test]
async fn test_tree_rejections() {
    let registry = spawn_registry(ConversionRegistry::new(), 16);
    let id = attached(&registry, 1, 10).await;

    registry
        .add_watch(id, None, bytes_watch(1, "Speed", 0x10))
        .await
        .unwrap();

    let err = registry
        .add_watch(id, None, NewWatch::category(WatchHandle::ROOT, "Root"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Domain(DomainError::ReservedHandle)));

    let err = registry
        .add_watch(id, Some(h(1)), bytes_watch(2, "Inner", 0x10))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Domain(DomainError::ParentNotCategory { .. })
    ));

    let err = registry
        .add_watch(id, Some(h(50)), bytes_watch(3, "Orphan", 0x10))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Domain(DomainError::ParentNotFound { .. })
    ));

    // Rejected adds leave no trace
    assert_eq!(registry.get_tree(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_snapshot_nests_children() {
    let registry = spawn_registry(ConversionRegistry::new(), 16);
    let id = attached(&registry, 1, 10).await;

    registry
        .add_watch(id, None, NewWatch::category(h(1), "World"))
        .await
        .unwrap();
    registry
        .add_watch(id, Some(h(1)), NewWatch::category(h(2), "Player"))
        .await
        .unwrap();
    registry
        .add_watch(id, Some(h(2)), bytes_watch(3, "Speed", 0x10))
        .await
        .unwrap();
    registry
        .add_watch(id, Some(h(2)), bytes_watch(4, "Angle", 0x12))
        .await
        .unwrap();

    let tree = registry.get_tree(id).await.unwrap();
    assert_eq!(tree.len(), 1);
    let player = &tree[0].children[0];
    assert_eq!(player.name, "Player");
    let names: Vec<&str> = player.children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Speed", "Angle"]);
}

// ============================================================================
// Read Tests
// ============================================================================

#[tokio::test]
async fn test_read_after_remove_is_not_found() {
    let registry = spawn_registry(ConversionRegistry::new(), 16);
    let id = attached(&registry, 1, 10).await;

    registry
        .add_watch(id, None, bytes_watch(1, "Speed", 0x10))
        .await
        .unwrap();
    let outcome = registry.read_memory(id, h(1)).await.unwrap();
    assert_eq!(outcome.display(), u16::from_le_bytes([0, 1]).to_string());

    let removed = registry.remove_watch(id, h(1)).await.unwrap();
    assert_eq!(removed.len(), 1);

    let err = registry.read_memory(id, h(1)).await.unwrap_err();
    assert!(matches!(err, RegistryError::WatchNotFound(_)));
}

#[tokio::test]
async fn test_read_category_rejected() {
    let registry = spawn_registry(ConversionRegistry::new(), 16);
    let id = attached(&registry, 1, 10).await;

    registry
        .add_watch(id, None, NewWatch::category(h(1), "World"))
        .await
        .unwrap();

    let err = registry.read_memory(id, h(1)).await.unwrap_err();
    assert!(matches!(err, RegistryError::NotMemoryWatch(_)));
}

#[tokio::test]
async fn test_failed_read_is_recorded() {
    let registry = spawn_registry(ConversionRegistry::new(), 16);
    let id = attached(&registry, 1, 10).await;

    registry
        .add_watch(id, None, bytes_watch(1, "Null", 0))
        .await
        .unwrap();

    let outcome = registry.read_memory(id, h(1)).await.unwrap();
    assert!(outcome.is_failure());
    assert!(outcome.display().contains("null page"));
}

#[tokio::test]
async fn test_oversized_watch_records_error() {
    let registry = spawn_registry(ConversionRegistry::new(), 16);
    let id = attached(&registry, 1, 10).await;

    registry
        .add_watch(id, None, NewWatch::memory(h(1), "Huge", "UInt64", 0x10, u32::MAX))
        .await
        .unwrap();

    let outcome = registry.read_memory(id, h(1)).await.unwrap();
    assert!(outcome.is_failure());
    assert!(outcome.display().contains("limit"));

    let view = registry.get_watch(id, h(1)).await.unwrap();
    match view.kind {
        WatchViewKind::Memory { last_error, .. } => {
            assert_eq!(last_error.as_deref(), Some(outcome.display()));
        }
        WatchViewKind::Category => panic!("expected a memory watch"),
    }
}

#[tokio::test]
async fn test_read_result_skips_watch_readded_mid_read() {
    let registry = spawn_registry(ConversionRegistry::new(), 16);
    let id = AttachId::new(1);
    registry
        .register_process(id, Arc::new(SlowProcess))
        .await
        .unwrap();
    registry
        .add_watch(id, None, NewWatch::memory(h(1), "Old", "Int32", 0x1000, 4))
        .await
        .unwrap();

    let reader = registry.clone();
    let read = tokio::spawn(async move { reader.read_memory(id, h(1)).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    registry.remove_watch(id, h(1)).await.unwrap();
    registry
        .add_watch(id, None, NewWatch::memory(h(1), "New", "ANSIString", 0x2000, 8))
        .await
        .unwrap();

    let outcome = read.await.unwrap().unwrap();
    assert_eq!(outcome.display(), "42");

    let view = registry.get_watch(id, h(1)).await.unwrap();
    assert_eq!(view.name, "New");
    match view.kind {
        WatchViewKind::Memory {
            type_name, value, ..
        } => {
            assert_eq!(type_name, "ANSIString");
            assert_eq!(value, None);
        }
        WatchViewKind::Category => panic!("expected a memory watch"),
    }
}

// ============================================================================
// Event Tests
// ============================================================================

#[tokio::test]
async fn test_events_serialize_as_tagged_json() {
    let registry = spawn_registry(ConversionRegistry::new(), 16);
    let mut events = registry.subscribe();
    let id = attached(&registry, 1, 10).await;

    registry
        .add_watch(id, None, NewWatch::category(h(1), "World"))
        .await
        .unwrap();

    let connected = events.recv().await.unwrap();
    let json = serde_json::to_value(&connected).unwrap();
    assert_eq!(json["event"], "process_connected");
    assert_eq!(json["process"]["pid"], 10);

    let added = events.recv().await.unwrap();
    assert!(matches!(added, WatchEvent::CategoryAdded { .. }));
    let json = serde_json::to_value(&added).unwrap();
    assert_eq!(json["event"], "category_added");
    assert_eq!(json["watch"]["kind"], "category");
    assert_eq!(json["watch"]["name"], "World");
}
