//! Watch objects: categories and memory watches.
//!
//! A watch object is a closed tagged variant. Everything that needs to
//! behave differently for categories and memory watches matches on
//! [`WatchKind`]; there is no other way to tell them apart.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::conversion::{BaseType, ConversionRegistry};
use crate::memory::ProcessMemory;

// ============================================================================
// Handles
// ============================================================================

/// Client-assigned identifier of a watch object.
///
/// Unique within one process's tree. The value 0 is reserved on the wire
/// to mean "the root set" and never names a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchHandle(u32);

impl WatchHandle {
    /// The wire value that addresses the root set.
    pub const ROOT: WatchHandle = WatchHandle(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns true for the reserved root handle.
    #[must_use]
    pub const fn is_root(self) -> bool {
        self.0 == 0
    }

    /// Converts a wire parent handle into an optional parent (0 = root set).
    pub fn as_parent(self) -> Option<WatchHandle> {
        if self.is_root() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for WatchHandle {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

// ============================================================================
// Watch Objects
// ============================================================================

/// A node of a watch tree.
///
/// The sibling/child links are maintained by [`crate::WatchTree`] and are
/// only readable from outside the crate.
#[derive(Debug, Clone)]
pub struct WatchObject {
    handle: WatchHandle,
    name: String,
    original_name: String,
    serial: u64,
    pub(crate) parent: Option<WatchHandle>,
    pub(crate) prev_sibling: Option<WatchHandle>,
    pub(crate) next_sibling: Option<WatchHandle>,
    pub(crate) first_child: Option<WatchHandle>,
    pub(crate) last_child: Option<WatchHandle>,
    kind: WatchKind,
}

/// Variant tag of a watch object.
#[derive(Debug, Clone)]
pub enum WatchKind {
    /// Organizational node; may have children.
    Category,
    /// Leaf describing a region of the owning process's memory.
    Memory(MemoryWatch),
}

impl WatchObject {
    pub(crate) fn new(new: NewWatch, display_name: String, serial: u64) -> Self {
        Self {
            handle: new.handle,
            name: display_name,
            original_name: new.name,
            serial,
            parent: None,
            prev_sibling: None,
            next_sibling: None,
            first_child: None,
            last_child: None,
            kind: new.kind,
        }
    }

    pub fn handle(&self) -> WatchHandle {
        self.handle
    }

    /// De-duplicated display name (e.g. "Health (1)").
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name as sent by the client, before de-duplication.
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn parent(&self) -> Option<WatchHandle> {
        self.parent
    }

    /// Tree-unique id of this insertion. A handle that is removed and
    /// added again gets a new serial.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn kind(&self) -> &WatchKind {
        &self.kind
    }

    #[must_use]
    pub fn is_category(&self) -> bool {
        matches!(self.kind, WatchKind::Category)
    }

    pub fn as_memory(&self) -> Option<&MemoryWatch> {
        match &self.kind {
            WatchKind::Memory(watch) => Some(watch),
            WatchKind::Category => None,
        }
    }

    pub fn as_memory_mut(&mut self) -> Option<&mut MemoryWatch> {
        match &mut self.kind {
            WatchKind::Memory(watch) => Some(watch),
            WatchKind::Category => None,
        }
    }

    /// Shallow view of this node (no children).
    pub fn view(&self) -> WatchView {
        let kind = match &self.kind {
            WatchKind::Category => WatchViewKind::Category,
            WatchKind::Memory(watch) => WatchViewKind::Memory {
                type_name: watch.type_name.clone(),
                base_address: watch.base_address,
                max_size: watch.max_size,
                value: watch.value.clone(),
                last_error: watch.last_error.clone(),
            },
        };

        WatchView {
            handle: self.handle,
            name: self.name.clone(),
            original_name: self.original_name.clone(),
            parent: self.parent,
            kind,
            children: Vec::new(),
        }
    }
}

/// Request to insert a node into a watch tree.
#[derive(Debug, Clone)]
pub struct NewWatch {
    pub handle: WatchHandle,
    pub name: String,
    pub kind: WatchKind,
}

impl NewWatch {
    pub fn category(handle: WatchHandle, name: impl Into<String>) -> Self {
        Self {
            handle,
            name: name.into(),
            kind: WatchKind::Category,
        }
    }

    pub fn memory(
        handle: WatchHandle,
        name: impl Into<String>,
        type_name: impl Into<String>,
        base_address: u64,
        max_size: u32,
    ) -> Self {
        Self {
            handle,
            name: name.into(),
            kind: WatchKind::Memory(MemoryWatch::new(type_name, base_address, max_size)),
        }
    }
}

// ============================================================================
// Memory Watches
// ============================================================================

/// Largest region a single memory watch may read.
pub const MAX_WATCH_SIZE: u32 = 1024 * 1024;

/// A watched region of the owning process's memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryWatch {
    type_name: String,
    base_address: u64,
    max_size: u32,
    data: Option<Vec<u8>>,
    value: Option<String>,
    last_error: Option<String>,
}

impl MemoryWatch {
    pub fn new(type_name: impl Into<String>, base_address: u64, max_size: u32) -> Self {
        Self {
            type_name: type_name.into(),
            base_address,
            max_size,
            data: None,
            value: None,
            last_error: None,
        }
    }

    /// Declared type name, used to pick a converter.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    /// Formats the base address the way viewers show it.
    pub fn base_address_hex(&self) -> String {
        format!("0x{:X}", self.base_address)
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    /// Raw bytes of the last successful read.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Current display value: the decoded string, or the last error.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Reads and decodes this watch in one step.
    ///
    /// Blocks for as long as the underlying OS read does. Never fails:
    /// a failed read is recorded and becomes the display value.
    pub fn read_memory(
        &mut self,
        memory: &dyn ProcessMemory,
        converters: &ConversionRegistry,
    ) -> ReadOutcome {
        let outcome = ReadOutcome::perform(
            memory,
            self.base_address,
            self.max_size,
            &self.type_name,
            converters,
        );
        self.apply(&outcome);
        outcome
    }

    /// Stores the result of a read performed elsewhere.
    pub fn apply(&mut self, outcome: &ReadOutcome) {
        self.last_error = None;

        match outcome {
            ReadOutcome::Decoded { raw, value } => {
                self.data = Some(raw.clone());
                self.value = Some(value.clone());
            }
            ReadOutcome::Failed { error } => {
                self.data = None;
                self.last_error = Some(error.clone());
                // Make the error visible in place of any stale value
                self.value = Some(error.clone());
            }
        }
    }
}

/// Result of one read cycle of a memory watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReadOutcome {
    /// Bytes were read and rendered.
    Decoded { raw: Vec<u8>, value: String },
    /// The OS read failed; `error` is human readable.
    Failed { error: String },
}

impl ReadOutcome {
    /// Performs a read without touching any watch state.
    ///
    /// Split from [`MemoryWatch::read_memory`] so callers can run the
    /// blocking part off the thread that owns the tree.
    pub fn perform(
        memory: &dyn ProcessMemory,
        base_address: u64,
        max_size: u32,
        type_name: &str,
        converters: &ConversionRegistry,
    ) -> Self {
        if max_size > MAX_WATCH_SIZE {
            return ReadOutcome::Failed {
                error: format!(
                    "Could not read memory: {max_size} bytes exceeds the {MAX_WATCH_SIZE}-byte watch limit"
                ),
            };
        }
        let size = max_size as usize;

        match memory.read(base_address, size) {
            Ok(raw) => {
                let value = converters
                    .convert(type_name, &raw, size)
                    .unwrap_or_else(|| unknown_type_value(type_name, &raw, size, converters));
                ReadOutcome::Decoded { raw, value }
            }
            Err(e) => ReadOutcome::Failed {
                error: format!("Could not read memory: {e}"),
            },
        }
    }

    /// The string a viewer should show for this outcome.
    pub fn display(&self) -> &str {
        match self {
            ReadOutcome::Decoded { value, .. } => value,
            ReadOutcome::Failed { error } => error,
        }
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, ReadOutcome::Failed { .. })
    }
}

fn unknown_type_value(
    type_name: &str,
    raw: &[u8],
    size: usize,
    converters: &ConversionRegistry,
) -> String {
    let dump = converters
        .convert(BaseType::HexPattern.as_str(), raw, size)
        .unwrap_or_default();
    format!("<no converter for '{type_name}'> {dump}")
}

// ============================================================================
// Views
// ============================================================================

/// Owned, serializable snapshot of a watch object for subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchView {
    pub handle: WatchHandle,
    pub name: String,
    pub original_name: String,
    pub parent: Option<WatchHandle>,
    #[serde(flatten)]
    pub kind: WatchViewKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<WatchView>,
}

/// Variant part of a [`WatchView`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WatchViewKind {
    Category,
    Memory {
        type_name: String,
        base_address: u64,
        max_size: u32,
        value: Option<String>,
        last_error: Option<String>,
    },
}

impl WatchView {
    #[must_use]
    pub fn is_category(&self) -> bool {
        matches!(self.kind, WatchViewKind::Category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryError;

    struct FixedMemory(Vec<u8>);

    impl ProcessMemory for FixedMemory {
        fn pid(&self) -> u64 {
            42
        }

        fn name(&self) -> String {
            "fixed".to_string()
        }

        fn read(&self, _address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
            Ok(self.0.iter().copied().take(size).collect())
        }
    }

    struct DeadMemory;

    impl ProcessMemory for DeadMemory {
        fn pid(&self) -> u64 {
            0
        }

        fn name(&self) -> String {
            String::new()
        }

        fn read(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
            Err(MemoryError::ReadFailed {
                address,
                size,
                reason: "invalid handle".to_string(),
            })
        }
    }

    #[test]
    fn test_root_handle() {
        assert!(WatchHandle::ROOT.is_root());
        assert_eq!(WatchHandle::new(0).as_parent(), None);
        assert_eq!(WatchHandle::new(5).as_parent(), Some(WatchHandle::new(5)));
    }

    #[test]
    fn test_read_memory_decodes_int32() {
        let converters = ConversionRegistry::new();
        let mut watch = MemoryWatch::new("Int32", 0x1000, 4);

        let outcome = watch.read_memory(&FixedMemory((-2i32).to_le_bytes().to_vec()), &converters);

        assert_eq!(outcome.display(), "-2");
        assert_eq!(watch.value(), Some("-2"));
        assert_eq!(watch.data(), Some(&(-2i32).to_le_bytes()[..]));
        assert_eq!(watch.last_error(), None);
    }

    #[test]
    fn test_read_failure_replaces_stale_value() {
        let converters = ConversionRegistry::new();
        let mut watch = MemoryWatch::new("UInt8", 0x10, 1);

        watch.read_memory(&FixedMemory(vec![9]), &converters);
        assert_eq!(watch.value(), Some("9"));

        let outcome = watch.read_memory(&DeadMemory, &converters);
        assert!(outcome.is_failure());

        let error = watch.last_error().expect("error recorded");
        assert!(!error.is_empty());
        assert_eq!(watch.value(), Some(error));
        assert_eq!(watch.data(), None);
    }

    #[test]
    fn test_successful_read_clears_error() {
        let converters = ConversionRegistry::new();
        let mut watch = MemoryWatch::new("Bool", 0x10, 1);

        watch.read_memory(&DeadMemory, &converters);
        assert!(watch.last_error().is_some());

        watch.read_memory(&FixedMemory(vec![1]), &converters);
        assert_eq!(watch.last_error(), None);
        assert_eq!(watch.value(), Some("true"));
    }

    #[test]
    fn test_unknown_type_falls_back_to_hex() {
        let converters = ConversionRegistry::new();
        let mut watch = MemoryWatch::new("Vector3", 0x10, 2);

        watch.read_memory(&FixedMemory(vec![0xab, 0x01]), &converters);

        let value = watch.value().unwrap_or_default();
        assert!(value.contains("Vector3"));
        assert!(value.ends_with("ab 01"));
    }

    #[test]
    fn test_oversized_watch_fails_without_reading() {
        let converters = ConversionRegistry::new();
        let mut watch = MemoryWatch::new("UInt64", 0x1000, u32::MAX);

        let outcome = watch.read_memory(&DeadMemory, &converters);

        assert!(outcome.is_failure());
        assert!(outcome.display().contains("exceeds"));
        assert!(!outcome.display().contains("invalid handle"));
        assert_eq!(watch.last_error(), Some(outcome.display()));
    }

    #[test]
    fn test_limit_sized_watch_is_read() {
        let converters = ConversionRegistry::new();
        let mut watch = MemoryWatch::new("HEXPattern", 0x1000, MAX_WATCH_SIZE);

        let outcome = watch.read_memory(&DeadMemory, &converters);

        assert!(outcome.display().contains("invalid handle"));
    }

    #[test]
    fn test_base_address_hex() {
        let watch = MemoryWatch::new("Int8", 0xDEAD_BEEF, 1);
        assert_eq!(watch.base_address_hex(), "0xDEADBEEF");
    }

    #[test]
    fn test_view_serializes_tagged_kind() {
        let object = WatchObject::new(NewWatch::category(WatchHandle::new(1), "Player"), "Player".into(), 1);
        let json = serde_json::to_value(object.view()).unwrap();
        assert_eq!(json["kind"], "category");
        assert_eq!(json["handle"], 1);
        assert!(json.get("children").is_none());
    }
}
