//! OS process-memory access.
//!
//! The server only ever needs two things from the OS: open a process by
//! pid, and read N bytes at an address of an opened process. Both sit
//! behind traits so tests can substitute a fake.
//!
//! On Linux reads go through `/proc/<pid>/mem` via `procfs`. Other
//! platforms report [`MemoryError::Unsupported`].

use std::sync::Arc;

use thiserror::Error;

/// Errors from opening or reading process memory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// No process with this pid exists
    #[error("Process not found: {pid}")]
    ProcessNotFound { pid: u64 },

    /// The process exists but may not be inspected
    #[error("Access denied to process {pid}: {reason}")]
    AccessDenied { pid: u64, reason: String },

    /// A read at an address failed
    #[error("Failed to read {size} bytes at 0x{address:X}: {reason}")]
    ReadFailed {
        address: u64,
        size: usize,
        reason: String,
    },

    /// The pid cannot name a process on this platform
    #[error("Invalid process id: {pid}")]
    InvalidPid { pid: u64 },

    /// No memory access on this platform
    #[error("Process memory access is not supported on this platform")]
    Unsupported,
}

/// Opens processes for reading.
pub trait MemoryAccess: Send + Sync {
    /// Opens the process with the given id.
    fn open(&self, pid: u64) -> Result<Arc<dyn ProcessMemory>, MemoryError>;
}

/// An opened process whose memory can be read.
pub trait ProcessMemory: Send + Sync {
    fn pid(&self) -> u64;

    /// Short executable name of the process.
    fn name(&self) -> String;

    /// Reads exactly `size` bytes starting at `address`.
    fn read(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError>;
}

/// Returns the memory access implementation for the current platform.
pub fn platform_memory() -> Arc<dyn MemoryAccess> {
    Arc::new(PlatformMemory)
}

/// Memory access backed by the running OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformMemory;

#[cfg(target_os = "linux")]
mod linux {
    use std::fs::File;
    use std::os::unix::fs::FileExt;
    use std::sync::Arc;

    use procfs::process::Process;
    use procfs::ProcError;
    use tracing::debug;

    use super::{MemoryAccess, MemoryError, PlatformMemory, ProcessMemory};
    use crate::watch::MAX_WATCH_SIZE;

    impl MemoryAccess for PlatformMemory {
        fn open(&self, pid: u64) -> Result<Arc<dyn ProcessMemory>, MemoryError> {
            let raw_pid = i32::try_from(pid)
                .ok()
                .filter(|p| *p > 0)
                .ok_or(MemoryError::InvalidPid { pid })?;

            let process = Process::new(raw_pid).map_err(|e| proc_error(pid, e))?;
            let name = process
                .stat()
                .map(|stat| stat.comm)
                .unwrap_or_else(|_| format!("pid {pid}"));
            let mem = process.mem().map_err(|e| proc_error(pid, e))?;

            debug!(pid, name = %name, "Opened process memory");

            Ok(Arc::new(ProcfsMemory { pid, name, mem }))
        }
    }

    fn proc_error(pid: u64, error: ProcError) -> MemoryError {
        match error {
            ProcError::NotFound(_) => MemoryError::ProcessNotFound { pid },
            ProcError::PermissionDenied(_) => MemoryError::AccessDenied {
                pid,
                reason: "permission denied (ptrace access required)".to_string(),
            },
            other => MemoryError::AccessDenied {
                pid,
                reason: other.to_string(),
            },
        }
    }

    /// An opened `/proc/<pid>/mem`.
    struct ProcfsMemory {
        pid: u64,
        name: String,
        mem: File,
    }

    impl ProcessMemory for ProcfsMemory {
        fn pid(&self) -> u64 {
            self.pid
        }

        fn name(&self) -> String {
            self.name.clone()
        }

        fn read(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
            let failed = |reason: String| MemoryError::ReadFailed {
                address,
                size,
                reason,
            };

            if size > MAX_WATCH_SIZE as usize {
                return Err(failed(format!("exceeds the {MAX_WATCH_SIZE}-byte read limit")));
            }

            let mut buf = vec![0u8; size];
            let mut filled = 0;

            while filled < size {
                let offset = address
                    .checked_add(filled as u64)
                    .ok_or_else(|| failed("address overflow".to_string()))?;

                let Some(tail) = buf.get_mut(filled..) else {
                    break;
                };

                match self.mem.read_at(tail, offset) {
                    Ok(0) => return Err(failed(format!("short read ({filled} bytes)"))),
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(failed(e.to_string())),
                }
            }

            Ok(buf)
        }
    }
}

#[cfg(not(target_os = "linux"))]
impl MemoryAccess for PlatformMemory {
    fn open(&self, _pid: u64) -> Result<Arc<dyn ProcessMemory>, MemoryError> {
        Err(MemoryError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = MemoryError::ReadFailed {
            address: 0x1F,
            size: 4,
            reason: "Input/output error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to read 4 bytes at 0x1F: Input/output error"
        );
        assert_eq!(
            MemoryError::ProcessNotFound { pid: 12 }.to_string(),
            "Process not found: 12"
        );
    }

    #[test]
    fn test_open_rejects_invalid_pids() {
        let memory = platform_memory();
        assert!(memory.open(0).is_err());
        assert!(memory.open(u64::MAX).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_read_own_memory() {
        let value: u64 = 0x1122_3344_5566_7788;
        let address = &value as *const u64 as u64;

        let process = platform_memory()
            .open(std::process::id() as u64)
            .expect("open self");
        assert_eq!(process.pid(), std::process::id() as u64);
        assert!(!process.name().is_empty());

        let bytes = process.read(address, 8).expect("read self");
        assert_eq!(bytes, value.to_le_bytes());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_read_unmapped_address_fails() {
        let process = platform_memory()
            .open(std::process::id() as u64)
            .expect("open self");

        let err = process.read(0, 4).unwrap_err();
        assert!(matches!(err, MemoryError::ReadFailed { address: 0, size: 4, .. }));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_oversized_read_fails_before_allocating() {
        let value: u64 = 7;
        let address = &value as *const u64 as u64;
        let process = platform_memory()
            .open(std::process::id() as u64)
            .expect("open self");

        let err = process.read(address, usize::MAX).unwrap_err();
        match err {
            MemoryError::ReadFailed { reason, .. } => assert!(reason.contains("limit")),
            other => panic!("expected ReadFailed, got {other:?}"),
        }
    }
}
