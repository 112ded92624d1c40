//! Best-effort privilege check performed once at startup.
//!
//! Nothing here changes privileges; the report only explains up front which
//! memory reads are likely to fail. Callers log it and carry on.

use serde::Serialize;
use tracing::{info, warn};

#[cfg(target_os = "linux")]
const PTRACE_SCOPE_PATH: &str = "/proc/sys/kernel/yama/ptrace_scope";

/// What the server learned about its ability to read other processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrivilegeReport {
    /// Running with effective uid 0
    pub effective_root: bool,
    /// Yama ptrace scope (0-3), when the kernel exposes it
    pub ptrace_scope: Option<u8>,
}

impl PrivilegeReport {
    /// Whether reads of non-child processes owned by the same user should work.
    #[must_use]
    pub fn can_read_unrelated(&self) -> bool {
        match self.ptrace_scope {
            None | Some(0) => true,
            Some(1) | Some(2) => self.effective_root,
            Some(_) => false,
        }
    }
}

/// Inspects the current privileges and logs the outcome.
pub fn elevate() -> PrivilegeReport {
    let report = PrivilegeReport {
        effective_root: effective_root(),
        ptrace_scope: ptrace_scope(),
    };

    if report.can_read_unrelated() {
        info!(
            effective_root = report.effective_root,
            ptrace_scope = ?report.ptrace_scope,
            "Process memory access available"
        );
    } else {
        warn!(
            effective_root = report.effective_root,
            ptrace_scope = ?report.ptrace_scope,
            "Reading memory of registered processes will likely fail; run as root or lower kernel.yama.ptrace_scope"
        );
    }

    report
}

#[cfg(unix)]
fn effective_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn effective_root() -> bool {
    false
}

#[cfg(target_os = "linux")]
fn ptrace_scope() -> Option<u8> {
    std::fs::read_to_string(PTRACE_SCOPE_PATH)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(not(target_os = "linux"))]
fn ptrace_scope() -> Option<u8> {
    None
}
