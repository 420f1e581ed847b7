//! Platform-specific process signalling.

use crate::error::{HarnessError, Result};
use std::process::Child;
use tracing::debug;

/// Ask a child process to terminate, without waiting for it.
///
/// # Platform Behavior
/// - **Linux/macOS**: sends SIGTERM so the server can shut down cleanly
/// - **Windows**: there is no graceful signal; falls back to `Child::kill`
///
/// A process that has already exited is not an error.
pub fn request_terminate(child: &mut Child) -> Result<()> {
    let pid = child.id();

    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| HarnessError::Io {
            message: format!("pid {} out of range", pid),
            source: None,
        })?;

        debug!("Sending SIGTERM to process {}", pid);
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(HarnessError::Io {
                message: format!("send SIGTERM to {}: {}", pid, e),
                    source: Some(std::io::Error::from(e)),
            }),
        }
    }

    #[cfg(not(unix))]
    {
        debug!("Killing process {}", pid);
        match child.kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(HarnessError::from(e)),
        }
    }
}
