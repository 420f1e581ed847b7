//! Error types for the disposable server harness.
//!
//! Startup and reload failures are always surfaced to the caller. Errors hit
//! while tearing an instance down never reach this type; `stop()` swallows them.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    // Lifecycle errors
    #[error("Server process exited before becoming ready ({status}). Server output: {output}")]
    StartupFailed {
        /// Human-readable exit status, or the spawn failure.
        status: String,
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// Captured stdout (empty in verbose mode).
        output: String,
    },

    #[error("Server on port {port} did not become ready within {waited:?}")]
    ReadyTimeout { port: u16, waited: Duration },

    #[error("Server has not been started")]
    NotStarted,

    #[error("Server was already started; build a new instance to restart")]
    AlreadyStarted,

    // Protocol errors
    #[error("Connection to 127.0.0.1:{port} failed: {message}")]
    Connection {
        port: u16,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Server replied with error: {0}")]
    Server(String),

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Dump and reload failed: {source}")]
    Reload {
        #[source]
        source: Box<HarnessError>,
    },

    // Build errors
    #[error("Couldn't compile module {}: {message}", .module.display())]
    Compile { module: PathBuf, message: String },

    // OS-level errors (sockets, signals)
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        HarnessError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl HarnessError {
    /// Create a connection error for the given port.
    pub fn connection(port: u16, err: std::io::Error) -> Self {
        HarnessError::Connection {
            port,
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        HarnessError::Protocol {
            message: message.into(),
        }
    }

    /// Wrap an error raised while persisting or reloading server state.
    pub fn reload(err: HarnessError) -> Self {
        HarnessError::Reload {
            source: Box::new(err),
        }
    }

    /// Check if this error means "not ready yet" rather than a real failure.
    ///
    /// Covers a server that is not listening yet and one still loading its
    /// dataset (`-LOADING`). The readiness loop keeps polling on these and
    /// never surfaces them.
    pub fn is_retryable(&self) -> bool {
        match self {
            HarnessError::Connection { .. } => true,
            HarnessError::Server(message) => message.starts_with("LOADING"),
            _ => false,
        }
    }

    /// Error message carried by a server error reply, if this is one.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            HarnessError::Server(message) => Some(message),
            HarnessError::Reload { source } => source.server_message(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HarnessError::StartupFailed {
            status: "exit status: 3".into(),
            exit_code: Some(3),
            output: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "Server process exited before becoming ready (exit status: 3). Server output: boom"
        );
    }

    #[test]
    fn test_retryable_errors() {
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert!(HarnessError::connection(6379, refused).is_retryable());
        assert!(!HarnessError::NotStarted.is_retryable());
        assert!(!HarnessError::Server("ERR nope".into()).is_retryable());
    }

    #[test]
    fn test_loading_reply_is_retryable() {
        let loading = HarnessError::Server("LOADING Redis is loading the dataset in memory".into());
        assert!(loading.is_retryable());
        // Only while starting up; a reload failure stays fatal
        assert!(!HarnessError::reload(loading).is_retryable());
    }

    #[test]
    fn test_reload_wraps_server_message() {
        let err = HarnessError::reload(HarnessError::Server("ERR bad rdb".into()));
        assert_eq!(err.server_message(), Some("ERR bad rdb"));
        assert!(err.to_string().contains("ERR bad rdb"));
    }
}
