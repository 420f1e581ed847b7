//! Centralized configuration for the harness.
//!
//! Constants live on [`HarnessConfig`]. Environment overrides are read once
//! into [`HarnessSettings`] when a supervisor is built, so lifecycle methods
//! never consult the process environment. Per-instance options live on
//! [`InstanceConfig`].

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Harness-level constants.
pub struct HarnessConfig;

impl HarnessConfig {
    pub const DEFAULT_SERVER_PATH: &'static str = "redis-server";
    pub const LOCALHOST: &'static str = "127.0.0.1";

    // Readiness polling
    pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

    // Environment overrides
    pub const ENV_VERBOSE: &'static str = "REDIS_VERBOSE";
    pub const ENV_DEBUGGER: &'static str = "REDIS_DEBUGGER";
    pub const ENV_SERVER_PATH: &'static str = "REDIS_PATH";

    /// Name of the dump file used by an instance bound to `port`.
    pub fn dump_file_name(port: u16) -> String {
        format!("dump.{}.rdb", port)
    }
}

/// Overrides taken from the environment, captured once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarnessSettings {
    /// Inherit the server's stdout instead of capturing it.
    pub verbose: bool,
    /// Wrapper command line (e.g. `gdb --args`) prefixed to the server argv.
    pub debugger: Option<Vec<String>>,
    /// Server executable used when the instance config names none.
    pub server_path: Option<PathBuf>,
}

impl HarnessSettings {
    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through an arbitrary lookup function.
    ///
    /// `REDIS_VERBOSE` is an integer; any non-zero value enables verbose mode.
    /// When unset, verbose mode follows whether a debugger is configured.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let debugger = lookup(HarnessConfig::ENV_DEBUGGER)
            .map(|line| {
                line.split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|words| !words.is_empty());

        let verbose = match lookup(HarnessConfig::ENV_VERBOSE) {
            Some(value) => value.trim().parse::<i64>().map(|v| v != 0).unwrap_or(false),
            None => debugger.is_some(),
        };

        let server_path = lookup(HarnessConfig::ENV_SERVER_PATH)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        Self {
            verbose,
            debugger,
            server_path,
        }
    }
}

/// Value attached to an extra `--flag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    /// A single positional token.
    Single(String),
    /// Several positional tokens, expanded in order after the flag.
    List(Vec<String>),
}

impl ArgValue {
    fn tokens(&self) -> &[String] {
        match self {
            ArgValue::Single(value) => std::slice::from_ref(value),
            ArgValue::List(values) => values,
        }
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Single(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Single(value)
    }
}

impl From<&Path> for ArgValue {
    fn from(value: &Path) -> Self {
        ArgValue::Single(value.to_string_lossy().into_owned())
    }
}

impl From<Vec<String>> for ArgValue {
    fn from(values: Vec<String>) -> Self {
        ArgValue::List(values)
    }
}

impl From<Vec<&str>> for ArgValue {
    fn from(values: Vec<&str>) -> Self {
        ArgValue::List(values.into_iter().map(str::to_string).collect())
    }
}

/// Configuration for one disposable server instance.
#[derive(Debug, Clone, Default)]
pub struct InstanceConfig {
    /// Port to listen on. `None` or `Some(0)` allocates an ephemeral port.
    pub port: Option<u16>,
    /// Server executable. Falls back to `REDIS_PATH`, then `redis-server`.
    pub executable: Option<PathBuf>,
    /// Extra `--key value...` pairs, passed in order.
    pub extra_args: Vec<(String, ArgValue)>,
    /// Working directory of the server; the dump file is written here.
    pub working_dir: Option<PathBuf>,
    /// Give up waiting for readiness after this long. `None` waits forever.
    pub ready_timeout: Option<Duration>,
}

impl InstanceConfig {
    /// Create a config that allocates a port and uses the default executable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a fixed port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the server executable.
    pub fn with_executable(mut self, path: impl AsRef<Path>) -> Self {
        self.executable = Some(path.as_ref().to_path_buf());
        self
    }

    /// Append an extra `--key value...` argument.
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.extra_args.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set the readiness timeout.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = Some(timeout);
        self
    }

    /// The port requested by the caller, treating 0 as "allocate".
    pub fn requested_port(&self) -> Option<u16> {
        self.port.filter(|p| *p != 0)
    }

    /// Resolve the executable, honoring the environment override.
    pub fn resolve_executable(&self, settings: &HarnessSettings) -> PathBuf {
        self.executable
            .clone()
            .or_else(|| settings.server_path.clone())
            .unwrap_or_else(|| PathBuf::from(HarnessConfig::DEFAULT_SERVER_PATH))
    }

    /// Expand the extra arguments into `--key v1 v2...` tokens.
    pub fn expand_extra_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for (key, value) in &self.extra_args {
            args.push(format!("--{}", key));
            args.extend(value.tokens().iter().cloned());
        }
        args
    }
}
