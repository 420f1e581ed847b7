//! Disposable server lifecycle: spawn, readiness, persistence checks, teardown.

use super::output::OutputCapture;
use crate::client::Client;
use crate::config::{HarnessConfig, HarnessSettings, InstanceConfig};
use crate::error::{HarnessError, Result};
use crate::network::allocate_port;
use crate::platform;
use std::cell::Cell;
use std::fs;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long teardown waits for the server to close stdout before reporting.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Program and arguments used to launch one server instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// The debugger when one is configured, otherwise the server executable.
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// Build the full server command line for an instance bound to `port`.
///
/// `<debugger...> <exe> --port N --save "" --dbfilename dump.N.rdb [--key val...]`
pub fn build_command_line(
    config: &InstanceConfig,
    settings: &HarnessSettings,
    port: u16,
) -> CommandLine {
    let executable = config
        .resolve_executable(settings)
        .to_string_lossy()
        .into_owned();

    let mut prefix = settings.debugger.clone().unwrap_or_default().into_iter();
    let (program, mut args) = match prefix.next() {
        Some(debugger) => (debugger, prefix.chain([executable]).collect()),
        None => (executable, Vec::new()),
    };

    args.extend([
        "--port".to_string(),
        port.to_string(),
        "--save".to_string(),
        String::new(),
        "--dbfilename".to_string(),
        HarnessConfig::dump_file_name(port),
    ]);
    args.extend(config.expand_extra_args());
    CommandLine { program, args }
}

/// A throwaway server instance owned by the test that created it.
///
/// The instance is stopped when [`stop`](Self::stop) is called or when the
/// supervisor is dropped, whichever comes first. A stopped supervisor cannot
/// be started again.
///
/// ```rust,no_run
/// use disposable_redis::{DisposableRedis, HarnessError, InstanceConfig};
///
/// let mut server = DisposableRedis::new(InstanceConfig::new());
/// server.scoped(|client| -> Result<(), HarnessError> {
///     client.set("greeting", "hello")?;
///     for phase in client.retry_with_reload() {
///         phase?;
///         assert_eq!(client.get("greeting")?.as_deref(), Some("hello"));
///     }
///     Ok(())
/// })?;
/// # Ok::<(), HarnessError>(())
/// ```
#[derive(Debug)]
pub struct DisposableRedis {
    config: InstanceConfig,
    settings: HarnessSettings,
    /// Port actually in use; set once, before spawn.
    port: Option<u16>,
    dump_file: Option<PathBuf>,
    child: Option<Child>,
    output: Option<OutputCapture>,
    dumped: Cell<bool>,
    errored: Cell<bool>,
}

impl DisposableRedis {
    /// Create a supervisor, reading overrides from the environment.
    pub fn new(config: InstanceConfig) -> Self {
        Self::with_settings(config, HarnessSettings::from_env())
    }

    /// Create a supervisor with explicit overrides.
    pub fn with_settings(config: InstanceConfig, settings: HarnessSettings) -> Self {
        Self {
            config,
            settings,
            port: None,
            dump_file: None,
            child: None,
            output: None,
            dumped: Cell::new(false),
            errored: Cell::new(false),
        }
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    /// Port the server was started on.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Path of the dump file, relative to the harness's working directory.
    pub fn dump_file(&self) -> Option<&Path> {
        self.dump_file.as_deref()
    }

    /// PID of the server process, while it is owned.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Whether a process is owned (started and not yet stopped).
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Whether a `SAVE` was issued; controls dump file removal on stop.
    pub fn has_dumped(&self) -> bool {
        self.dumped.get()
    }

    /// Whether a persist/reload command failed.
    pub fn has_errored(&self) -> bool {
        self.errored.get()
    }

    /// Server stdout captured so far. Empty in verbose mode.
    pub fn captured_output(&self) -> String {
        self.output
            .as_ref()
            .map(OutputCapture::snapshot)
            .unwrap_or_default()
    }

    /// Start the server and block until it answers `PING`.
    ///
    /// Fails with [`HarnessError::StartupFailed`] if the process cannot be
    /// spawned or exits before becoming ready. Without a configured
    /// `ready_timeout` this waits for as long as the process stays alive.
    pub fn start(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Err(HarnessError::AlreadyStarted);
        }

        let port = match self.config.requested_port() {
            Some(port) => port,
            None => allocate_port()?,
        };
        self.port = Some(port);

        let dump_name = HarnessConfig::dump_file_name(port);
        self.dump_file = Some(match &self.config.working_dir {
            Some(dir) => dir.join(&dump_name),
            None => PathBuf::from(&dump_name),
        });

        let command = build_command_line(&self.config, &self.settings, port);
        self.spawn(&command)?;
        self.wait_until_ready(port)
    }

    fn spawn(&mut self, command: &CommandLine) -> Result<()> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        if self.settings.verbose {
            cmd.stdout(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::piped());
        }

        info!("Starting server: {}", command);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to spawn server process: {}", e);
                return Err(HarnessError::StartupFailed {
                    status: format!("failed to spawn {}: {}", command.program, e),
                    exit_code: None,
                    output: String::new(),
                });
            }
        };

        let output = match child.stdout.take() {
            Some(stdout) => OutputCapture::drain(stdout),
            None => OutputCapture::inherited(),
        };

        info!("Launched server with PID {}", child.id());
        self.child = Some(child);
        self.output = Some(output);
        Ok(())
    }

    /// Poll with `PING` until the server answers or the process dies.
    fn wait_until_ready(&mut self, port: u16) -> Result<()> {
        let started = Instant::now();
        debug!("Waiting for server on port {} to become ready...", port);

        loop {
            match self.client()?.ping() {
                Ok(()) => {
                    info!("Server on port {} is ready after {:?}", port, started.elapsed());
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {}
                Err(e) => return Err(e),
            }

            let exited = match self.child.as_mut() {
                Some(child) => child.try_wait()?,
                None => return Err(HarnessError::NotStarted),
            };
            if let Some(status) = exited {
                self.child = None;
                let output = self
                    .output
                    .as_mut()
                    .map(|o| o.collect(OUTPUT_DRAIN_TIMEOUT))
                    .unwrap_or_default();
                error!("Server process exited before becoming ready: {}", status);
                return Err(HarnessError::StartupFailed {
                    status: status.to_string(),
                    exit_code: status.code(),
                    output,
                });
            }

            if let Some(limit) = self.config.ready_timeout {
                let waited = started.elapsed();
                if waited >= limit {
                    warn!("Server did not become ready within {:?}", limit);
                    self.stop();
                    return Err(HarnessError::ReadyTimeout { port, waited });
                }
            }

            std::thread::sleep(HarnessConfig::READY_POLL_INTERVAL);
        }
    }

    /// Ask the server to terminate and remove the dump file if one was made.
    ///
    /// Does not wait for the process to exit. Never fails; teardown problems
    /// are logged and swallowed. Safe to call repeatedly and after a failed
    /// `start()`.
    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = platform::request_terminate(&mut child) {
                warn!("Failed to terminate server process {}: {}", child.id(), e);
            }
            // Reap if it is already gone; otherwise leave it.
            let _ = child.try_wait();
        }

        if self.dumped.get() {
            if let Some(path) = &self.dump_file {
                match fs::remove_file(path) {
                    Ok(()) => debug!("Removed dump file {}", path.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => debug!("Ignoring failure to remove {}: {}", path.display(), e),
                }
            }
        }
    }

    /// Persist the server's state to disk and load it back.
    ///
    /// Any failure of `SAVE` or `DEBUG RELOAD` marks the instance as errored
    /// and comes back as [`HarnessError::Reload`].
    pub fn dump_and_reload(&self) -> Result<()> {
        let mut conn = self.client()?;

        let saved = conn.save();
        // The dump file may exist even if SAVE reported a failure.
        self.dumped.set(true);
        if let Err(e) = saved {
            self.errored.set(true);
            return Err(HarnessError::reload(e));
        }

        if let Err(e) = conn.debug_reload() {
            self.errored.set(true);
            return Err(HarnessError::reload(e));
        }

        debug!("Dump and reload succeeded on port {:?}", self.port);
        Ok(())
    }

    /// A client bound to the running instance.
    ///
    /// No connection is made until the first command.
    pub fn client(&self) -> Result<Client<'_>> {
        let port = self.port.ok_or(HarnessError::NotStarted)?;
        Ok(Client::new(self, port))
    }

    /// Start the server, run `body` against it, and always stop it.
    ///
    /// If `body` fails or panics, or a reload failed along the way, the
    /// captured server output is written to stderr before the failure is
    /// returned (or the panic resumed).
    pub fn scoped<T, E, F>(&mut self, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Client<'_>) -> std::result::Result<T, E>,
        E: From<HarnessError>,
    {
        if let Err(e) = self.start() {
            self.stop();
            return Err(e.into());
        }

        let outcome = {
            let this = &*self;
            panic::catch_unwind(AssertUnwindSafe(move || {
                let mut client = this.client()?;
                body(&mut client)
            }))
        };

        let failed = !matches!(outcome, Ok(Ok(_)));
        self.stop();
        if failed || self.errored.get() {
            self.report_output();
        }

        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Write captured server output to stderr. Best effort.
    fn report_output(&mut self) {
        let output = match self.output.as_mut() {
            Some(capture) if !capture.is_inherited() => capture.collect(OUTPUT_DRAIN_TIMEOUT),
            _ => String::new(),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "Redis output: {}", output);
    }
}

impl Drop for DisposableRedis {
    fn drop(&mut self) {
        if self.child.is_none() {
            return;
        }
        let report = std::thread::panicking() || self.errored.get();
        self.stop();
        if report {
            self.report_output();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> HarnessSettings {
        HarnessSettings::default()
    }

    #[test]
    fn test_command_line_layout() {
        let config = InstanceConfig::new()
            .with_executable("/usr/local/bin/redis-server")
            .with_arg("loadmodule", vec!["./tm.so", "A"]);

        let command = build_command_line(&config, &quiet(), 6390);
        assert_eq!(command.program, "/usr/local/bin/redis-server");
        assert_eq!(
            command.argv(),
            vec![
                "/usr/local/bin/redis-server",
                "--port",
                "6390",
                "--save",
                "",
                "--dbfilename",
                "dump.6390.rdb",
                "--loadmodule",
                "./tm.so",
                "A",
            ]
        );
    }

    #[test]
    fn test_command_line_with_debugger_prefix() {
        let settings = HarnessSettings {
            verbose: true,
            debugger: Some(vec!["gdb".into(), "--args".into()]),
            server_path: None,
        };
        let command = build_command_line(&InstanceConfig::new(), &settings, 7000);
        assert_eq!(command.program, "gdb");
        assert_eq!(&command.args[..3], ["--args", "redis-server", "--port"]);
        assert_eq!(command.args[3], "7000");
        assert!(command.to_string().starts_with("gdb --args redis-server --port 7000"));
    }

    #[test]
    fn test_client_before_start_is_rejected() {
        let server = DisposableRedis::with_settings(InstanceConfig::new(), quiet());
        assert!(matches!(server.client(), Err(HarnessError::NotStarted)));
        assert!(server.port().is_none());
        assert!(!server.is_running());
    }

    #[test]
    fn test_stop_before_start_is_harmless() {
        let mut server = DisposableRedis::with_settings(InstanceConfig::new(), quiet());
        server.stop();
        server.stop();
        assert!(!server.is_running());
    }

    #[test]
    fn test_missing_executable_is_startup_failure() {
        let config = InstanceConfig::new().with_executable("/nonexistent/redis-server");
        let mut server = DisposableRedis::with_settings(config, quiet());

        match server.start() {
            Err(HarnessError::StartupFailed {
                status, exit_code, ..
            }) => {
                assert!(status.contains("failed to spawn"));
                assert!(exit_code.is_none());
            }
            other => panic!("Expected StartupFailed, got: {:?}", other),
        }

        // Port was resolved before the spawn failed
        assert!(server.port().is_some_and(|p| p != 0));
        assert!(matches!(server.start(), Err(HarnessError::AlreadyStarted)));
        server.stop();
    }

    #[test]
    fn test_dump_file_follows_working_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = InstanceConfig::new()
            .with_port(6555)
            .with_working_dir(dir.path())
            .with_executable("/nonexistent/redis-server");
        let mut server = DisposableRedis::with_settings(config, quiet());

        assert!(server.start().is_err());
        assert_eq!(server.dump_file(), Some(dir.path().join("dump.6555.rdb").as_path()));
    }
}
