//! Server process supervision.
//!
//! [`DisposableRedis`] owns one server process from spawn to teardown:
//!
//! 1. **Port** - the requested port, or an ephemeral one from the OS
//! 2. **Spawn** - `--port`, `--save ""`, `--dbfilename dump.<port>.rdb`, then extra args
//! 3. **Readiness** - `PING` every 100ms until it answers or the process exits
//! 4. **Teardown** - SIGTERM without waiting, dump file removed if one was made

mod output;
mod supervisor;

pub use output::OutputCapture;
pub use supervisor::{build_command_line, CommandLine, DisposableRedis};
