//! Disposable Redis - throwaway server instances for integration tests.
//!
//! Each [`DisposableRedis`] launches its own server process on an isolated
//! port, blocks until the server answers, and tears it down again on every
//! exit path. [`DisposableRedis::dump_and_reload`] forces the server through a
//! save/reload cycle so serialization bugs surface as command errors.
//!
//! # Example
//!
//! ```rust,no_run
//! use disposable_redis::{DisposableRedis, InstanceConfig};
//!
//! fn main() -> disposable_redis::Result<()> {
//!     let config = InstanceConfig::new().with_arg("loadmodule", "./mymodule.so");
//!     let mut server = DisposableRedis::new(config);
//!
//!     server.scoped(|client| -> disposable_redis::Result<()> {
//!         client.set("key", "value")?;
//!         client.with_reload(|client, _phase| {
//!             assert_eq!(client.get("key")?.as_deref(), Some("value"));
//!             Ok(())
//!         })
//!     })
//! }
//! ```
//!
//! # Environment
//!
//! Read once when a supervisor is built:
//! - `REDIS_VERBOSE` - non-zero lets server stdout through instead of capturing it
//! - `REDIS_DEBUGGER` - command line prefixed to the server's (e.g. `gdb --args`)
//! - `REDIS_PATH` - server executable when the config names none

pub mod client;
pub mod config;
pub mod error;
pub mod module_build;
pub mod network;
pub mod platform;
pub mod process;
pub mod reload;
pub mod resp;

// Re-export commonly used types
pub use client::Client;
pub use config::{ArgValue, HarnessConfig, HarnessSettings, InstanceConfig};
pub use error::{HarnessError, Result};
pub use module_build::ModuleBuild;
pub use network::allocate_port;
pub use process::DisposableRedis;
pub use reload::{ReloadPhase, ReloadRetry};
pub use resp::Value;
