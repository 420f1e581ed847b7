//! Platform abstraction layer.
//!
//! All `#[cfg]` blocks for OS-specific process handling live here rather than
//! in the supervisor.
//!
//! - **Linux/macOS**: signals via `nix`
//! - **Windows**: `Child::kill` (no graceful terminate)

pub mod process;

pub use process::request_terminate;
