//! Run a test body before and after a dump-and-reload.
//!
//! ```rust,no_run
//! # use disposable_redis::{DisposableRedis, InstanceConfig, Result};
//! # fn demo(server: &DisposableRedis) -> Result<()> {
//! let mut client = server.client()?;
//! client.set("k", "v")?;
//! for phase in client.retry_with_reload() {
//!     let phase = phase?;
//!     assert_eq!(client.get("k")?.as_deref(), Some("v"), "phase {}", phase.value());
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::process::DisposableRedis;
use std::iter::FusedIterator;

/// Which pass of a reload-retry loop is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReloadPhase {
    /// Against the state as written.
    First,
    /// Against the state after `SAVE` + `DEBUG RELOAD`.
    Retry,
}

impl ReloadPhase {
    /// 1 for the first pass, 2 for the retry.
    pub fn value(self) -> u8 {
        match self {
            ReloadPhase::First => 1,
            ReloadPhase::Retry => 2,
        }
    }
}

impl std::fmt::Display for ReloadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    First,
    Reload,
    Done,
}

/// Iterator yielding [`ReloadPhase::First`], then reloading the server and
/// yielding [`ReloadPhase::Retry`].
///
/// If the reload fails, the second item is the error and iteration ends.
#[derive(Debug)]
pub struct ReloadRetry<'a> {
    server: &'a DisposableRedis,
    step: Step,
}

impl<'a> ReloadRetry<'a> {
    pub(crate) fn new(server: &'a DisposableRedis) -> Self {
        Self {
            server,
            step: Step::First,
        }
    }
}

impl Iterator for ReloadRetry<'_> {
    type Item = Result<ReloadPhase>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step {
            Step::First => {
                self.step = Step::Reload;
                Some(Ok(ReloadPhase::First))
            }
            Step::Reload => {
                self.step = Step::Done;
                Some(self.server.dump_and_reload().map(|()| ReloadPhase::Retry))
            }
            Step::Done => None,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match self.step {
            Step::First => 2,
            Step::Reload => 1,
            Step::Done => 0,
        };
        (remaining, Some(remaining))
    }
}

impl FusedIterator for ReloadRetry<'_> {}
