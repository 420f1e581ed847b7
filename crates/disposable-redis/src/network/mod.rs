//! Network helpers for the harness.
//!
//! Currently just ephemeral port allocation; the wire protocol lives in
//! [`crate::resp`].

mod port;

pub use port::allocate_port;
