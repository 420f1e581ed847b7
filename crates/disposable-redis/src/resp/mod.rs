//! Minimal RESP (REdis Serialization Protocol) support.
//!
//! Only what the harness needs: encoding commands as arrays of bulk strings
//! and decoding replies. The stub server reuses the same framing to parse
//! requests and write replies.

pub mod protocol;

pub use protocol::{encode_command, read_value, write_value, Value};
