//! Ephemeral port allocation.
//!
//! The OS picks a free port for a throwaway listener, which is closed again
//! before the server binds it. Another process may grab the port in between;
//! that shows up as a startup failure of the server.

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use std::net::TcpListener;
use tracing::debug;

/// Ask the OS for a free TCP port on localhost.
pub fn allocate_port() -> Result<u16> {
    let listener = TcpListener::bind((HarnessConfig::LOCALHOST, 0)).map_err(|e| {
        HarnessError::Io {
            message: format!("bind ephemeral listener: {}", e),
            source: Some(e),
        }
    })?;
    let port = listener.local_addr()?.port();
    drop(listener);

    debug!("Allocated ephemeral port {}", port);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocated_port_is_concrete() {
        let port = allocate_port().unwrap();
        assert_ne!(port, 0);
    }

    #[test]
    fn test_allocated_port_is_bindable() {
        let port = allocate_port().unwrap();
        // Released immediately, so it can be bound again
        let listener = TcpListener::bind((HarnessConfig::LOCALHOST, port));
        assert!(listener.is_ok());
    }

    #[test]
    fn test_held_ports_are_distinct() {
        // While a port is held open, the OS never hands it out again
        let held = TcpListener::bind((HarnessConfig::LOCALHOST, allocate_port().unwrap())).unwrap();
        let held_port = held.local_addr().unwrap().port();
        for _ in 0..16 {
            assert_ne!(allocate_port().unwrap(), held_port);
        }
    }
}
