use std::net::{Ipv4Addr, TcpListener};
use tracing::debug;

use crate::error::RunError;

pub const DEFAULT_PORT_START: u16 = 4411;
pub const DEFAULT_PORT_RANGE: u16 = 64;

/// Returns the lowest port in `start..start + range` that a listener on
/// loopback can bind. The probe socket is released immediately, so the port
/// is not reserved for the caller.
pub fn find_available_port(start: u16, range: u16) -> Result<u16, RunError> {
    let end = start.saturating_add(range.saturating_sub(1));

    if range > 0 {
        for port in start..=end {
            if is_port_available(port) {
                debug!("Port {} is available", port);
                return Ok(port);
            }
        }
    }

    Err(RunError::NoAvailablePort { start, end })
}

fn is_port_available(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}
