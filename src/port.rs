//! Port probing for startup.
//!
//! Probing binds a throwaway listener and drops it right away, so there is a
//! window between a successful probe and the real bind in which another
//! process can take the port. Callers retry on bind failure instead of
//! treating that as a bug.

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("No available port in {start}..={end} ({attempts} attempts)")]
    NoPortAvailable { start: u16, end: u16, attempts: u16 },
}

/// Check if a port is available for binding on all interfaces.
pub fn is_port_available(port: u16) -> bool {
    std::net::TcpListener::bind(("0.0.0.0", port)).is_ok()
}

/// Find the first free port in `start..start + max_attempts`.
pub fn find_available_port(start: u16, max_attempts: u16) -> Result<u16, PortError> {
    find_available_port_with(start, max_attempts, is_port_available)
}

/// Same as [`find_available_port`] with an injectable probe.
///
/// Ports are probed one at a time in ascending order. The window is cut
/// short at `u16::MAX`.
pub fn find_available_port_with<F>(
    start: u16,
    max_attempts: u16,
    mut probe: F,
) -> Result<u16, PortError>
where
    F: FnMut(u16) -> bool,
{
    let mut attempt: u16 = 0;
    let mut last = start;

    while attempt < max_attempts {
        let Some(port) = start.checked_add(attempt) else {
            break;
        };
        last = port;

        if probe(port) {
            return Ok(port);
        }

        debug!("Port {} is in use", port);
        attempt += 1;
    }

    Err(PortError::NoPortAvailable {
        start,
        end: last,
        attempts: attempt,
    })
}
