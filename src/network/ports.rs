//! Advisory free-port allocation

use crate::error::{DiscoveryError, Result};
use rand::Rng;
use std::net::{IpAddr, SocketAddr, TcpListener};
use tracing::debug;

/// Pick a random TCP port in `[low, high)` that can currently be bound on `address`
///
/// The test socket is released before returning, so the port is only
/// advisory: another process may grab it before the caller binds again, and
/// callers must be ready to retry. Gives up after a number of attempts
/// proportional to the range size.
pub fn allocate_free_port(low: u16, high: u16, address: IpAddr) -> Result<u16> {
    if low >= high {
        return Err(DiscoveryError::invalid_input(format!(
            "empty port range [{low}, {high})"
        )));
    }

    let span = (high - low) as usize;
    let max_attempts = (span * 4).max(16);
    let mut rng = rand::thread_rng();

    for attempt in 1..=max_attempts {
        let port = rng.gen_range(low..high);
        match TcpListener::bind(SocketAddr::new(address, port)) {
            Ok(listener) => {
                drop(listener);
                debug!("Allocated port {} on {} after {} attempt(s)", port, address, attempt);
                return Ok(port);
            }
            Err(e) => {
                debug!("Port {} on {} unavailable: {}", port, address, e);
            }
        }
    }

    Err(DiscoveryError::resource_exhausted(format!(
        "no bindable port in [{low}, {high}) on {address}"
    )))
}
