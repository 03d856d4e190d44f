//! Listening port selection
//!
//! Probes ports sequentially from a base port and keeps the first listener
//! that binds, so nothing can grab the port between probing and serving.

use crate::error::{Error, Result};
use std::io::ErrorKind;
use std::net::TcpListener;

/// Bind the first free port in `start..start + attempts`
pub fn find_available_port(host: &str, start: u16, attempts: u16) -> Result<(u16, TcpListener)> {
    let end = start.saturating_add(attempts.saturating_sub(1));
    let exhausted = || Error::PortExhausted {
        host: host.to_string(),
        start,
        end,
    };
    if attempts == 0 {
        return Err(exhausted());
    }

    for port in start..=end {
        match TcpListener::bind((host, port)) {
            Ok(listener) => {
                if port != start {
                    tracing::info!(requested = start, port, "Base port busy, using next free port");
                }
                return Ok((port, listener));
            }
            Err(e) if matches!(e.kind(), ErrorKind::AddrInUse | ErrorKind::PermissionDenied) => {
                tracing::debug!(port, error = %e, "Port unavailable");
            }
            // Bad host and the like will fail the same way on every port
            Err(e) => return Err(Error::Io(e)),
        }
    }

    Err(exhausted())
}
