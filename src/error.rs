//! Proxy-level error types.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors from connection handling.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend refused or failed the connection.
    #[error("cannot connect to backend {backend} for service '{service}': {source}")]
    BackendConnect {
        service: String,
        backend: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The backend did not accept the connection in time.
    #[error("backend {backend} for service '{service}' did not accept in time")]
    BackendTimeout {
        service: String,
        backend: SocketAddr,
    },
}
