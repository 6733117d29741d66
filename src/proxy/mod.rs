//! Connection interception: per-service listeners and live-connection
//! tracking.

mod pump;

pub use pump::run_connection;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ServiceConfig, Tuning};
use crate::error::ProxyError;
use crate::filter::DecisionEngine;

/// Live-connection accounting for graceful shutdown.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    active: AtomicUsize,
    next_id: AtomicU64,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection; returns its id.
    pub fn begin(&self) -> u64 {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Unregister a finished connection.
    pub fn end(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Number of connections currently alive.
    pub fn count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Accept loop for one service. Returns once `shutdown` fires; accepted
/// connections run as their own tasks and drain on the same token.
pub async fn serve(
    listener: TcpListener,
    service: Arc<ServiceConfig>,
    tuning: Tuning,
    engine: Arc<DecisionEngine>,
    tracker: Arc<ConnectionTracker>,
    shutdown: CancellationToken,
) -> Result<(), ProxyError> {
    info!(
        service = %service.name,
        listen = %listener.local_addr()?,
        backend = %service.backend,
        protocol = ?service.protocol,
        "service listening"
    );

    loop {
        let (socket, peer) = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(error) => {
                    warn!(service = %service.name, %error, "accept failed");
                    continue;
                }
            },
        };
        socket.set_nodelay(true).ok();

        let conn_id = tracker.begin();
        debug!(service = %service.name, conn_id, %peer, "connection accepted");

        let service = service.clone();
        let tuning = tuning.clone();
        let engine = engine.clone();
        let tracker = tracker.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let name = service.name.clone();
            if let Err(error) =
                pump::run_connection(service, tuning, engine, socket, conn_id, shutdown).await
            {
                warn!(service = %name, conn_id, %error, "connection failed");
            }
            tracker.end();
        });
    }

    info!(service = %service.name, "service listener stopped");
    Ok(())
}
