//! The connection pump.
//!
//! One pump per accepted client connection. It dials the backend, splits
//! both sockets, and drives the two directions as independent tasks so a
//! stalled write on one side never blocks reads on the other. Each
//! direction reads, reconstructs, decides, and forwards or drops.
//!
//! Teardown follows the first direction to finish: either side closing,
//! an I/O error, a block decision under `on_block: close`, or shutdown.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{BlockAction, ProtocolKind, ServiceConfig, Tuning};
use crate::error::ProxyError;
use crate::filter::DecisionEngine;
use crate::stream::{Direction, Reconstructor, Stream, StreamEvent, StreamKind};

const READ_CHUNK: usize = 16 * 1024;

/// Run one client connection to completion.
pub async fn run_connection(
    service: Arc<ServiceConfig>,
    tuning: Tuning,
    engine: Arc<DecisionEngine>,
    client: TcpStream,
    conn_id: u64,
    shutdown: CancellationToken,
) -> Result<(), ProxyError> {
    let backend = tokio::time::timeout(
        tuning.connect_timeout,
        TcpStream::connect(service.backend),
    )
    .await
    .map_err(|_| ProxyError::BackendTimeout {
        service: service.name.clone(),
        backend: service.backend,
    })?
    .map_err(|source| ProxyError::BackendConnect {
        service: service.name.clone(),
        backend: service.backend,
        source,
    })?;
    backend.set_nodelay(true).ok();

    let kind = match service.protocol {
        ProtocolKind::Tcp => StreamKind::Raw,
        ProtocolKind::Http => StreamKind::Http,
    };

    // Closing the connection cancels both directions promptly.
    let cancel = shutdown.child_token();

    let (client_read, client_write) = client.into_split();
    let (backend_read, backend_write) = backend.into_split();

    let mut inbound = tokio::spawn(pump_direction(
        client_read,
        backend_write,
        service.clone(),
        engine.clone(),
        Direction::In,
        kind,
        tuning.max_buffer_bytes,
        conn_id,
        cancel.clone(),
    ));
    let mut outbound = tokio::spawn(pump_direction(
        backend_read,
        client_write,
        service.clone(),
        engine.clone(),
        Direction::Out,
        kind,
        tuning.max_buffer_bytes,
        conn_id,
        cancel.clone(),
    ));

    // Either side finishing tears the whole connection down.
    let finished = tokio::select! {
        result = &mut inbound => {
            log_direction_end(&service.name, conn_id, Direction::In, &result);
            Direction::In
        }
        result = &mut outbound => {
            log_direction_end(&service.name, conn_id, Direction::Out, &result);
            Direction::Out
        }
    };
    cancel.cancel();
    let late = match finished {
        Direction::In => outbound.await,
        Direction::Out => inbound.await,
    };
    log_direction_end(&service.name, conn_id, finished.opposite(), &late);

    debug!(service = %service.name, conn_id, "connection closed");
    Ok(())
}

fn log_direction_end(
    service: &str,
    conn_id: u64,
    direction: Direction,
    result: &Result<Result<(), ProxyError>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(())) => debug!(service, conn_id, %direction, "direction finished"),
        Ok(Err(error)) => {
            error!(service, conn_id, %direction, %error, "direction failed")
        }
        Err(error) => error!(service, conn_id, %direction, %error, "direction panicked"),
    }
}

/// Read → reconstruct → decide → forward/drop, until EOF, error, block
/// under `on_block: close`, or cancellation.
#[allow(clippy::too_many_arguments)]
async fn pump_direction<R, W>(
    mut reader: R,
    mut writer: W,
    service: Arc<ServiceConfig>,
    engine: Arc<DecisionEngine>,
    direction: Direction,
    kind: StreamKind,
    max_buffer: usize,
    conn_id: u64,
    cancel: CancellationToken,
) -> Result<(), ProxyError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut recon = Reconstructor::new(kind, direction, max_buffer);
    let mut stream = Stream::new(kind, direction);
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        buf.clear();
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            result = reader.read_buf(&mut buf) => result?,
        };
        if n == 0 {
            debug!(service = %service.name, conn_id, %direction, "peer closed");
            return Ok(());
        }

        for event in recon.push(&buf[..n]) {
            match event {
                StreamEvent::Fallback(message) => {
                    // Reconstruction gave up; the bytes pass unfiltered.
                    let wire = message.wire_bytes();
                    stream.begin(message);
                    stream.commit();
                    if !forward(&mut writer, &wire, &cancel).await? {
                        return Ok(());
                    }
                }
                StreamEvent::Message(message) => {
                    let wire = message.wire_bytes();
                    stream.begin(message);
                    let decision = engine.decide(&service.name, direction, &stream);
                    stream.commit();

                    if decision.forwards() {
                        if !forward(&mut writer, &wire, &cancel).await? {
                            return Ok(());
                        }
                    } else if service.on_block == BlockAction::Close {
                        info!(
                            service = %service.name,
                            conn_id,
                            %direction,
                            "closing connection on block"
                        );
                        cancel.cancel();
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Cancellable write; returns `false` when cancelled mid-write.
async fn forward<W>(
    writer: &mut W,
    bytes: &[u8],
    cancel: &CancellationToken,
) -> Result<bool, ProxyError>
where
    W: AsyncWrite + Unpin,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(false),
        result = writer.write_all(bytes) => {
            result?;
            Ok(true)
        }
    }
}
