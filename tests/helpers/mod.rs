//! Shared helpers for integration tests: a scriptable mock backend, a
//! proxy spawner on ephemeral ports, and socket assertions.
//!
//! Note: not every helper is used by every test binary.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use streamgate::config::{BlockAction, ProtocolKind, ServiceConfig, Tuning};
use streamgate::filter::{DecisionEngine, FilterRegistry};
use streamgate::proxy::{self, ConnectionTracker};
use streamgate::stream::Direction;

/// Scriptable TCP backend for proxy tests.
pub struct MockBackend {
    greeting: Option<Vec<u8>>,
    mode: Mode,
}

enum Mode {
    /// Echo every read back to the client.
    Echo,
    /// Answer each complete HTTP request (blank-line terminated) with a
    /// fixed response.
    HttpResponse(Vec<u8>),
}

/// Handle to a spawned backend.
pub struct RunningBackend {
    pub addr: SocketAddr,
    /// Everything the backend has read, across all connections.
    pub received: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl MockBackend {
    pub fn echo() -> Self {
        Self {
            greeting: None,
            mode: Mode::Echo,
        }
    }

    /// Echo backend that sends `greeting` on connect.
    pub fn echo_with_greeting(greeting: &[u8]) -> Self {
        Self {
            greeting: Some(greeting.to_vec()),
            mode: Mode::Echo,
        }
    }

    /// HTTP backend answering every request with `response`.
    pub fn http(response: &[u8]) -> Self {
        Self {
            greeting: None,
            mode: Mode::HttpResponse(response.to_vec()),
        }
    }

    pub async fn spawn(self) -> RunningBackend {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let greeting = self.greeting;
        let mode = Arc::new(self.mode);
        let received_task = received.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let greeting = greeting.clone();
                let mode = mode.clone();
                let received = received_task.clone();
                tokio::spawn(async move {
                    let _ = handle_conn(socket, greeting, &mode, received).await;
                });
            }
        });

        RunningBackend {
            addr,
            received,
            handle,
        }
    }
}

impl Drop for RunningBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_conn(
    mut socket: TcpStream,
    greeting: Option<Vec<u8>>,
    mode: &Mode,
    received: Arc<Mutex<Vec<u8>>>,
) -> std::io::Result<()> {
    if let Some(greeting) = greeting {
        socket.write_all(&greeting).await?;
    }

    let mut pending = Vec::new();
    let mut buf = [0u8; 16 * 1024];
    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        received.lock().await.extend_from_slice(&buf[..n]);

        match mode {
            Mode::Echo => socket.write_all(&buf[..n]).await?,
            Mode::HttpResponse(response) => {
                pending.extend_from_slice(&buf[..n]);
                while let Some(end) = find_blank_line(&pending) {
                    pending.drain(..end);
                    socket.write_all(response).await?;
                }
            }
        }
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// A proxy instance wired to a mock backend on ephemeral ports.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub engine: Arc<DecisionEngine>,
    pub registry: Arc<FilterRegistry>,
    pub tracker: Arc<ConnectionTracker>,
    pub shutdown: CancellationToken,
}

impl TestProxy {
    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.unwrap()
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Spawn a single-service proxy called `svc`.
pub async fn spawn_proxy(
    filter_dir: &Path,
    backend: SocketAddr,
    protocol: ProtocolKind,
    on_block: BlockAction,
) -> TestProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let service = Arc::new(ServiceConfig {
        name: "svc".to_string(),
        listen: addr,
        backend,
        protocol,
        on_block,
    });

    let registry = Arc::new(FilterRegistry::discover(filter_dir, ["svc"]));
    let tuning = Tuning::default();
    let engine = Arc::new(DecisionEngine::new(
        registry.clone(),
        tuning.predicate_timeout,
    ));
    let tracker = Arc::new(ConnectionTracker::new());
    let shutdown = CancellationToken::new();

    tokio::spawn(proxy::serve(
        listener,
        service,
        tuning,
        engine.clone(),
        tracker.clone(),
        shutdown.clone(),
    ));

    TestProxy {
        addr,
        engine,
        registry,
        tracker,
        shutdown,
    }
}

/// Write the filter module file for service `svc`.
pub fn write_filter(dir: &Path, direction: Direction, source: &str) {
    std::fs::write(
        streamgate::filter::module_path(dir, "svc", direction),
        source,
    )
    .unwrap();
}

/// Read exactly `expected.len()` bytes and compare.
pub async fn expect_bytes(stream: &mut TcpStream, expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("timed out waiting for bytes")
        .expect("read failed");
    assert_eq!(buf, expected, "unexpected bytes from proxy");
}

/// Assert nothing arrives for `dur`. Also spaces out writes so separate
/// messages do not coalesce into one socket read at the proxy.
pub async fn expect_silence(stream: &mut TcpStream, dur: Duration) {
    let mut buf = [0u8; 1024];
    match tokio::time::timeout(dur, stream.read(&mut buf)).await {
        Err(_) => {}
        Ok(Ok(0)) => panic!("connection closed while expecting silence"),
        Ok(Ok(n)) => panic!(
            "expected silence, got {:?}",
            String::from_utf8_lossy(&buf[..n])
        ),
        Ok(Err(e)) => panic!("read error while expecting silence: {e}"),
    }
}

/// Assert the connection is closed (EOF or reset).
pub async fn expect_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    match tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => {}
        Ok(Ok(n)) => panic!(
            "expected close, got {:?}",
            String::from_utf8_lossy(&buf[..n])
        ),
        Err(_) => panic!("timed out waiting for close"),
    }
}
