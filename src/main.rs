//! StreamGate binary: load config, start listeners, watch filters, drain
//! on shutdown.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use streamgate::config;
use streamgate::filter::{spawn_watcher, DecisionEngine, FilterRegistry};
use streamgate::proxy::{self, ConnectionTracker};

/// Command-line options; everything else comes from the config file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the proxy configuration file
    #[arg(short, long, env = "STREAMGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format: "json" or "pretty"
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    log_format: String,

    /// Graceful shutdown timeout in seconds
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value = "10")]
    shutdown_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt().with_env_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    if cli.log_format.eq_ignore_ascii_case("pretty") {
        subscriber.init();
    } else {
        subscriber.json().init();
    }

    let path = config::find_config_file(cli.config.as_deref())?;
    let (cfg, warnings) = config::load_and_validate(&path)?;
    for warning in &warnings {
        warn!(%warning, "configuration warning");
    }
    info!(
        path = %path.display(),
        services = cfg.services.len(),
        filter_dir = %cfg.filter_dir.display(),
        "configuration loaded"
    );

    let registry = Arc::new(FilterRegistry::discover(
        &cfg.filter_dir,
        cfg.services.iter().map(|s| s.name.as_str()),
    ));
    let engine = Arc::new(DecisionEngine::new(
        registry.clone(),
        cfg.tuning.predicate_timeout,
    ));

    let shutdown = CancellationToken::new();
    let watcher = spawn_watcher(
        registry.clone(),
        cfg.tuning.poll_interval,
        shutdown.clone(),
    );

    let tracker = Arc::new(ConnectionTracker::new());
    let mut listeners = Vec::new();
    for service in &cfg.services {
        let listener = TcpListener::bind(service.listen).await?;
        listeners.push(tokio::spawn(proxy::serve(
            listener,
            Arc::new(service.clone()),
            cfg.tuning.clone(),
            engine.clone(),
            tracker.clone(),
            shutdown.clone(),
        )));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining connections");
    shutdown.cancel();

    let deadline = Instant::now() + Duration::from_secs(cli.shutdown_timeout);
    while tracker.count() > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if tracker.count() > 0 {
        warn!(
            remaining = tracker.count(),
            "shutdown timeout reached with connections still active"
        );
    }

    for listener in listeners {
        let _ = listener.await;
    }
    let _ = watcher.await;

    let stats = engine.stats();
    info!(
        evaluations = stats.evaluations,
        blocks = stats.blocks,
        aborts = stats.aborts,
        reloads = registry.reload_count(),
        "proxy stopped"
    );
    Ok(())
}
