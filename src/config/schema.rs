//! Proxy configuration schema.
//!
//! The config file is a single YAML document listing the intercepted
//! services plus a handful of engine tunables:
//!
//! ```yaml
//! filter_dir: ./filters
//!
//! services:
//!   - name: auth
//!     listen: 0.0.0.0:4000
//!     backend: 127.0.0.1:9000
//!     protocol: tcp
//!     on_block: drop
//!
//! tuning:
//!   predicate_timeout: 50ms
//!   poll_interval: 500ms
//!   max_buffer_bytes: 1048576
//!   connect_timeout: 3s
//! ```

use super::duration_format;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level proxy configuration. Immutable after startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding the per-service filter modules.
    #[serde(default = "default_filter_dir")]
    pub filter_dir: PathBuf,

    /// Intercepted services.
    pub services: Vec<ServiceConfig>,

    /// Engine tunables.
    #[serde(default)]
    pub tuning: Tuning,
}

fn default_filter_dir() -> PathBuf {
    PathBuf::from("./filters")
}

/// One intercepted service: clients connect to `listen`, the proxy relays
/// to `backend`, and every message in between is run through the filter
/// modules for this service.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Service identifier; also names the filter module files
    /// (`<name>_in.yaml` / `<name>_out.yaml`).
    pub name: String,

    /// Address the proxy accepts client connections on.
    pub listen: SocketAddr,

    /// Address of the real service.
    pub backend: SocketAddr,

    /// Wire protocol spoken by the service.
    #[serde(default)]
    pub protocol: ProtocolKind,

    /// What happens to the connection when a message is blocked.
    #[serde(default)]
    pub on_block: BlockAction,
}

/// Protocol kind of a service; decides how byte streams are cut into
/// messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// Raw byte stream: every socket read is one message.
    #[default]
    Tcp,
    /// Text request/response protocol: messages are parsed HTTP requests
    /// (client→backend) and responses (backend→client).
    Http,
}

/// Connection disposition after a block decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockAction {
    /// Silently drop the blocked message and keep the connection open.
    #[default]
    Drop,
    /// Drop the blocked message and terminate the connection.
    Close,
}

/// Engine tunables with conservative defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Tuning {
    /// Per-predicate evaluation deadline. Expiry is a predicate error and
    /// takes the fail-open path.
    #[serde(default = "default_predicate_timeout", with = "duration_format")]
    pub predicate_timeout: Duration,

    /// How often the watcher polls filter module sources for changes.
    #[serde(default = "default_poll_interval", with = "duration_format")]
    pub poll_interval: Duration,

    /// Reconstruction buffer limit per direction. A structured message
    /// still incomplete past this limit falls back to raw delivery.
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,

    /// Backend connect timeout.
    #[serde(default = "default_connect_timeout", with = "duration_format")]
    pub connect_timeout: Duration,
}

fn default_predicate_timeout() -> Duration {
    Duration::from_millis(50)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_max_buffer_bytes() -> usize {
    1024 * 1024
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(3)
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            predicate_timeout: default_predicate_timeout(),
            poll_interval: default_poll_interval(),
            max_buffer_bytes: default_max_buffer_bytes(),
            connect_timeout: default_connect_timeout(),
        }
    }
}
