//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No services defined in configuration.
    #[error("no services defined in configuration")]
    NoServicesDefined,

    /// Duplicate service name found.
    #[error("duplicate service name: '{name}'")]
    DuplicateServiceName { name: String },

    /// Service name contains characters that cannot appear in a filter
    /// module filename.
    #[error("invalid service name '{name}': only [A-Za-z0-9_-] is allowed")]
    InvalidServiceName { name: String },

    /// Two services listen on the same address.
    #[error("duplicate listen address {addr} (services '{first}' and '{second}')")]
    DuplicateListenAddr {
        addr: std::net::SocketAddr,
        first: String,
        second: String,
    },

    /// A service proxies to itself.
    #[error("service '{name}' has identical listen and backend address {addr}")]
    SelfProxy {
        name: String,
        addr: std::net::SocketAddr,
    },

    /// A tuning value is out of range.
    #[error("invalid value for '{field}': {message}")]
    InvalidTuning {
        field: &'static str,
        message: String,
    },

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    ParseError(#[from] serde_saphyr::Error),

    /// I/O error reading the config file.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Config file not found at any search location.
    #[error("configuration file not found (searched: {searched:?})")]
    ConfigFileNotFound { searched: Vec<PathBuf> },

    /// Empty configuration file.
    #[error("configuration file is empty")]
    EmptyConfigFile,
}

/// Validation warnings (non-fatal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// The filter directory does not exist yet; all modules start empty.
    FilterDirMissing { path: PathBuf },

    /// Two services share a backend address.
    SharedBackend {
        addr: std::net::SocketAddr,
        first: String,
        second: String,
    },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FilterDirMissing { path } => {
                write!(f, "filter directory {} does not exist", path.display())
            }
            Self::SharedBackend {
                addr,
                first,
                second,
            } => write!(f, "services '{first}' and '{second}' share backend {addr}"),
        }
    }
}
