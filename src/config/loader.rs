//! Configuration loading and validation.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::error::{ConfigError, ValidationWarning};
use super::schema::Config;

/// Configuration file search paths (in priority order).
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(path) = std::env::var("STREAMGATE_CONFIG") {
        paths.push(PathBuf::from(path));
    }

    paths.push(PathBuf::from("/etc/streamgate/config.yaml"));
    paths.push(PathBuf::from("./config.yaml"));

    paths
}

/// Find the first existing config file from the search paths.
pub fn find_config_file(explicit_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ConfigError::ConfigFileNotFound {
            searched: vec![path.to_path_buf()],
        });
    }

    let paths = default_config_paths();
    for path in &paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    Err(ConfigError::ConfigFileNotFound { searched: paths })
}

/// Load configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;

    if contents.trim().is_empty() {
        return Err(ConfigError::EmptyConfigFile);
    }

    let config: Config = serde_saphyr::from_str(&contents)?;
    Ok(config)
}

/// Load and validate configuration.
pub fn load_and_validate(path: &Path) -> Result<(Config, Vec<ValidationWarning>), ConfigError> {
    let config = load_config(path)?;
    let warnings = validate(&config)?;
    Ok((config, warnings))
}

/// Validate a parsed configuration.
///
/// # Errors
///
/// Returns the first hard violation found: no services, duplicate or
/// malformed service names, colliding listen addresses, a service proxying
/// to itself, or zero-valued tunables.
pub fn validate(config: &Config) -> Result<Vec<ValidationWarning>, ConfigError> {
    if config.services.is_empty() {
        return Err(ConfigError::NoServicesDefined);
    }

    let mut names: HashSet<&str> = HashSet::new();
    let mut by_listen: HashMap<std::net::SocketAddr, &str> = HashMap::new();
    let mut by_backend: HashMap<std::net::SocketAddr, &str> = HashMap::new();
    let mut warnings = Vec::new();

    for service in &config.services {
        if service.name.is_empty()
            || !service
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::InvalidServiceName {
                name: service.name.clone(),
            });
        }

        if !names.insert(&service.name) {
            return Err(ConfigError::DuplicateServiceName {
                name: service.name.clone(),
            });
        }

        if let Some(first) = by_listen.insert(service.listen, &service.name) {
            return Err(ConfigError::DuplicateListenAddr {
                addr: service.listen,
                first: first.to_string(),
                second: service.name.clone(),
            });
        }

        if service.listen == service.backend {
            return Err(ConfigError::SelfProxy {
                name: service.name.clone(),
                addr: service.listen,
            });
        }

        if let Some(first) = by_backend.insert(service.backend, &service.name) {
            warnings.push(ValidationWarning::SharedBackend {
                addr: service.backend,
                first: first.to_string(),
                second: service.name.clone(),
            });
        }
    }

    if config.tuning.predicate_timeout.is_zero() {
        return Err(ConfigError::InvalidTuning {
            field: "predicate_timeout",
            message: "must be greater than zero".to_string(),
        });
    }
    if config.tuning.poll_interval.is_zero() {
        return Err(ConfigError::InvalidTuning {
            field: "poll_interval",
            message: "must be greater than zero".to_string(),
        });
    }
    if config.tuning.max_buffer_bytes == 0 {
        return Err(ConfigError::InvalidTuning {
            field: "max_buffer_bytes",
            message: "must be greater than zero".to_string(),
        });
    }

    if !config.filter_dir.exists() {
        warnings.push(ValidationWarning::FilterDirMissing {
            path: config.filter_dir.clone(),
        });
    }

    Ok(warnings)
}
