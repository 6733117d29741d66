//! Configuration for the proxy.
//!
//! This module provides:
//! - YAML configuration parsing
//! - Config file discovery (explicit path → env var → system defaults)
//! - Validation with hard errors and non-fatal warnings
//! - Human-friendly duration strings (`50ms`, `5s`)

mod duration_format;
mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ValidationWarning};
pub use loader::{
    default_config_paths, find_config_file, load_and_validate, load_config, validate,
};
pub use schema::{BlockAction, Config, ProtocolKind, ServiceConfig, Tuning};

#[cfg(test)]
mod tests {
    use super::*;

    /// Full loading flow against a realistic config document.
    #[test]
    fn full_loading_flow() {
        let yaml = r#"
filter_dir: /
services:
  - name: cc_market
    listen: 0.0.0.0:9876
    backend: 127.0.0.1:19876
    protocol: http
  - name: scadnet_bin
    listen: 0.0.0.0:1883
    backend: 127.0.0.1:11883
    on_block: close
"#;
        let config: Config = serde_saphyr::from_str(yaml).unwrap();
        let warnings = validate(&config).unwrap();
        assert!(warnings.is_empty());

        assert_eq!(config.services[0].protocol, ProtocolKind::Http);
        assert_eq!(config.services[0].on_block, BlockAction::Drop);
        assert_eq!(config.services[1].protocol, ProtocolKind::Tcp);
        assert_eq!(config.services[1].on_block, BlockAction::Close);
    }
}
