//! # Process Configuration
//!
//! Typed configuration for the control plane's process surface: the
//! root-namespaces policy, the xDS listen address/TLS, and the timing knobs
//! for the Event Handler and Status Writer. Health/metrics endpoint
//! configuration is out of scope and not modeled here.

use crate::errors::{ControlPlaneError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

/// Top-level process configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Namespaces allowed to own a root VirtualHost. Empty means
    /// "no restriction".
    pub root_namespaces: Vec<String>,

    #[validate(nested)]
    pub xds: XdsConfig,

    #[validate(nested)]
    pub event_handler: EventHandlerConfig,

    #[validate(nested)]
    pub status_writer: StatusWriterConfig,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            root_namespaces: Vec::new(),
            xds: XdsConfig::default(),
            event_handler: EventHandlerConfig::default(),
            status_writer: StatusWriterConfig::default(),
        }
    }
}

/// xDS gRPC listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct XdsConfig {
    pub bind_address: String,
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,
    pub tls: Option<XdsTlsConfig>,
}

impl Default for XdsConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0".to_string(), port: 18000, tls: None }
    }
}

impl XdsConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// TLS material for the xDS listener. PKI provisioning is out of scope; this
/// only names the files the transport layer should load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XdsTlsConfig {
    pub cert_path: String,
    pub key_path: String,
    pub client_ca_path: Option<String>,
}

/// Coalescing/hold-down-timer tuning for the Event Handler.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EventHandlerConfig {
    #[validate(range(min = 1))]
    pub hold_down_millis: u64,
}

impl Default for EventHandlerConfig {
    fn default() -> Self {
        Self { hold_down_millis: 100 }
    }
}

impl EventHandlerConfig {
    pub fn hold_down(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.hold_down_millis)
    }
}

/// Timeout for a single Status Writer reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StatusWriterConfig {
    #[validate(range(min = 1))]
    pub timeout_seconds: u64,
}

impl Default for StatusWriterConfig {
    fn default() -> Self {
        Self { timeout_seconds: 5 }
    }
}

impl StatusWriterConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }
}

/// Load configuration in layered order: defaults, then an optional file, then
/// `CONTOUR_`-prefixed environment variables (later sources override earlier
/// ones).
pub fn load_config<P: AsRef<Path>>(config_path: Option<P>) -> Result<ControlPlaneConfig> {
    let mut builder = Config::builder();
    builder = builder.add_source(Config::try_from(&ControlPlaneConfig::default())?);

    if let Some(path) = config_path {
        let path = path.as_ref();
        if path.exists() {
            builder = builder.add_source(File::from(path));
        } else {
            return Err(ControlPlaneError::config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
    }

    builder = builder.add_source(Environment::with_prefix("CONTOUR").separator("_").try_parsing(true));

    let config = builder.build()?;
    let app_config: ControlPlaneConfig = config.try_deserialize()?;
    app_config.validate().map_err(ControlPlaneError::from)?;
    Ok(app_config)
}

pub fn load_config_from_env() -> Result<ControlPlaneConfig> {
    load_config::<&str>(None)
}

pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> Result<ControlPlaneConfig> {
    load_config(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = ControlPlaneConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.xds.port, 18000);
    }

    #[test]
    fn load_from_yaml_overrides_defaults() {
        let yaml = "root_namespaces:\n  - projectcontour\nxds:\n  bind_address: \"127.0.0.1\"\n  port: 9001\n";
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = load_config_from_file(file.path()).unwrap();
        assert_eq!(config.root_namespaces, vec!["projectcontour".to_string()]);
        assert_eq!(config.xds.port, 9001);
        assert_eq!(config.xds.bind_address(), "127.0.0.1:9001");
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = load_config_from_file("/nonexistent/contour.yaml");
        assert!(result.is_err());
    }
}
