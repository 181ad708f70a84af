use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use config::{Config, ConfigError as BuilderError, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_CONFIG_DIR: &str = "config";

/// Top-level configuration shared by both binaries, loaded from
/// `config/default.toml`, an optional profile file, an optional explicit
/// path, then `NIGHTOWL__*` environment overrides, in that order.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub redis: RedisSection,
    pub security: SecuritySection,
    pub observability: ObservabilitySection,
    #[serde(default)]
    pub providers: ProvidersSection,
}

impl AppConfig {
    pub fn metrics_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        self.observability.metrics_socket_addr()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_webhook_timeout_secs() -> u64 {
    30
}

impl ServerSection {
    pub fn bind_address(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_pool_timeout_secs")]
    pub pool_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    20
}

fn default_pool_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSection {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecuritySection {
    /// 32-byte hex-encoded secret, used for JWT signing and at-rest
    /// encryption of provider credentials.
    pub secret_key: String,
    #[serde(default)]
    pub dev_mode: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProvidersSection {
    #[serde(default)]
    pub cors_allowlist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilitySection {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_metrics_bind")]
    pub metrics_bind: String,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

fn default_metrics_bind() -> String {
    "0.0.0.0".into()
}

fn default_metrics_port() -> u16 {
    9100
}

impl ObservabilitySection {
    pub fn metrics_socket_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.metrics_bind, self.metrics_port).parse()
    }
}

/// CLI-sourced overrides layered on top of file/environment configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub profile: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub metrics_bind: Option<String>,
    pub metrics_port: Option<u16>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Builder(#[from] BuilderError),
}

impl From<std::net::AddrParseError> for ConfigError {
    fn from(err: std::net::AddrParseError) -> Self {
        ConfigError::Message(err.to_string())
    }
}

pub fn load(overrides: ConfigOverrides) -> std::result::Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();
    builder = builder.add_source(required_file(DEFAULT_CONFIG_DIR, "default.toml"));

    if let Some(profile) = overrides.profile.as_deref() {
        builder = builder.add_source(optional_file(DEFAULT_CONFIG_DIR, &format!("{profile}.toml")));
    }

    if let Some(path) = overrides.config_path {
        builder = builder.add_source(File::from(path));
    }

    builder = builder.add_source(Environment::with_prefix("NIGHTOWL").separator("__"));

    if let Some(host) = overrides.host {
        builder = builder.set_override("server.host", host)?;
    }
    if let Some(port) = overrides.port {
        builder = builder.set_override("server.port", port as i64)?;
    }
    if let Some(metrics_bind) = overrides.metrics_bind {
        builder = builder.set_override("observability.metrics_bind", metrics_bind)?;
    }
    if let Some(metrics_port) = overrides.metrics_port {
        builder = builder.set_override("observability.metrics_port", metrics_port as i64)?;
    }
    if let Some(log_level) = overrides.log_level {
        builder = builder.set_override("observability.log_level", log_level)?;
    }
    if let Some(log_format) = overrides.log_format {
        builder = builder.set_override("observability.log_format", log_format)?;
    }
    if let Some(otlp_endpoint) = overrides.otlp_endpoint {
        builder = builder.set_override("observability.otlp_endpoint", otlp_endpoint)?;
    }

    let config = builder.build()?;
    Ok(config.try_deserialize()?)
}

fn required_file(dir: &str, name: &str) -> File<config::FileSourceFile, FileFormat> {
    File::from(Path::new(dir).join(name)).format(FileFormat::Toml)
}

fn optional_file(dir: &str, name: &str) -> File<config::FileSourceFile, FileFormat> {
    File::from(Path::new(dir).join(name))
        .required(false)
        .format(FileFormat::Toml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn chdir_bin_root() {
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        // crates/nightowl-core -> workspace root is two levels up; tests run
        // against the api binary's config directory.
        if let Some(root) = manifest_dir.parent().and_then(|p| p.parent()) {
            let target = root.join("bins/nightowl-api");
            if target.join("config/default.toml").exists() {
                let _ = std::env::set_current_dir(target);
            }
        }
    }

    #[test]
    fn loads_default_configuration() {
        chdir_bin_root();
        let config = load(ConfigOverrides::default()).expect("config loads");
        assert!(config.server.port > 0);
    }

    #[test]
    fn applies_cli_overrides() {
        chdir_bin_root();
        let overrides = ConfigOverrides {
            port: Some(9999),
            log_level: Some("debug".into()),
            ..Default::default()
        };
        let config = load(overrides).expect("config loads with overrides");
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.observability.log_level, "debug");
    }
}
