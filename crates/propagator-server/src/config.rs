use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

use crate::reconcile::ReconcilerSettings;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub propagation: PropagationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Objects loaded into the store at startup
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        if self.controller.workers == 0 {
            return Err("controller.workers must be > 0".into());
        }
        if self.controller.target_concurrency == 0 {
            return Err("controller.target_concurrency must be > 0".into());
        }
        if self.controller.backoff_base_ms == 0 {
            return Err("controller.backoff_base_ms must be > 0".into());
        }
        if self.controller.backoff_base_ms > self.controller.backoff_max_ms {
            return Err("controller.backoff_base_ms must be <= controller.backoff_max_ms".into());
        }
        if self.controller.audit_buffer == 0 {
            return Err("controller.audit_buffer must be > 0".into());
        }
        if self.propagation.system_namespaces.iter().any(|ns| ns.trim().is_empty()) {
            return Err("propagation.system_namespaces must not contain empty names".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        if let Some(path) = &self.bootstrap.manifest
            && path.trim().is_empty()
        {
            return Err("bootstrap.manifest must not be empty when set".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        let ip: std::net::IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(std::net::IpAddr::from([0, 0, 0, 0]));
        SocketAddr::from((ip, self.server.port))
    }

    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            system_namespaces: self.propagation.system_namespaces.clone(),
            target_concurrency: self.controller.target_concurrency,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Propagations reconciled in parallel
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Target mutations in flight within one pass
    #[serde(default = "default_target_concurrency")]
    pub target_concurrency: usize,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Requeue floor while the source ConfigMap is missing
    #[serde(default = "default_missing_source_requeue_secs")]
    pub missing_source_requeue_secs: u64,
    /// Fixed delay before retrying a partially failed deletion
    #[serde(default = "default_deletion_retry_secs")]
    pub deletion_retry_secs: u64,
    /// Audit events kept for `GET /api/events`
    #[serde(default = "default_audit_buffer")]
    pub audit_buffer: usize,
}

fn default_workers() -> usize {
    4
}
fn default_target_concurrency() -> usize {
    8
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    300_000
}
fn default_missing_source_requeue_secs() -> u64 {
    300
}
fn default_deletion_retry_secs() -> u64 {
    30
}
fn default_audit_buffer() -> usize {
    256
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            target_concurrency: default_target_concurrency(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            missing_source_requeue_secs: default_missing_source_requeue_secs(),
            deletion_retry_secs: default_deletion_retry_secs(),
            audit_buffer: default_audit_buffer(),
        }
    }
}

impl ControllerConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn missing_source_requeue(&self) -> Duration {
        Duration::from_secs(self.missing_source_requeue_secs)
    }

    pub fn deletion_retry(&self) -> Duration {
        Duration::from_secs(self.deletion_retry_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationConfig {
    /// Namespaces skipped when `allowSystemNamespaces` is false
    #[serde(default = "default_system_namespaces")]
    pub system_namespaces: Vec<String>,
}

fn default_system_namespaces() -> Vec<String> {
    ReconcilerSettings::default().system_namespaces
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            system_namespaces: default_system_namespaces(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BootstrapConfig {
    /// JSON manifest with namespaces, configMaps and propagations
    #[serde(default)]
    pub manifest: Option<String>,
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                let default_path = PathBuf::from("propagator.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., PROPAGATOR__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("PROPAGATOR")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
