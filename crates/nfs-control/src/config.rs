// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control plane configuration.
//!
//! Loaded from a TOML file; every section and most keys have defaults.
//!
//! ```toml
//! [server]
//! socket_path = "/tmp/nfs-control.sock"
//!
//! [control]
//! step_length_ms = 100
//! period_length_ms = 1000
//! reference = 1000000
//! alpha = 1.0
//!
//! [tables]
//! cpu = "cpu_usage_total"
//! rx = "rx_bytes"
//! tx = "tx_bytes"
//!
//! [fabric]
//! kind = "docker"
//!
//! [fabric.hosts]
//! local = "unix:///var/run/docker.sock"
//! ```

use crate::controller::ControlParams;
use crate::fabric::FabricKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub control: ControlSection,

    #[serde(default)]
    pub tables: TablesConfig,

    #[serde(default)]
    pub fabric: FabricConfig,
}

/// Command socket settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unix socket the command server listens on.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Accept and read deadline, bounds how long shutdown takes to be noticed.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum frame size (bytes).
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Telemetry feed settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// UDP address receiving line protocol datagrams. Disabled when unset.
    #[serde(default)]
    pub bind: Option<String>,
}

/// Control loop tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSection {
    #[serde(default = "default_step_length")]
    pub step_length_ms: u64,

    #[serde(default = "default_period_length")]
    pub period_length_ms: u64,

    /// Target outbound throughput (bytes per second).
    #[serde(default = "default_reference")]
    pub reference: u64,

    /// Controller gain.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

/// Measurement names routed to the controllers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablesConfig {
    #[serde(default = "default_cpu_table")]
    pub cpu: String,

    #[serde(default = "default_rx_table")]
    pub rx: String,

    #[serde(default = "default_tx_table")]
    pub tx: String,

    /// Drop-queue depth; enables queue gating when set.
    #[serde(default)]
    pub queue: Option<String>,

    /// Tag naming the entity a point belongs to.
    #[serde(default = "default_entity_tag")]
    pub entity_tag: String,

    /// Field holding the sample value.
    #[serde(default = "default_value_field")]
    pub value_field: String,
}

/// Fabric backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FabricConfig {
    #[serde(default)]
    pub kind: FabricKind,

    /// sipp remote control port on traffic clients.
    #[serde(default = "default_rate_port")]
    pub rate_port: u16,

    /// CFS period (microseconds) used to turn shares into a quota.
    #[serde(default = "default_cpu_period")]
    pub cpu_period: u64,

    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Host name to container runtime address.
    #[serde(default = "default_hosts")]
    pub hosts: BTreeMap<String, String>,

    #[serde(default)]
    pub images: ImageConfig,

    #[serde(default)]
    pub network: NetworkConfig,
}

/// Container images per role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_sipp_image")]
    pub sipp: String,

    #[serde(default = "default_snort_image")]
    pub snort: String,
}

/// Virtual switch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bridge")]
    pub bridge: String,

    /// Address prefix; the gateway is `<prefix>1`.
    #[serde(default = "default_subnet_prefix")]
    pub subnet_prefix: String,

    #[serde(default = "default_netmask")]
    pub netmask: String,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/nfs-control.sock")
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1 MB
}

fn default_step_length() -> u64 {
    100
}

fn default_period_length() -> u64 {
    1000
}

fn default_reference() -> u64 {
    1_000_000
}

fn default_alpha() -> f64 {
    1.0
}

fn default_cpu_table() -> String {
    "cpu_usage_total".to_string()
}

fn default_rx_table() -> String {
    "rx_bytes".to_string()
}

fn default_tx_table() -> String {
    "tx_bytes".to_string()
}

fn default_entity_tag() -> String {
    "container_name".to_string()
}

fn default_value_field() -> String {
    "value".to_string()
}

fn default_rate_port() -> u16 {
    8888
}

fn default_cpu_period() -> u64 {
    100_000
}

fn default_stop_timeout() -> u64 {
    5
}

fn default_hosts() -> BTreeMap<String, String> {
    BTreeMap::from([("local".to_string(), "unix:///var/run/docker.sock".to_string())])
}

fn default_sipp_image() -> String {
    "mangalaman93/sipp".to_string()
}

fn default_snort_image() -> String {
    "mangalaman93/snort".to_string()
}

fn default_bridge() -> String {
    "ovsbr".to_string()
}

fn default_subnet_prefix() -> String {
    "173.16.1.".to_string()
}

fn default_netmask() -> String {
    "255.255.255.0".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            poll_interval_ms: default_poll_interval(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            step_length_ms: default_step_length(),
            period_length_ms: default_period_length(),
            reference: default_reference(),
            alpha: default_alpha(),
        }
    }
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            cpu: default_cpu_table(),
            rx: default_rx_table(),
            tx: default_tx_table(),
            queue: None,
            entity_tag: default_entity_tag(),
            value_field: default_value_field(),
        }
    }
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            kind: FabricKind::default(),
            rate_port: default_rate_port(),
            cpu_period: default_cpu_period(),
            stop_timeout_secs: default_stop_timeout(),
            hosts: default_hosts(),
            images: ImageConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl FabricConfig {
    /// In-process fabric over the given host names.
    pub fn simulated<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: FabricKind::Simulated,
            hosts: hosts
                .into_iter()
                .map(|h| (h.into(), "sim".to_string()))
                .collect(),
            ..Default::default()
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            sipp: default_sipp_image(),
            snort: default_snort_image(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bridge: default_bridge(),
            subnet_prefix: default_subnet_prefix(),
            netmask: default_netmask(),
        }
    }
}

impl ControlConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write as TOML.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.server.poll_interval_ms)
    }

    /// Parameters handed to every controller.
    pub fn control_params(&self) -> ControlParams {
        ControlParams {
            step: Duration::from_millis(self.control.step_length_ms),
            period: Duration::from_millis(self.control.period_length_ms),
            reference: self.control.reference as f64,
            alpha: self.control.alpha,
            track_queue: self.tables.queue.is_some(),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("socket_path cannot be empty".into()));
        }
        if self.server.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".into()));
        }
        if self.server.max_message_size == 0 {
            return Err(ConfigError::Invalid("max_message_size must be > 0".into()));
        }

        let control = &self.control;
        if control.step_length_ms == 0 {
            return Err(ConfigError::Invalid("step_length_ms must be > 0".into()));
        }
        if control.period_length_ms == 0 {
            return Err(ConfigError::Invalid("period_length_ms must be > 0".into()));
        }
        if control.period_length_ms % control.step_length_ms != 0 {
            return Err(ConfigError::Invalid(format!(
                "period_length_ms ({}) must be a multiple of step_length_ms ({})",
                control.period_length_ms, control.step_length_ms
            )));
        }
        if !control.alpha.is_finite() || control.alpha <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "alpha must be a positive number, got {}",
                control.alpha
            )));
        }

        let tables = &self.tables;
        let names = [
            ("tables.cpu", Some(&tables.cpu)),
            ("tables.rx", Some(&tables.rx)),
            ("tables.tx", Some(&tables.tx)),
            ("tables.queue", tables.queue.as_ref()),
            ("tables.entity_tag", Some(&tables.entity_tag)),
            ("tables.value_field", Some(&tables.value_field)),
        ];
        for (key, value) in names {
            if value.is_some_and(|v| v.is_empty()) {
                return Err(ConfigError::Invalid(format!("{} cannot be empty", key)));
            }
        }

        let fabric = &self.fabric;
        if fabric.hosts.is_empty() {
            return Err(ConfigError::Invalid("fabric.hosts cannot be empty".into()));
        }
        if fabric.cpu_period == 0 {
            return Err(ConfigError::Invalid("fabric.cpu_period must be > 0".into()));
        }
        let gateway = format!("{}1", fabric.network.subnet_prefix);
        if gateway.parse::<Ipv4Addr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "fabric.network.subnet_prefix {:?} does not form an IPv4 address",
                fabric.network.subnet_prefix
            )));
        }
        if fabric.network.netmask.parse::<Ipv4Addr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "fabric.network.netmask {:?} is not a dotted mask",
                fabric.network.netmask
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ControlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.max_message_size, 1024 * 1024);
        assert_eq!(config.fabric.kind, FabricKind::Docker);
        assert_eq!(config.fabric.rate_port, 8888);
        assert_eq!(config.tables.entity_tag, "container_name");
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: ControlConfig = toml::from_str("").unwrap();
        assert_eq!(config, ControlConfig::default());
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = ControlConfig::default();
        config.tables.queue = Some("drop_queue".into());
        config.telemetry.bind = Some("127.0.0.1:8089".into());
        config.fabric = FabricConfig::simulated(["h1", "h2"]);

        let text = config.to_toml().unwrap();
        let parsed: ControlConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
socket_path = "/run/nfs.sock"

[control]
step_length_ms = 50
period_length_ms = 500
reference = 2000000
alpha = 0.5

[tables]
queue = "snort_queue"

[fabric]
kind = "simulated"

[fabric.hosts]
h1 = "tcp://10.0.0.1:2375"
"#
        )
        .unwrap();

        let config = ControlConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.socket_path, PathBuf::from("/run/nfs.sock"));
        assert_eq!(config.fabric.kind, FabricKind::Simulated);
        assert_eq!(config.fabric.hosts.len(), 1);

        let params = config.control_params();
        assert_eq!(params.step, Duration::from_millis(50));
        assert_eq!(params.period, Duration::from_millis(500));
        assert_eq!(params.reference, 2_000_000.0);
        assert!(params.track_queue);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[control]\nalpha = -1.0").unwrap();
        assert!(matches!(
            ControlConfig::from_file(file.path()),
            Err(ConfigError::Invalid(_))
        ));

        assert!(matches!(
            ControlConfig::from_file("/nonexistent/nfs.toml"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_validation_rules() {
        let invalid = |f: fn(&mut ControlConfig)| {
            let mut config = ControlConfig::default();
            f(&mut config);
            config.validate().is_err()
        };

        assert!(invalid(|c| c.server.socket_path = PathBuf::new()));
        assert!(invalid(|c| c.control.step_length_ms = 0));
        assert!(invalid(|c| c.control.period_length_ms = 0));
        assert!(invalid(|c| c.control.period_length_ms = 250));
        assert!(invalid(|c| c.control.step_length_ms = 300));
        assert!(invalid(|c| c.control.alpha = 0.0));
        assert!(invalid(|c| c.control.alpha = f64::NAN));
        assert!(invalid(|c| c.tables.rx = String::new()));
        assert!(invalid(|c| c.tables.queue = Some(String::new())));
        assert!(invalid(|c| c.fabric.hosts.clear()));
        assert!(invalid(|c| c.fabric.network.subnet_prefix = "10.0.".into()));
        assert!(invalid(|c| c.fabric.network.netmask = "24".into()));
    }
}
