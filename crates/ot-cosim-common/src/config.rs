//! ---
//! cosim_section: "01-core-functionality"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Shared primitives and utilities for the co-simulation runtime."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_pub_endpoint() -> String {
    "tcp://127.0.0.1:5678".to_owned()
}

fn default_pull_endpoint() -> String {
    "tcp://127.0.0.1:1234".to_owned()
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_report_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_io_name() -> String {
    "ot-sim-io".to_owned()
}

fn default_broker_endpoint() -> String {
    "127.0.0.1".to_owned()
}

fn default_federate_log_level() -> String {
    "SUMMARY".to_owned()
}

fn default_start_time() -> i64 {
    1
}

fn default_end_time() -> i64 {
    3600
}

fn default_step_time() -> i64 {
    1
}

/// Primary configuration object for the co-simulation daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub message_bus: MessageBusConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub federation: FederationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub io: Vec<IoConfig>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "OT_COSIM_CONFIG";

    /// Load configuration from disk, respecting the `OT_COSIM_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Retrieve an I/O module configuration by name.
    pub fn io_module(&self, name: &str) -> Option<&IoConfig> {
        self.io.iter().find(|io| io.name == name)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for io in &self.io {
            io.validate()?;
            if !seen.insert(io.name.as_str()) {
                return Err(anyhow!("duplicate io module name '{}'", io.name));
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Endpoints of the shared message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBusConfig {
    /// Fan-out side: subscribers connect here.
    #[serde(default = "default_pub_endpoint")]
    pub pub_endpoint: String,
    /// Collector side: pushers connect here.
    #[serde(default = "default_pull_endpoint")]
    pub pull_endpoint: String,
}

impl Default for MessageBusConfig {
    fn default() -> Self {
        Self {
            pub_endpoint: default_pub_endpoint(),
            pull_endpoint: default_pull_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Settings for the in-process loopback federation.
#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Wall-clock delay applied after each granted step; zero runs as fast as possible.
    #[serde(default)]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "pacing_ms")]
    pub pacing: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
    /// Cadence of the bus metrics reporter.
    #[serde(default = "default_report_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "report_interval_ms")]
    pub report_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
            report_interval: default_report_interval(),
        }
    }
}

/// One bus-to-federate I/O module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoConfig {
    #[serde(default = "default_io_name")]
    pub name: String,
    #[serde(default = "default_broker_endpoint")]
    pub broker_endpoint: String,
    /// Defaults to the module name when omitted.
    #[serde(default)]
    pub federate_name: Option<String>,
    #[serde(default = "default_federate_log_level")]
    pub federate_log_level: String,
    #[serde(default = "default_start_time")]
    pub start_time: i64,
    #[serde(default = "default_end_time")]
    pub end_time: i64,
    #[serde(default = "default_step_time")]
    pub step_time: i64,
    /// Overrides `[message_bus] pub_endpoint` for this module.
    #[serde(default)]
    pub pub_endpoint: Option<String>,
    /// Overrides `[message_bus] pull_endpoint` for this module.
    #[serde(default)]
    pub pull_endpoint: Option<String>,
    #[serde(default, rename = "subscription")]
    pub subscriptions: Vec<IoPointConfig>,
    #[serde(default, rename = "publication")]
    pub publications: Vec<IoPointConfig>,
    #[serde(default, rename = "endpoint")]
    pub endpoints: Vec<IoEndpointConfig>,
}

impl IoConfig {
    pub fn federate_name(&self) -> &str {
        self.federate_name.as_deref().unwrap_or(&self.name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("io module name must not be empty"));
        }
        if self.step_time <= 0 {
            return Err(anyhow!(
                "io module '{}' must use a positive step_time (got {})",
                self.name,
                self.step_time
            ));
        }
        if self.end_time < self.start_time {
            return Err(anyhow!(
                "io module '{}' ends ({}) before it starts ({})",
                self.name,
                self.end_time,
                self.start_time
            ));
        }
        for endpoint in &self.endpoints {
            if endpoint.name.trim().is_empty() {
                return Err(anyhow!(
                    "io module '{}' declares an endpoint without a name",
                    self.name
                ));
            }
        }
        Ok(())
    }
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            name: default_io_name(),
            broker_endpoint: default_broker_endpoint(),
            federate_name: None,
            federate_log_level: default_federate_log_level(),
            start_time: default_start_time(),
            end_time: default_end_time(),
            step_time: default_step_time(),
            pub_endpoint: None,
            pull_endpoint: None,
            subscriptions: Vec::new(),
            publications: Vec::new(),
            endpoints: Vec::new(),
        }
    }
}

/// A federate publication or subscription exposed as a bus tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoPointConfig {
    pub key: String,
    /// Federate data type name (`double`, `boolean`, `complex-vector`, ...).
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub global: bool,
}

impl IoPointConfig {
    /// Canonical tag for this point: the explicit tag, else the second
    /// `/`-separated segment of the key, else the key itself.
    pub fn resolved_tag(&self) -> String {
        if let Some(tag) = self.tag.as_deref().filter(|tag| !tag.is_empty()) {
            return tag.to_owned();
        }
        let mut parts = self.key.split('/');
        match (parts.next(), parts.next()) {
            (_, Some(second)) => second.to_owned(),
            (Some(first), None) => first.to_owned(),
            (None, None) => self.key.clone(),
        }
    }
}

/// A destination federate endpoint receiving routed tag updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoEndpointConfig {
    pub name: String,
    #[serde(default, rename = "tag")]
    pub tags: Vec<IoEndpointTag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoEndpointTag {
    pub tag: String,
    /// Key used in the outgoing message; defaults to the tag.
    #[serde(default)]
    pub key: Option<String>,
}

impl IoEndpointTag {
    pub fn resolved_key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.tag)
    }
}
