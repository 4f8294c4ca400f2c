//! Top-level configuration, loaded from a TOML file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use drover_accounting::{BridgeConfig, PollerConfig};
use drover_common::{Campaign, Tuning};
use drover_control::ControlAuthConfig;
use drover_dispatch::{InjectConfig, RegistryConfig, RetryPolicy};
use drover_pressure::{DomainHealthConfig, MetricsSourceConfig, PressureConfig};

/// Durable store selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Rows are lost on restart; for tests and rehearsals.
    Memory,
    /// JSON rows under a directory, written atomically.
    File { path: PathBuf },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::File {
            path: PathBuf::from("./drover-state"),
        }
    }
}

/// Control-socket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    #[serde(default)]
    pub auth: ControlAuthConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            auth: ControlAuthConfig::default(),
        }
    }
}

fn default_socket_path() -> String {
    drover_control::DEFAULT_CONTROL_SOCKET.to_string()
}

/// The whole deployment configuration.
///
/// `metrics`, `inject`, and `bridge` are optional: without a metrics
/// endpoint the MTA reads as idle, without an injection endpoint
/// dispatch dry-runs through the log transport, and without a bridge
/// no accounting poller is started.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DroverConfig {
    #[serde(default)]
    pub tuning: Tuning,

    #[serde(default)]
    pub pressure: PressureConfig,

    #[serde(default)]
    pub domain_health: DomainHealthConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub control: ControlConfig,

    pub metrics: Option<MetricsSourceConfig>,
    pub inject: Option<InjectConfig>,
    pub bridge: Option<BridgeConfig>,

    /// Campaign definitions. In a full deployment these come from the
    /// UI layer; the file form covers headless operation.
    #[serde(default)]
    pub campaigns: Vec<Campaign>,
}

impl DroverConfig {
    /// Load from a TOML file.
    ///
    /// # Errors
    /// I/O and syntax errors, with the path in the message.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_parses_with_defaults() {
        let config: DroverConfig = toml::from_str("").unwrap();
        assert!(config.metrics.is_none());
        assert!(config.campaigns.is_empty());
        assert!(matches!(config.store, StoreConfig::File { .. }));
    }

    #[test]
    fn test_full_config_parses() {
        let raw = r#"
            [tuning]
            chunk_size = 25
            worker_limit = 4

            [store]
            backend = "memory"

            [control]
            socket_path = "/run/drover.sock"

            [metrics]
            base_url = "http://mta.internal:8081"
            api_key = "k"

            [bridge]
            base_url = "http://mta.internal:8900"
            token = "t"

            [[campaigns]]
            id = "spring-launch"
            recipients = ["a@example.com"]
            senders = [{ address = "news@sender.example", name = "News" }]
        "#;

        let config: DroverConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.tuning.chunk_size, 25);
        assert!(matches!(config.store, StoreConfig::Memory));
        assert_eq!(config.campaigns.len(), 1);
        assert_eq!(config.campaigns[0].senders[0].address, "news@sender.example");
    }
}
