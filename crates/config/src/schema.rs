//! Config schema types (server, database, dispatch pacing, sidecar, metrics).
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub dispatch: DispatchConfig,
    pub sidecar: SidecarConfig,
    pub metrics: MetricsConfig,
}

/// Gateway server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path. `None` means `<data_dir>/herald.db`.
    pub path: Option<PathBuf>,
}

/// Pacing defaults applied when a run request does not carry its own values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Seconds to wait between two consecutive send attempts.
    pub message_delay_secs: f64,
    /// Seconds to wait between cycles when the request omits `delay_seconds`.
    pub default_cycle_delay_secs: f64,
    /// Consecutive idle cycles (no ready channel) after which a run is
    /// finalized as stalled. Unset means wait forever.
    pub max_idle_cycles: Option<u32>,
    /// How long shutdown waits for cancelled runs to finalize.
    pub shutdown_grace_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            message_delay_secs: 1.0,
            default_cycle_delay_secs: 0.0,
            max_idle_cycles: None,
            shutdown_grace_secs: 10,
        }
    }
}

impl DispatchConfig {
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// WhatsApp Web sidecar connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// WebSocket URL of the sidecar process.
    pub url: String,
    pub request_timeout_secs: u64,
    /// Connection attempts before giving up.
    pub connect_retries: u32,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3001".into(),
            request_timeout_secs: 30,
            connect_retries: 5,
        }
    }
}

impl SidecarConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let cfg: HeraldConfig = toml::from_str("[server]\nport = 8080\n").unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.bind, "127.0.0.1");
        assert!((cfg.dispatch.message_delay_secs - 1.0).abs() < f64::EPSILON);
        assert!(cfg.dispatch.max_idle_cycles.is_none());
        assert!(cfg.metrics.enabled);
    }

    #[test]
    fn durations_from_seconds() {
        let dispatch = DispatchConfig {
            shutdown_grace_secs: 3,
            ..DispatchConfig::default()
        };
        assert_eq!(dispatch.shutdown_grace(), Duration::from_secs(3));
        assert_eq!(
            SidecarConfig::default().request_timeout(),
            Duration::from_secs(30)
        );
    }
}
