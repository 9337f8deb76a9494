use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Server configuration, loadable from a YAML file. Every field has a
/// default so a partial (or absent) file works.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Port the HTTP/WebSocket server listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Time a contended, unacknowledged lock must age before it may be
    /// force-released.
    #[serde(default = "default_override_window_ms")]
    pub override_window_ms: u64,

    /// Cadence of the idle-link sweep.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Heartbeat staleness after which a linked operator is force-unlinked.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Maximum number of concurrently paired devices.
    #[serde(default = "default_pairing_capacity")]
    pub pairing_capacity: usize,
}

fn default_port() -> u16 {
    8080
}

fn default_override_window_ms() -> u64 {
    5_000
}

fn default_sweep_interval_ms() -> u64 {
    10_000
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_pairing_capacity() -> usize {
    1_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            override_window_ms: default_override_window_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            pairing_capacity: default_pairing_capacity(),
        }
    }
}

impl Config {
    /// Load from a YAML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn override_window(&self) -> Duration {
        Duration::from_millis(self.override_window_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = Config::default();
        assert_eq!(config.override_window(), Duration::from_secs(5));
        assert_eq!(config.sweep_interval(), Duration::from_secs(10));
        assert_eq!(config.idle_timeout(), Duration::from_secs(30));
        assert_eq!(config.pairing_capacity, 1000);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("teleop.yaml")).unwrap();
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("teleop.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "port: 9000\noverride_window_ms: 250").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.override_window(), Duration::from_millis(250));
        assert_eq!(config.idle_timeout_ms, 30_000);
    }
}
