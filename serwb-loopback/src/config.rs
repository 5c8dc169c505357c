//! Configuration for the loopback simulator.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serwb_core::LinkConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// Link settings shared by both endpoints.
    pub link: LinkConfig,
    /// Simulated lane pair.
    pub wire: WireConfig,
    /// Scripted bus traffic.
    pub traffic: TrafficConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Simulated lane settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    /// Receive phase of the slave side, in bits.
    pub skew_ab: u32,
    /// Receive phase of the master side, in bits.
    pub skew_ba: u32,
    /// Flip one bit every this many words on each direction (0 = clean).
    pub error_interval: u64,
    /// Raw words buffered in each direction.
    pub depth: usize,
    /// Give up if the link is not READY after this many milliseconds.
    pub ready_timeout_ms: u64,
}

/// Bus traffic pushed through the tunnel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// First byte address written.
    pub base_address: u32,
    /// Number of words written and read back.
    pub words: usize,
    /// Use burst transfers instead of single-word accesses.
    pub burst: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            skew_ab: 7,
            skew_ba: 23,
            error_interval: 0,
            depth: 8,
            ready_timeout_ms: 5_000,
        }
    }
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            base_address: 0x1000,
            words: 256,
            burst: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl LoopbackConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = LoopbackConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("skew_ab"));
        assert!(text.contains("confirm_window"));
        assert!(text.contains("base_address"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = LoopbackConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: LoopbackConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.wire.skew_ba, 23);
        assert_eq!(parsed.link, LinkConfig::default());
        assert_eq!(parsed.traffic.words, 256);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let parsed: LoopbackConfig = toml::from_str(
            r#"
            [link]
            lanes = 2

            [link.training]
            confirm_window = 128

            [wire]
            skew_ab = 3
            "#,
        )
        .unwrap();
        assert_eq!(parsed.link.lanes, 2);
        assert_eq!(parsed.link.training.confirm_window, 128);
        assert_eq!(parsed.link.training.send_dwell, 64);
        assert_eq!(parsed.wire.skew_ab, 3);
        assert_eq!(parsed.wire.skew_ba, 23);
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn written_default_loads_back() {
        let path = std::env::temp_dir().join(format!("serwb-loopback-{}.toml", std::process::id()));
        LoopbackConfig::write_default(&path).unwrap();
        let cfg = LoopbackConfig::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(cfg.wire.depth, 8);
        assert!(cfg.traffic.burst);
    }

    #[test]
    fn missing_file_falls_back() {
        let cfg = LoopbackConfig::load(Path::new("/nonexistent/serwb-loopback.toml"));
        assert_eq!(cfg.traffic.base_address, 0x1000);
    }
}
