use crate::verifier::DEFAULT_MIN_UPLINK_POWER;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_TELEMETRY_ADDR: &str = "127.0.0.1:8081";
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("speed must be a positive number, got {0}")]
    InvalidSpeed(f64),
    #[error("minimum uplink power must be within 0..=100, got {0}")]
    InvalidUplinkPower(f64),
    #[error("reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Process-level settings for the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub control_addr: String,
    pub telemetry_addr: String,
    /// Holds `scenarios/` and the blob store.
    pub data_dir: PathBuf,
    /// Simulated seconds per wall-clock second.
    pub speed: f64,
    /// Store every downlinked frame in the blob store.
    pub archive_frames: bool,
    pub min_uplink_power: f64,
    /// Fixed seed for temperature jitter and spectrum noise.
    pub rng_seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            control_addr: DEFAULT_CONTROL_ADDR.to_string(),
            telemetry_addr: DEFAULT_TELEMETRY_ADDR.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            speed: 1.0,
            archive_frames: false,
            min_uplink_power: DEFAULT_MIN_UPLINK_POWER,
            rng_seed: None,
        }
    }
}

impl SimConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SimConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(ConfigError::InvalidSpeed(self.speed));
        }
        if !(0.0..=100.0).contains(&self.min_uplink_power) {
            return Err(ConfigError::InvalidUplinkPower(self.min_uplink_power));
        }
        Ok(())
    }

    pub fn scenario_dir(&self) -> PathBuf {
        self.data_dir.join("scenarios")
    }

    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SimConfig::default();
        config.validate().unwrap();
        assert_eq!(config.scenario_dir(), PathBuf::from("data/scenarios"));
    }

    #[test]
    fn rejects_non_positive_speed() {
        for speed in [0.0, -2.0, f64::NAN] {
            let config = SimConfig { speed, ..SimConfig::default() };
            assert!(matches!(config.validate(), Err(ConfigError::InvalidSpeed(_))));
        }
    }

    #[test]
    fn loads_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simops.json");
        std::fs::write(&path, r#"{"speed": 10, "archive_frames": true}"#).unwrap();
        let config = SimConfig::load(&path).unwrap();
        assert_eq!(config.speed, 10.0);
        assert!(config.archive_frames);
        assert_eq!(config.control_addr, DEFAULT_CONTROL_ADDR);
    }
}
