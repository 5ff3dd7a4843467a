//! Modem profile: per-configuration constants and analysis tunables.
//!
//! The embedded defaults describe the waveform table the logs were produced
//! with. A YAML profile file can override any part of it; fields left out
//! keep their defaults, and a `configs` section replaces the table wholesale.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use color_eyre::eyre::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

/// Static properties of one modem configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigProps {
    pub name: String,
    pub modulation: String,
    /// Data symbols per frame; absent for the MFSK robust modes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsymb: Option<u32>,
    /// Preamble length in symbols
    pub preamble: u32,
    /// Nominal message transmit time in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_ms: Option<u32>,
}

/// Analysis thresholds. These are working defaults, not protocol constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunables {
    /// One-sided silence longer than this marks the quiet peer as crashed
    #[serde(with = "humantime_serde")]
    pub silence_threshold: Duration,
    /// Fabricated time per line for logs without timestamps
    #[serde(with = "humantime_serde")]
    pub line_time_step: Duration,
    /// Half-duplex turnaround allowance used for buffer sizing, in symbols
    pub turnaround_symbols: u32,
    /// Search-window coverage above this percentage is OK
    pub coverage_ok_pct: f64,
    /// Coverage above this percentage is NARROW, below it CRITICAL
    pub coverage_narrow_pct: f64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            silence_threshold: Duration::from_secs(10),
            line_time_step: Duration::from_millis(1),
            turnaround_symbols: 57,
            coverage_ok_pct: 80.0,
            coverage_narrow_pct: 50.0,
        }
    }
}

/// Complete analysis profile: configuration table plus tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemProfile {
    pub configs: BTreeMap<u32, ConfigProps>,
    pub tunables: Tunables,
}

impl Default for ModemProfile {
    fn default() -> Self {
        let mut configs = BTreeMap::new();

        // MFSK robust modes carrying control traffic. No fixed frame length,
        // so coverage is never computed for them.
        configs.insert(100, props("ROBUST_0", "32-MFSK", None, 4, None));
        configs.insert(101, props("ROBUST_1", "16-MFSK", None, 4, None));
        configs.insert(102, props("ROBUST_2", "16-MFSK", None, 4, None));

        // Data configs in increasing throughput order
        for id in 0..=6 {
            let name = format!("CONFIG_{}", id);
            configs.insert(id, props(&name, "BPSK", Some(48), 4, Some(1179)));
        }
        for id in 7..=9 {
            let name = format!("CONFIG_{}", id);
            configs.insert(id, props(&name, "QPSK", Some(24), 4, Some(635)));
        }
        configs.insert(10, props("CONFIG_10", "8PSK", Some(16), 3, Some(431)));
        configs.insert(11, props("CONFIG_11", "8PSK", Some(16), 3, Some(431)));
        configs.insert(12, props("CONFIG_12", "QPSK", Some(24), 3, Some(612)));
        configs.insert(13, props("CONFIG_13", "16QAM", Some(12), 2, Some(317)));
        configs.insert(14, props("CONFIG_14", "8PSK", Some(16), 2, Some(408)));
        configs.insert(15, props("CONFIG_15", "16QAM", Some(12), 2, Some(317)));
        configs.insert(16, props("CONFIG_16", "32QAM", Some(9), 1, Some(227)));

        Self {
            configs,
            tunables: Tunables::default(),
        }
    }
}

fn props(
    name: &str,
    modulation: &str,
    nsymb: Option<u32>,
    preamble: u32,
    tx_ms: Option<u32>,
) -> ConfigProps {
    ConfigProps {
        name: name.to_string(),
        modulation: modulation.to_string(),
        nsymb,
        preamble,
        tx_ms,
    }
}

/// Profile validation errors
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("Invalid config entry {0}: {1}")]
    InvalidConfig(u32, String),
    #[error("Invalid tunables: {0}")]
    InvalidTunables(String),
}

impl ModemProfile {
    /// Validate the profile
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.configs.is_empty() {
            return Err(ProfileError::InvalidTunables(
                "config table cannot be empty".to_string(),
            ));
        }

        for (id, props) in &self.configs {
            if props.name.is_empty() {
                return Err(ProfileError::InvalidConfig(
                    *id,
                    "name cannot be empty".to_string(),
                ));
            }
            if props.preamble == 0 {
                return Err(ProfileError::InvalidConfig(
                    *id,
                    "preamble length cannot be zero".to_string(),
                ));
            }
        }

        let t = &self.tunables;
        if t.line_time_step.is_zero() {
            return Err(ProfileError::InvalidTunables(
                "line_time_step cannot be zero".to_string(),
            ));
        }
        if t.coverage_narrow_pct >= t.coverage_ok_pct {
            return Err(ProfileError::InvalidTunables(format!(
                "coverage_narrow_pct ({}) must be below coverage_ok_pct ({})",
                t.coverage_narrow_pct, t.coverage_ok_pct
            )));
        }

        Ok(())
    }

    /// Properties for a config id, if the table knows it
    pub fn props(&self, id: u32) -> Option<&ConfigProps> {
        self.configs.get(&id)
    }

    /// Display name for a config id, with a generic fallback
    pub fn config_name(&self, id: u32) -> String {
        match self.configs.get(&id) {
            Some(p) => p.name.clone(),
            None => format!("CONFIG_{}", id),
        }
    }
}

/// Load profile overrides from a YAML file
pub fn load_profile(path: &Path) -> Result<ModemProfile> {
    info!("Loading profile overrides from: {:?}", path);

    let file = File::open(path)
        .with_context(|| format!("Failed to open profile file: {}", path.display()))?;

    let profile: ModemProfile = serde_yaml::from_reader(file)
        .with_context(|| format!("Failed to parse profile file: {}", path.display()))?;

    profile.validate()?;

    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_table() {
        let profile = ModemProfile::default();
        assert_eq!(profile.configs.len(), 20);

        let c0 = profile.props(0).unwrap();
        assert_eq!(c0.modulation, "BPSK");
        assert_eq!(c0.nsymb, Some(48));
        assert_eq!(c0.preamble, 4);

        let c16 = profile.props(16).unwrap();
        assert_eq!(c16.modulation, "32QAM");
        assert_eq!(c16.nsymb, Some(9));
        assert_eq!(c16.preamble, 1);

        let robust = profile.props(101).unwrap();
        assert_eq!(robust.name, "ROBUST_1");
        assert_eq!(robust.nsymb, None);
    }

    #[test]
    fn test_config_name_fallback() {
        let profile = ModemProfile::default();
        assert_eq!(profile.config_name(7), "CONFIG_7");
        assert_eq!(profile.config_name(100), "ROBUST_0");
        assert_eq!(profile.config_name(42), "CONFIG_42");
    }

    #[test]
    fn test_load_profile_tunables_only() {
        let yaml = r#"
tunables:
  silence_threshold: "20s"
  turnaround_symbols: 60
"#;
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml).unwrap();

        let profile = load_profile(temp_file.path()).unwrap();
        assert_eq!(profile.tunables.silence_threshold, Duration::from_secs(20));
        assert_eq!(profile.tunables.turnaround_symbols, 60);
        // Untouched fields keep their defaults
        assert_eq!(profile.tunables.coverage_ok_pct, 80.0);
        assert_eq!(profile.configs.len(), 20);
    }

    #[test]
    fn test_load_profile_replaces_table() {
        let yaml = r#"
configs:
  3:
    name: "CONFIG_3"
    modulation: "BPSK"
    nsymb: 48
    preamble: 4
"#;
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml).unwrap();

        let profile = load_profile(temp_file.path()).unwrap();
        assert_eq!(profile.configs.len(), 1);
        assert_eq!(profile.props(3).unwrap().tx_ms, None);
    }

    #[test]
    fn test_validate_rejects_zero_preamble() {
        let mut profile = ModemProfile::default();
        profile.configs.get_mut(&5).unwrap().preamble = 0;
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut profile = ModemProfile::default();
        profile.tunables.coverage_narrow_pct = 90.0;
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_table() {
        let profile = ModemProfile {
            configs: BTreeMap::new(),
            tunables: Tunables::default(),
        };
        assert!(profile.validate().is_err());
    }
}
