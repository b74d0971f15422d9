//! Persisted settings

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SettingsError;

/// Samples kept per history buffer unless configured otherwise
pub const DEFAULT_SAMPLE_COUNT: usize = 512;

/// Plugin and host settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Selected devices, in their flat list formats
    /// `ifIndex,luid,guid` triples
    pub network_list: String,
    /// Device interface paths
    pub disk_list: String,
    pub gpu_list: String,
    pub rapl_list: String,

    /// Query adapters through NDIS before falling back to the IP helper
    pub enable_ndis: bool,
    /// Offer non-hardware network interfaces when listing candidates
    pub enable_hidden_adapters: bool,
    /// History length per buffer
    pub sample_count: usize,

    /// Tick interval in milliseconds
    pub refresh_rate_ms: u64,
    /// Per-device query timeout in milliseconds
    pub query_timeout_ms: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            network_list: String::new(),
            disk_list: String::new(),
            gpu_list: String::new(),
            rapl_list: String::new(),

            enable_ndis: true,
            enable_hidden_adapters: false,
            sample_count: DEFAULT_SAMPLE_COUNT,

            refresh_rate_ms: 1000,
            query_timeout_ms: None,
        }
    }
}

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "hardware-devices")
            .map(|dirs| dirs.config_dir().join("settings.json"))
    }

    /// Load settings from the default location, or return defaults
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                log::warn!("Failed to load settings from {}: {}", path.display(), e);
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings.sanitized())
    }

    /// Save settings to the default location
    pub fn save(&self) -> Result<(), SettingsError> {
        match Self::config_path() {
            Some(path) => self.save_to(&path),
            None => {
                log::warn!("No settings directory available, settings not saved");
                Ok(())
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Clamp out-of-range values
    pub fn sanitized(mut self) -> Self {
        if self.sample_count == 0 {
            log::warn!("sample_count of 0 is not allowed, using 1");
            self.sample_count = 1;
        }
        self
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_rate_ms.max(1))
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.enable_ndis);
        assert!(!settings.enable_hidden_adapters);
        assert_eq!(settings.sample_count, 512);
        assert_eq!(settings.refresh_interval(), Duration::from_secs(1));
        assert_eq!(settings.query_timeout(), None);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"enable_ndis": false, "disk_list": "\\\\?\\a"}"#).unwrap();
        assert!(!settings.enable_ndis);
        assert_eq!(settings.disk_list, r"\\?\a");
        assert_eq!(settings.sample_count, DEFAULT_SAMPLE_COUNT);
    }

    #[test]
    fn test_zero_sample_count_clamped() {
        let settings = Settings {
            sample_count: 0,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(settings.sample_count, 1);
    }
}
