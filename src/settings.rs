//! Session settings
//!
//! Loaded once from an optional `config.toml` with environment overrides for
//! the Azure credentials. Settings are never written back to disk; preset
//! persistence belongs to the UI layer.

use crate::phrases::DEFAULT_PHRASES;
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use zeroize::Zeroize;

/// Environment variable overriding the Azure Speech key.
pub const ENV_AZURE_KEY: &str = "AZURE_SPEECH_KEY";
/// Environment variable overriding the Azure Speech region.
pub const ENV_AZURE_REGION: &str = "AZURE_SPEECH_REGION";

/// User-facing configuration for a caption session.
///
/// Empty strings mean "not configured", matching the share-link parameter
/// conventions of the control panel.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Azure Speech subscription key (zeroized on drop)
    #[serde(default)]
    pub azure_key: String,
    /// Azure Speech region (e.g., "westeurope")
    #[serde(default = "default_azure_region")]
    pub azure_region: String,
    /// Source language as a BCP-47 tag (e.g., "en-US"), or "auto"
    #[serde(default = "default_source_language")]
    pub source_language: String,
    /// Target language short code (e.g., "nl"); empty disables translation
    #[serde(default)]
    pub target_language: String,
    /// Preferred audio input device id; empty selects the default device
    #[serde(default)]
    pub audio_device_id: String,
    /// Custom-vocabulary phrases fed to the recognizer
    #[serde(default)]
    pub phrases: Vec<String>,
    /// Seed `phrases` with the built-in conference term list
    #[serde(default)]
    pub use_default_phrases: bool,
}

fn default_azure_region() -> String {
    "westeurope".to_string()
}

fn default_source_language() -> String {
    "en-US".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            azure_key: String::new(),
            azure_region: "westeurope".to_string(),
            source_language: "en-US".to_string(),
            target_language: String::new(),
            audio_device_id: String::new(),
            phrases: Vec::new(),
            use_default_phrases: false,
        }
    }
}

impl Drop for Settings {
    fn drop(&mut self) {
        self.azure_key.zeroize();
    }
}

impl Settings {
    /// Whether both Azure credentials are present.
    pub fn has_credentials(&self) -> bool {
        !self.azure_key.is_empty() && !self.azure_region.is_empty()
    }

    /// Load settings from `path` (if it exists) and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let mut settings = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|e| SettingsError::Read {
                path: path.to_path_buf(),
                source: e,
            })?;
            let parsed: Settings = toml::from_str(&contents).map_err(|e| SettingsError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?;
            info!("Loaded settings from {:?}", path);
            parsed
        } else {
            Settings::default()
        };

        if let Ok(key) = std::env::var(ENV_AZURE_KEY) {
            settings.azure_key = key;
        }
        if let Ok(region) = std::env::var(ENV_AZURE_REGION) {
            settings.azure_region = region;
        }

        if settings.use_default_phrases {
            let existing = settings.phrases.clone();
            settings.phrases = DEFAULT_PHRASES
                .iter()
                .cloned()
                .chain(existing)
                .collect();
        }

        Ok(settings)
    }
}

/// Settings loading errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_credentials() {
        let settings = Settings::default();
        assert!(!settings.has_credentials());
        assert_eq!(settings.azure_region, "westeurope");
        assert_eq!(settings.source_language, "en-US");
    }

    #[test]
    fn parses_partial_toml() {
        let settings: Settings =
            toml::from_str("azure_key = \"k\"\nazure_region = \"northeurope\"\n").unwrap();
        assert!(settings.has_credentials());
        assert_eq!(settings.azure_region, "northeurope");
        assert_eq!(settings.source_language, "en-US");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = Settings::load(Path::new("/nonexistent/livesubs-config.toml")).unwrap();
        assert_eq!(settings.source_language, "en-US");
    }
}
