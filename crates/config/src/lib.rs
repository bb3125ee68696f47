//! Configuration loading, validation, and management for crosstalk.
//!
//! Loads provider profiles from `~/.crosstalk/config.toml` with environment
//! variable overrides. A profile names the wire dialect a provider speaks
//! and the default generation options that `apply_options` falls back to.

use crosstalk_core::GenerateOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Wire dialects known to the formats factory.
pub const KNOWN_FORMATS: &[&str] = &[
    "openai-chat",
    "openai-reasoning",
    "ollama",
    "deepseek",
    "anthropic",
    "gemini",
];

/// The root configuration structure.
///
/// Maps directly to `~/.crosstalk/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatConfig {
    /// Which provider profile to use when the caller names none
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Provider profiles, keyed by provider name
    #[serde(default)]
    pub providers: HashMap<String, ProviderProfile>,
}

fn default_provider() -> String {
    "openai".into()
}

/// One provider's formatting profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// Wire dialect this provider speaks (see [`KNOWN_FORMATS`])
    #[serde(default = "default_format")]
    pub format: String,

    /// Preamble prepended to the first merged conversation run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preamble: Option<String>,

    /// Default generation options for this provider
    #[serde(default)]
    pub defaults: GenerateOptions,
}

fn default_format() -> String {
    "openai-chat".into()
}

impl Default for ProviderProfile {
    fn default() -> Self {
        Self {
            format: default_format(),
            preamble: None,
            defaults: GenerateOptions::default(),
        }
    }
}

impl FormatConfig {
    /// Load configuration from the default path (~/.crosstalk/config.toml).
    ///
    /// `CROSSTALK_PROVIDER` overrides `default_provider`.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(provider) = std::env::var("CROSSTALK_PROVIDER") {
            config.default_provider = provider;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        tracing::debug!(
            providers = config.providers.len(),
            default = %config.default_provider,
            "Loaded format configuration"
        );
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".crosstalk")
    }

    /// The profile for the given provider, or a default profile.
    pub fn profile(&self, provider: &str) -> ProviderProfile {
        self.providers.get(provider).cloned().unwrap_or_default()
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, profile) in &self.providers {
            if !KNOWN_FORMATS.contains(&profile.format.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "provider '{}' names unknown format '{}'",
                    name, profile.format
                )));
            }
            if let Some(temp) = profile.defaults.temperature {
                if !(0.0..=2.0).contains(&temp) {
                    return Err(ConfigError::ValidationError(format!(
                        "provider '{}' temperature must be between 0.0 and 2.0",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn default_config_is_valid() {
        let config = FormatConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_provider, "openai");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = FormatConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_provider, "openai");
        assert!(config.providers.is_empty());
    }

    #[test]
    fn parses_provider_profiles() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
default_provider = "claude"

[providers.claude]
format = "anthropic"
preamble = "You are in a group conversation."

[providers.claude.defaults]
temperature = 0.5
max_tokens = 2048

[providers.local]
format = "ollama"
"#
        )
        .unwrap();

        let config = FormatConfig::load_from(file.path()).unwrap();
        assert_eq!(config.default_provider, "claude");

        let claude = config.profile("claude");
        assert_eq!(claude.format, "anthropic");
        assert_eq!(
            claude.preamble.as_deref(),
            Some("You are in a group conversation.")
        );
        assert_eq!(claude.defaults.temperature, Some(0.5));
        assert_eq!(claude.defaults.max_tokens, Some(2048));

        assert_eq!(config.profile("local").format, "ollama");
        // Unknown providers fall back to the default profile
        assert_eq!(config.profile("mystery").format, "openai-chat");
    }

    #[test]
    fn rejects_unknown_format() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[providers.bad]
format = "smoke-signals"
"#
        )
        .unwrap();

        let err = FormatConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("smoke-signals"));
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[providers.hot]
format = "openai-chat"

[providers.hot.defaults]
temperature = 3.5
"#
        )
        .unwrap();

        let err = FormatConfig::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_provider = [broken").unwrap();
        let err = FormatConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn default_toml_roundtrips() {
        let rendered = FormatConfig::default_toml();
        let back: FormatConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(back.default_provider, "openai");
    }
}
