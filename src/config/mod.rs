//! Configuration loaded from a TOML file
//!
//! Every section is optional and falls back to its defaults. Secrets left
//! empty in the file are taken from the environment when available.

use crate::error::ConfigError;
use crate::health::BaselinePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const SUPABASE_URL_VAR: &str = "SUPABASE_URL";
pub const SUPABASE_ANON_KEY_VAR: &str = "SUPABASE_ANON_KEY";
pub const BLOB_TOKEN_VAR: &str = "BLOB_READ_WRITE_TOKEN";

/// Longest accepted alert rate-limit window, ten years
pub const MAX_ALERT_WINDOW_SECONDS: u64 = 10 * 365 * 86_400;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ai: AIConfig,
    pub store: StoreConfig,
    pub blob: BlobConfig,
    pub health: HealthConfig,
    pub alerts: AlertsConfig,
    pub watch: WatchConfig,
}

/// Analysis provider selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum AIBackendConfig {
    Ollama {
        #[serde(default = "default_ollama_endpoint")]
        endpoint: String,
        #[serde(default = "default_ollama_model")]
        model: String,
    },
    OpenAI {
        #[serde(default)]
        api_key: String,
        #[serde(default = "default_openai_model")]
        model: String,
        #[serde(default = "default_openai_base_url")]
        base_url: String,
    },
    Mock,
}

impl Default for AIBackendConfig {
    fn default() -> Self {
        AIBackendConfig::OpenAI {
            api_key: String::new(),
            model: default_openai_model(),
            base_url: default_openai_base_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AIConfig {
    /// Selected by the `backend` key, which is required once `[ai]` is present
    #[serde(flatten)]
    pub backend: AIBackendConfig,
    /// Replace unparseable replies with a randomized estimate
    #[serde(default = "default_true")]
    pub fallback: bool,
    #[serde(default = "default_ai_timeout")]
    pub timeout_seconds: u64,
}

impl Default for AIConfig {
    fn default() -> Self {
        Self {
            backend: AIBackendConfig::default(),
            fallback: true,
            timeout_seconds: default_ai_timeout(),
        }
    }
}

impl AIConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    Memory {
        #[serde(default = "default_true")]
        demo_data: bool,
    },
    Rest {
        #[serde(default)]
        url: String,
        #[serde(default)]
        api_key: String,
        #[serde(default = "default_store_timeout")]
        timeout_seconds: u64,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory { demo_data: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BlobConfig {
    Fs {
        #[serde(default = "default_blob_root")]
        root: PathBuf,
        #[serde(default)]
        public_base: Option<String>,
    },
    Http {
        #[serde(default)]
        base_url: String,
        #[serde(default)]
        token: String,
    },
}

impl Default for BlobConfig {
    fn default() -> Self {
        BlobConfig::Fs {
            root: default_blob_root(),
            public_base: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// What to do when the earliest value of a metric is zero
    pub zero_baseline: BaselinePolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Melt rate increase, in percent, that raises RAPID_MELT
    pub rapid_melt_pct: f64,
    /// Ice volume decrease, in percent, that raises VOLUME_LOSS
    pub volume_loss_pct: f64,
    pub window_seconds: u64,
    /// Alerts allowed per glacier and type inside the window
    pub max_per_window: usize,
}

impl AlertsConfig {
    /// Rate-limit window, capped at `MAX_ALERT_WINDOW_SECONDS`
    pub fn window(&self) -> chrono::Duration {
        let seconds = self.window_seconds.min(MAX_ALERT_WINDOW_SECONDS);
        chrono::Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX))
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            rapid_melt_pct: 25.0,
            volume_loss_pct: 10.0,
            window_seconds: 86_400,
            max_per_window: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub interval_seconds: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3600,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ai_timeout() -> u64 {
    60
}

fn default_store_timeout() -> u64 {
    30
}

fn default_ollama_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llava".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_blob_root() -> PathBuf {
    PathBuf::from("glacier-data")
}

impl Config {
    /// Load and validate a configuration file
    ///
    /// # Errors
    ///
    /// `ConfigError::ReadError` if the file cannot be read, otherwise the
    /// parse or validation error.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Fill empty secrets from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Fill empty secrets using `lookup` for environment values
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fill = |value: &mut String, name: &str| {
            if value.is_empty() {
                if let Some(found) = lookup(name).filter(|v| !v.is_empty()) {
                    *value = found;
                }
            }
        };

        if let AIBackendConfig::OpenAI { api_key, .. } = &mut self.ai.backend {
            fill(api_key, OPENAI_API_KEY_VAR);
        }
        if let StoreConfig::Rest { url, api_key, .. } = &mut self.store {
            fill(url, SUPABASE_URL_VAR);
            fill(api_key, SUPABASE_ANON_KEY_VAR);
        }
        if let BlobConfig::Http { token, .. } = &mut self.blob {
            fill(token, BLOB_TOKEN_VAR);
        }
    }

    /// Check value ranges
    ///
    /// Missing secrets are not an error here; they are reported when the
    /// corresponding backend is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ai.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "ai.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        match &self.ai.backend {
            AIBackendConfig::Ollama { endpoint, model } => {
                require_url("ai.endpoint", endpoint)?;
                require_non_empty("ai.model", model)?;
            }
            AIBackendConfig::OpenAI {
                model, base_url, ..
            } => {
                require_url("ai.base_url", base_url)?;
                require_non_empty("ai.model", model)?;
            }
            AIBackendConfig::Mock => {}
        }

        if let StoreConfig::Rest {
            url,
            timeout_seconds,
            ..
        } = &self.store
        {
            if !url.is_empty() {
                require_url("store.url", url)?;
            }
            if *timeout_seconds == 0 {
                return Err(ConfigError::ValidationError(
                    "store.timeout_seconds must be greater than 0".to_string(),
                ));
            }
        }

        if let BlobConfig::Http { base_url, .. } = &self.blob {
            if !base_url.is_empty() {
                require_url("blob.base_url", base_url)?;
            }
        }

        for (name, value) in [
            ("alerts.rapid_melt_pct", self.alerts.rapid_melt_pct),
            ("alerts.volume_loss_pct", self.alerts.volume_loss_pct),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        if self.alerts.window_seconds == 0 || self.alerts.max_per_window == 0 {
            return Err(ConfigError::ValidationError(
                "alerts.window_seconds and alerts.max_per_window must be greater than 0"
                    .to_string(),
            ));
        }

        if self.alerts.window_seconds > MAX_ALERT_WINDOW_SECONDS {
            return Err(ConfigError::ValidationError(format!(
                "alerts.window_seconds must be at most {}, got {}",
                MAX_ALERT_WINDOW_SECONDS, self.alerts.window_seconds
            )));
        }

        if self.watch.interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "watch.interval_seconds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn require_non_empty(name: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "{} must not be empty",
            name
        )));
    }
    Ok(())
}

fn require_url(name: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{} must be an http(s) URL, got '{}'",
            name, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store, StoreConfig::Memory { demo_data: true });
        assert!(config.ai.fallback);
        assert_eq!(config.health.zero_baseline, BaselinePolicy::Ignore);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn test_mock_backend_section() {
        let config = Config::from_toml_str("[ai]\nbackend = \"mock\"").unwrap();
        assert_eq!(config.ai.backend, AIBackendConfig::Mock);
        assert_eq!(config.ai.timeout_seconds, 60);
    }

    #[test]
    fn test_full_config() {
        let toml = r#"
            [ai]
            backend = "ollama"
            endpoint = "http://gpu-box:11434"
            model = "llava:13b"
            fallback = false
            timeout_seconds = 120

            [store]
            kind = "rest"
            url = "https://abc.supabase.co"
            api_key = "anon"

            [blob]
            kind = "fs"
            root = "/var/lib/glacierwatch"
            public_base = "https://cdn.example.com"

            [health]
            zero_baseline = "reject"

            [alerts]
            rapid_melt_pct = 30.0
            max_per_window = 2

            [watch]
            interval_seconds = 600
        "#;

        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(
            config.ai.backend,
            AIBackendConfig::Ollama {
                endpoint: "http://gpu-box:11434".to_string(),
                model: "llava:13b".to_string(),
            }
        );
        assert!(!config.ai.fallback);
        assert_eq!(config.ai.timeout(), Duration::from_secs(120));
        assert!(matches!(config.store, StoreConfig::Rest { timeout_seconds: 30, .. }));
        assert_eq!(config.health.zero_baseline, BaselinePolicy::Reject);
        assert_eq!(config.alerts.rapid_melt_pct, 30.0);
        assert_eq!(config.alerts.volume_loss_pct, 10.0);
        assert_eq!(config.alerts.max_per_window, 2);
        assert_eq!(config.watch.interval_seconds, 600);
    }

    #[test]
    fn test_alert_window() {
        let config = Config::from_toml_str("[alerts]\nwindow_seconds = 7200").unwrap();
        assert_eq!(config.alerts.window(), chrono::Duration::hours(2));

        let longest = format!("[alerts]\nwindow_seconds = {}", MAX_ALERT_WINDOW_SECONDS);
        let config = Config::from_toml_str(&longest).unwrap();
        assert_eq!(config.alerts.window(), chrono::Duration::days(3650));

        let unchecked = AlertsConfig {
            window_seconds: u64::MAX,
            ..AlertsConfig::default()
        };
        assert_eq!(unchecked.window(), chrono::Duration::days(3650));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for toml in [
            "[ai]\nbackend = \"mock\"\ntimeout_seconds = 0",
            "[ai]\nbackend = \"ollama\"\nendpoint = \"localhost\"",
            "[alerts]\nvolume_loss_pct = -5.0",
            "[alerts]\nmax_per_window = 0",
            "[alerts]\nwindow_seconds = 9300000000000000",
            "[watch]\ninterval_seconds = 0",
        ] {
            assert!(
                matches!(Config::from_toml_str(toml), Err(ConfigError::ValidationError(_))),
                "accepted: {}",
                toml
            );
        }
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        assert!(matches!(
            Config::from_toml_str("[ai\nbackend = "),
            Err(ConfigError::TomlError(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[ai]\nbackend = \"claude\""),
            Err(ConfigError::TomlError(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[health]\nzero_baseline = \"panic\""),
            Err(ConfigError::TomlError(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[store]\nkind = \"memory\"\ndemo_data = false").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.store, StoreConfig::Memory { demo_data: false });

        assert!(matches!(
            Config::from_file(Path::new("/nonexistent/glacierwatch.toml")),
            Err(ConfigError::ReadError(_))
        ));
    }

    #[test]
    fn test_env_fills_only_empty_secrets() {
        let env: HashMap<&str, &str> = [
            (OPENAI_API_KEY_VAR, "sk-env"),
            (SUPABASE_URL_VAR, "https://env.supabase.co"),
            (SUPABASE_ANON_KEY_VAR, "anon-env"),
            (BLOB_TOKEN_VAR, "blob-env"),
        ]
        .into_iter()
        .collect();
        let lookup = |name: &str| env.get(name).map(|v| v.to_string());

        let mut config = Config::from_toml_str(
            r#"
            [store]
            kind = "rest"
            api_key = "anon-file"

            [blob]
            kind = "http"
            base_url = "https://blob.example.com"
            "#,
        )
        .unwrap();
        config.apply_env_from(lookup);

        assert!(matches!(
            &config.ai.backend,
            AIBackendConfig::OpenAI { api_key, .. } if api_key == "sk-env"
        ));
        assert!(matches!(
            &config.store,
            StoreConfig::Rest { url, api_key, .. }
                if url == "https://env.supabase.co" && api_key == "anon-file"
        ));
        assert!(matches!(
            &config.blob,
            BlobConfig::Http { token, .. } if token == "blob-env"
        ));
    }
}
