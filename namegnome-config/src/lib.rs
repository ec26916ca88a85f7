//! Configuration loading for NameGnome Serve.
//!
//! Settings come from three layers, later layers winning: built-in defaults,
//! an optional TOML file (`NAMEGNOME_CONFIG`), and environment variables.
//! API keys are only ever read from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid duration in {field}: {value}")]
    InvalidDuration { field: String, value: String },

    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),
}

/// Token bucket parameters gating outbound provider calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub refill_per_sec: f64,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        TokenBucketConfig {
            capacity: 10,
            refill_per_sec: 4.0,
        }
    }
}

/// Exponential backoff parameters for transient provider failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 4,
            base_ms: 250,
        }
    }
}

impl RetryConfig {
    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Read from the environment, never from the TOML file.
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Override of the provider base URL, mainly for tests.
    pub base_url: Option<String>,
    pub rate: TokenBucketConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub tvdb: ProviderSettings,
    pub tmdb: ProviderSettings,
    pub musicbrainz: ProviderSettings,
    pub omdb: ProviderSettings,
    pub tvmaze: ProviderSettings,
    pub fanarttv: ProviderSettings,
    pub anidb: ProviderSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            enabled: true,
            base_url: "http://127.0.0.1:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            timeout_secs: 30,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub provider_call_secs: u64,
    pub search_budget_secs: u64,
    pub lock_acquire_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        TimeoutsConfig {
            provider_call_secs: 10,
            search_budget_secs: 30,
            lock_acquire_secs: 5,
        }
    }
}

impl TimeoutsConfig {
    pub fn provider_call(&self) -> Duration {
        Duration::from_secs(self.provider_call_secs)
    }

    pub fn search_budget(&self) -> Duration {
        Duration::from_secs(self.search_budget_secs)
    }

    pub fn lock_acquire(&self) -> Duration {
        Duration::from_secs(self.lock_acquire_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache_path: PathBuf,
    pub debug: bool,
    pub providers: ProvidersConfig,
    pub llm: LlmConfig,
    pub timeouts: TimeoutsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_path: PathBuf::from("namegnome.db"),
            debug: false,
            providers: ProvidersConfig::default(),
            llm: LlmConfig::default(),
            timeouts: TimeoutsConfig::default(),
        }
    }
}

impl Config {
    /// Load defaults, then the optional TOML file, then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        // Pick up a .env file when present; ignore absence.
        let _ = dotenvy::dotenv();

        let mut config = match std::env::var_os("NAMEGNOME_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Config::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = std::env::var("NAMEGNOME_CACHE_PATH") {
            self.cache_path = PathBuf::from(path);
        }
        if let Ok(value) = std::env::var("NAMEGNOME_DEBUG") {
            self.debug = matches!(value.as_str(), "1" | "true" | "yes");
        }
        if let Ok(value) = std::env::var("NAMEGNOME_PROVIDER_TIMEOUT") {
            self.timeouts.provider_call_secs = parse_duration_env("NAMEGNOME_PROVIDER_TIMEOUT", &value)?;
        }
        if let Ok(value) = std::env::var("NAMEGNOME_LLM_TIMEOUT") {
            self.llm.timeout_secs = parse_duration_env("NAMEGNOME_LLM_TIMEOUT", &value)?;
        }
        if let Ok(url) = std::env::var("NAMEGNOME_LLM_URL") {
            self.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("NAMEGNOME_LLM_MODEL") {
            self.llm.model = model;
        }

        self.providers.tvdb.api_key = std::env::var("TVDB_API_KEY").ok();
        self.providers.tmdb.api_key = std::env::var("TMDB_API_KEY").ok();
        self.providers.omdb.api_key = std::env::var("OMDB_API_KEY").ok();
        self.providers.fanarttv.api_key = std::env::var("FANARTTV_API_KEY").ok();
        self.providers.anidb.api_key = std::env::var("ANIDB_API_KEY").ok();
        Ok(())
    }

    /// Fail fast on missing required keys. Offline runs never need them.
    pub fn validate_online(&self) -> Result<(), ConfigError> {
        if self.providers.tvdb.api_key.is_none() {
            return Err(ConfigError::MissingEnv("TVDB_API_KEY"));
        }
        if self.providers.tmdb.api_key.is_none() {
            return Err(ConfigError::MissingEnv("TMDB_API_KEY"));
        }
        Ok(())
    }
}

fn parse_duration_env(field: &str, value: &str) -> Result<u64, ConfigError> {
    // Accept bare seconds or humantime strings like "10s" / "2m".
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(secs);
    }
    humantime::parse_duration(value)
        .map(|d| d.as_secs())
        .map_err(|_| ConfigError::InvalidDuration {
            field: field.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.timeouts.provider_call(), Duration::from_secs(10));
        assert_eq!(config.llm.timeout(), Duration::from_secs(30));
        assert_eq!(config.providers.tvdb.retry.max_attempts, 4);
        assert!(!config.debug);
    }

    #[test]
    fn parses_toml_overrides() {
        let raw = r#"
            cache_path = "/tmp/ng.db"

            [providers.tvdb.retry]
            max_attempts = 2
            base_ms = 50

            [llm]
            enabled = false
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.cache_path, PathBuf::from("/tmp/ng.db"));
        assert_eq!(config.providers.tvdb.retry.max_attempts, 2);
        assert!(!config.llm.enabled);
        // Untouched sections keep defaults.
        assert_eq!(config.providers.tmdb.rate.capacity, 10);
    }

    #[test]
    fn duration_env_accepts_humantime() {
        assert_eq!(parse_duration_env("X", "15").unwrap(), 15);
        assert_eq!(parse_duration_env("X", "2m").unwrap(), 120);
        assert!(parse_duration_env("X", "nope").is_err());
    }
}
