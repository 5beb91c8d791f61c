//! CLI configuration
//!
//! Read from `config.toml` under the platform config directory, or from the
//! file named by `CAIRN_CONFIG`. Flags and their environment variables win
//! over the file.

use std::path::PathBuf;

use anyhow::Context;
use cairn_migrate::FailurePolicy;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Storage backend behind the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Redb,
    Sqlite,
    /// Nothing survives the process
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Redb => "redb",
            BackendKind::Sqlite => "sqlite",
            BackendKind::Memory => "memory",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
            .map_err(|_| anyhow::anyhow!("unknown backend '{}' (expected redb, sqlite or memory)", s))
    }
}

/// Get default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cairn")
}

/// Path of the config file, honoring `CAIRN_CONFIG`
pub fn config_file_path() -> PathBuf {
    if let Some(path) = std::env::var_os("CAIRN_CONFIG") {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cairn")
        .join("config.toml")
}

/// Where an effective config value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Default,
    File,
    Env(&'static str),
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::Default => write!(f, "default"),
            ValueSource::File => write!(f, "file"),
            ValueSource::Env(var) => write!(f, "env ({})", var),
        }
    }
}

/// Configuration for the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    pub backend: BackendKind,
    pub failure_policy: FailurePolicy,
    /// Sliding expiration of the display cache
    pub cache_minutes: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            backend: BackendKind::default(),
            failure_policy: FailurePolicy::default(),
            cache_minutes: cairn_storage::cache::DEFAULT_SLIDING_MINUTES,
        }
    }
}

impl Config {
    /// Load the config file; a missing file yields the defaults
    pub fn load() -> anyhow::Result<Self> {
        let path = config_file_path();
        if !path.exists() {
            tracing::debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = config_file_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, toml::to_string_pretty(self)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn keys() -> &'static [&'static str] {
        &["data_dir", "backend", "failure_policy", "cache_minutes"]
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "data_dir" => Some(self.data_dir().display().to_string()),
            "backend" => Some(self.backend.as_str().to_string()),
            "failure_policy" => Some(self.failure_policy.to_string()),
            "cache_minutes" => Some(self.cache_minutes.to_string()),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "data_dir" => self.data_dir = Some(PathBuf::from(value)),
            "backend" => self.backend = value.parse()?,
            "failure_policy" => self.failure_policy = value.parse().map_err(anyhow::Error::msg)?,
            "cache_minutes" => {
                let minutes: i64 = value
                    .parse()
                    .with_context(|| format!("cache_minutes must be a whole number, got '{}'", value))?;
                anyhow::ensure!(minutes > 0, "cache_minutes must be positive");
                self.cache_minutes = minutes;
            }
            other => anyhow::bail!("Unknown config key: {} (available: {})", other, Self::keys().join(", ")),
        }
        Ok(())
    }

    /// Environment variable that overrides `key`, shared with the global flag
    pub fn env_var(key: &str) -> Option<&'static str> {
        match key {
            "data_dir" => Some("CAIRN_DATA_DIR"),
            "backend" => Some("CAIRN_BACKEND"),
            _ => None,
        }
    }

    /// Keys present in the config file
    pub fn file_keys() -> anyhow::Result<Vec<String>> {
        let path = config_file_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let table: toml::Table = toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(table.keys().cloned().collect())
    }

    /// Effective value of `key` and its source; env wins over the file
    pub fn resolve(&self, key: &str, file_keys: &[String]) -> Option<(String, ValueSource)> {
        let value = self.get(key)?;
        if let Some(var) = Self::env_var(key) {
            if let Some(env) = std::env::var(var).ok().filter(|v| !v.is_empty()) {
                return Some((env, ValueSource::Env(var)));
            }
        }
        let source = if file_keys.iter().any(|k| k == key) {
            ValueSource::File
        } else {
            ValueSource::Default
        };
        Some((value, source))
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();
        config.set("backend", "SQLite").unwrap();
        config.set("failure_policy", "continue").unwrap();
        config.set("cache_minutes", "5").unwrap();
        assert_eq!(config.get("backend").as_deref(), Some("sqlite"));
        assert_eq!(config.get("failure_policy").as_deref(), Some("continue"));
        assert_eq!(config.cache_minutes, 5);
    }

    #[test]
    fn test_resolve_reports_file_and_default() {
        let config = Config::default();
        let file_keys = vec!["cache_minutes".to_string()];
        assert_eq!(
            config.resolve("cache_minutes", &file_keys),
            Some(("30".to_string(), ValueSource::File))
        );
        assert_eq!(
            config.resolve("failure_policy", &file_keys),
            Some(("fail-fast".to_string(), ValueSource::Default))
        );
        assert_eq!(config.resolve("colour", &file_keys), None);
        assert_eq!(ValueSource::Env("CAIRN_BACKEND").to_string(), "env (CAIRN_BACKEND)");
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = Config::default();
        assert!(config.set("backend", "postgres").is_err());
        assert!(config.set("cache_minutes", "0").is_err());
        assert!(config.set("colour", "red").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_toml_round_trip_fills_missing_keys() {
        let config: Config = toml::from_str("backend = \"memory\"\n").unwrap();
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.cache_minutes, 30);

        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(toml::from_str::<Config>(&text).unwrap(), config);
    }
}
