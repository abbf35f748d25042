//! Application configuration, loaded from TOML.
//!
//! ```toml
//! [cache]
//! backend = "parquet"        # or "memory"
//! dir = "data/cache"
//! trading_day_ratio = 0.7
//! min_fill_ratio = 0.8
//! min_rows = 10
//!
//! [store]
//! path = "factorlab.db"      # or ":memory:"
//!
//! [[providers]]
//! type = "csv"
//! name = "local"
//! priority = 1
//! dir = "data/csv"
//!
//! [[providers]]
//! type = "synthetic"
//! name = "synthetic"
//! priority = 10
//! seed = 42
//!
//! [backtest]
//! initial_capital = 1000000.0
//! commission = 0.0003
//! commission_type = "percent"
//! commission_min = 5.0
//! leverage = 1.0
//! ```
//!
//! Every section is optional; a missing file yields the defaults.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use factorlab_core::data::{
    CachePolicy, CsvProvider, MemoryStore, ParquetStore, ProviderRegistry, SeriesStore,
    SyntheticProvider, DEFAULT_MAX_ERRORS,
};
use factorlab_core::engine::BrokerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.into(),
    }
}

// ─── Sections ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Parquet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub dir: PathBuf,
    #[serde(flatten)]
    pub policy: CachePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            dir: PathBuf::from("data/cache"),
            policy: CachePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file, or `:memory:`.
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "factorlab.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderSource {
    Csv { dir: PathBuf },
    Synthetic {
        #[serde(default)]
        seed: u64,
    },
}

fn default_max_errors() -> u32 {
    DEFAULT_MAX_ERRORS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
    #[serde(flatten)]
    pub source: ProviderSource,
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![ProviderConfig {
        name: "synthetic".to_string(),
        priority: 100,
        max_errors: DEFAULT_MAX_ERRORS,
        source: ProviderSource::Synthetic { seed: 42 },
    }]
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub backtest: BrokerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            store: StoreConfig::default(),
            providers: default_providers(),
            backtest: BrokerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path`; `None` or a missing file gives the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.cache.policy;
        for (field, v) in [
            ("cache.trading_day_ratio", p.trading_day_ratio),
            ("cache.min_fill_ratio", p.min_fill_ratio),
        ] {
            if !(v > 0.0 && v <= 1.0) {
                return Err(invalid(field, format!("must be in (0, 1], got {v}")));
            }
        }
        if self.store.path.trim().is_empty() {
            return Err(invalid("store.path", "must not be empty"));
        }
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.name.as_str()) {
                return Err(invalid("providers", format!("duplicate provider name '{}'", provider.name)));
            }
        }
        self.backtest
            .validate()
            .map_err(|e| invalid("backtest", e.to_string()))
    }

    /// Build the provider registry declared in `[[providers]]`.
    pub fn provider_registry(&self) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for p in &self.providers {
            let provider: Arc<dyn factorlab_core::data::MarketDataProvider> = match &p.source {
                ProviderSource::Csv { dir } => Arc::new(CsvProvider::new(p.name.clone(), dir.clone())),
                ProviderSource::Synthetic { seed } => Arc::new(SyntheticProvider::new(p.name.clone(), *seed)),
            };
            registry.register(provider, p.priority, p.max_errors);
        }
        registry
    }

    /// Build the series store behind the data cache.
    pub fn series_store(&self) -> Arc<dyn SeriesStore> {
        match self.cache.backend {
            CacheBackend::Memory => Arc::new(MemoryStore::new()),
            CacheBackend::Parquet => Arc::new(ParquetStore::new(self.cache.dir.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factorlab_core::engine::CommissionType;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.cache.policy.min_rows, 10);
        assert_eq!(config.backtest.commission, 0.0003);
    }

    #[test]
    fn full_file_round_trips_sections() {
        let config = AppConfig::from_toml(
            r#"
            [cache]
            backend = "parquet"
            dir = "/tmp/fl-cache"
            min_rows = 12

            [store]
            path = ":memory:"

            [[providers]]
            type = "csv"
            name = "local"
            priority = 1
            dir = "/tmp/csv"

            [[providers]]
            type = "synthetic"
            name = "synth"
            priority = 5
            max_errors = 2
            seed = 7

            [backtest]
            initial_capital = 50000.0
            commission_type = "fixed"
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.backend, CacheBackend::Parquet);
        assert_eq!(config.cache.policy.min_rows, 12);
        assert_eq!(config.cache.policy.trading_day_ratio, 0.7);
        assert_eq!(config.store.path, ":memory:");
        assert_eq!(config.providers[0].max_errors, DEFAULT_MAX_ERRORS);
        assert_eq!(config.providers[1].source, ProviderSource::Synthetic { seed: 7 });
        assert_eq!(config.backtest.initial_capital, 50_000.0);
        assert_eq!(config.backtest.commission_type, CommissionType::Fixed);

        let registry = config.provider_registry();
        let names: Vec<String> = registry.status().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["local", "synth"]);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            AppConfig::from_toml("[cache]\nmin_fill_ratio = 1.5"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            AppConfig::from_toml("[backtest]\ninitial_capital = -5.0"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            AppConfig::from_toml("[[providers]]\ntype = \"ftp\"\nname = \"x\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
