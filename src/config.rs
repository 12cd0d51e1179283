use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub provider: ProviderConfig,
    pub cache: CacheConfig,
    pub analytics: AnalyticsConfig,
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Read from PERPLEXITY_API_KEY when empty.
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub rate_limit_per_second: usize,
    pub rate_limit_per_minute: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub database_path: String,
    pub ttl_hours: i64,
    pub recent_lookback_days: i64,
    /// Hard outer bound for the periodic sweep, independent of per-entry
    /// expiry.
    pub retention_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub frequency_lookback_days: i64,
    pub daily_threshold: f64,
    pub rolling_window: usize,
    pub zscore_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub max_concurrent_queries: usize,
    pub batch_timeout_secs: u64,
    pub max_news_items: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.perplexity.ai".to_string(),
            model: "sonar".to_string(),
            timeout_secs: 30,
            max_attempts: 3,
            retry_delay_ms: 1000,
            rate_limit_per_second: 2,
            rate_limit_per_minute: 50,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            cache: CacheConfig {
                database_path: "marketpulse.db".to_string(),
                ttl_hours: 24,
                recent_lookback_days: 7,
                retention_days: 30,
            },
            analytics: AnalyticsConfig {
                frequency_lookback_days: 90,
                daily_threshold: 0.5,
                rolling_window: 30,
                zscore_threshold: 2.0,
            },
            batch: BatchConfig {
                max_concurrent_queries: 4,
                batch_timeout_secs: 120,
                max_news_items: 6,
            },
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults when
    /// the file does not exist. Environment overrides are applied last.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            log::info!("Config file {} not found, using defaults", path.display());
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if self.provider.api_key.is_empty() {
            if let Ok(key) = std::env::var("PERPLEXITY_API_KEY") {
                self.provider.api_key = key;
            }
        }
        if let Ok(threshold) = std::env::var("AI_ZSCORE_THRESHOLD") {
            match threshold.parse::<f64>() {
                Ok(v) => self.analytics.zscore_threshold = v,
                Err(_) => log::warn!("Ignoring invalid AI_ZSCORE_THRESHOLD: {}", threshold),
            }
        }
        if let Ok(hours) = std::env::var("AI_CACHE_HOURS") {
            if let Ok(v) = hours.parse::<i64>() {
                self.cache.ttl_hours = v;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.analytics.rolling_window >= 2,
            "analytics.rolling_window must be at least 2"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.analytics.daily_threshold),
            "analytics.daily_threshold must be within [0, 1]"
        );
        anyhow::ensure!(
            self.cache.ttl_hours > 0,
            "cache.ttl_hours must be positive"
        );
        anyhow::ensure!(
            self.batch.max_concurrent_queries > 0,
            "batch.max_concurrent_queries must be positive"
        );
        Ok(())
    }

    /// Persist the current configuration (used to scaffold a starter file).
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)
            .with_context(|| format!("Failed to write config to {}", path.as_ref().display()))?;
        Ok(())
    }
}
