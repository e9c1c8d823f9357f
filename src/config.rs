use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::indicator::rolling_window::{DEFAULT_FAST_PERIOD, DEFAULT_SLOW_PERIOD};
use crate::model::state::DEFAULT_DELIVERY_LOG_RETENTION;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub ingress: IngressConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub fast_period: usize,
    pub slow_period: usize,
    pub symbols: Vec<String>,
    pub lane_capacity: usize,
    pub anomaly_threshold_pct: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fast_period: DEFAULT_FAST_PERIOD,
            slow_period: DEFAULT_SLOW_PERIOD,
            symbols: Vec::new(),
            lane_capacity: 256,
            anomaly_threshold_pct: Decimal::from(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: PathBuf,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub delivery_log_retention: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: PathBuf::from("data/trend_state.sqlite"),
            timeout_ms: 2_000,
            max_attempts: 3,
            delivery_log_retention: DEFAULT_DELIVERY_LOG_RETENTION,
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub broadcast_capacity: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            broadcast_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub enabled: bool,
    pub root: PathBuf,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: PathBuf::from("data/archive"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    /// Path of a JSON-lines tick feed, or `-` for stdin.
    pub source: String,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            source: "-".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl EngineConfig {
    /// Upper-cased, de-duplicated allow-list. Empty means every symbol is tracked.
    pub fn tracked_symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for sym in &self.symbols {
            let s = sym.trim().to_ascii_uppercase();
            if !s.is_empty() && !out.iter().any(|v| v == &s) {
                out.push(s);
            }
        }
        out
    }
}

fn config_path() -> PathBuf {
    std::env::var("TRENDCROSS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let path = config_path();
        let mut config = Self::load_from_path(&path)?;

        if let Ok(url) = std::env::var("TRENDCROSS_WEBHOOK_URL") {
            if !url.trim().is_empty() {
                config.notify.webhook_url = Some(url.trim().to_string());
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config in {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.fast_period == 0 {
            bail!("engine.fast_period must be > 0");
        }
        if engine.fast_period >= engine.slow_period {
            bail!(
                "engine.fast_period ({}) must be less than engine.slow_period ({})",
                engine.fast_period,
                engine.slow_period
            );
        }
        if engine.lane_capacity == 0 {
            bail!("engine.lane_capacity must be > 0");
        }
        if self.store.max_attempts == 0 {
            bail!("store.max_attempts must be >= 1");
        }
        if self.store.timeout_ms == 0 {
            bail!("store.timeout_ms must be > 0");
        }
        if self.dispatch.max_attempts == 0 {
            bail!("dispatch.max_attempts must be >= 1");
        }
        if self.dispatch.timeout_ms == 0 {
            bail!("dispatch.timeout_ms must be > 0");
        }
        if self.dispatch.initial_backoff_ms > self.dispatch.max_backoff_ms {
            bail!("dispatch.initial_backoff_ms must not exceed dispatch.max_backoff_ms");
        }
        if self.notify.broadcast_capacity == 0 {
            bail!("notify.broadcast_capacity must be > 0");
        }
        Ok(())
    }
}
