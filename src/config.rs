//! Configuration management with validation and defaults
//!
//! Loaded from TOML, overridden by `DRAWHOUSE_*` environment variables, then
//! validated. Game defaults are handed to callers explicitly; nothing in the
//! engine reads configuration globally.

use crate::errors::{ConfigurationError, EngineResult};
use crate::games::types::{
    CategoryPayouts, DrawShape, Multiplier, NewGame, PayoutTable, StakeBounds, SumBoundary,
    MAX_DRAW_SIZE,
};
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub draw: DrawConfig,
    pub payouts: PayoutsConfig,
    pub limits: LimitsConfig,
    pub settlement: SettlementConfig,
    pub storage: StorageConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    /// Draw outcomes for overdue games; when false they wait for a forced outcome
    pub auto_draw: bool,
    /// Run one tick immediately on start to catch up after downtime
    pub catch_up_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 60_000,
            auto_draw: true,
            catch_up_on_start: true,
        }
    }
}

/// Randomness backing generated outcomes
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DrawSourceKind {
    Os,
    Seeded,
    Vrf,
}

impl FromStr for DrawSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "os" => Ok(DrawSourceKind::Os),
            "seeded" => Ok(DrawSourceKind::Seeded),
            "vrf" => Ok(DrawSourceKind::Vrf),
            other => Err(format!("unknown draw source '{}'", other)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawConfig {
    pub universe_size: u8,
    pub draw_size: u8,
    pub source: DrawSourceKind,
    pub seed: Option<u64>,
}

impl Default for DrawConfig {
    fn default() -> Self {
        Self {
            universe_size: 80,
            draw_size: 20,
            source: DrawSourceKind::Os,
            seed: None,
        }
    }
}

impl DrawConfig {
    pub fn shape(&self) -> Result<DrawShape, ConfigurationError> {
        DrawShape::new(self.universe_size, self.draw_size).map_err(|e| {
            ConfigurationError::InvalidValue {
                field: "draw".to_string(),
                value: format!("{} of {}", self.draw_size, self.universe_size),
                reason: e.to_string(),
            }
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PayoutsConfig {
    pub sum_threshold: u32,
    pub category_multiplier_bps: u32,
    pub sum_boundary: SumBoundary,
    /// Multiplier in basis points indexed by match count
    pub match_multipliers_bps: Vec<u32>,
}

impl Default for PayoutsConfig {
    fn default() -> Self {
        let mut match_multipliers_bps = vec![
            0, 0, 10_000, 20_000, 50_000, 150_000, 500_000, 1_000_000, 2_500_000, 5_000_000,
            10_000_000,
        ];
        match_multipliers_bps.resize(MAX_DRAW_SIZE + 1, 10_000_000);
        Self {
            sum_threshold: 810,
            category_multiplier_bps: 19_500,
            sum_boundary: SumBoundary::Exclusive,
            match_multipliers_bps,
        }
    }
}

impl PayoutsConfig {
    pub fn table(&self) -> Result<PayoutTable, ConfigurationError> {
        let entries: Vec<(usize, Multiplier)> = self
            .match_multipliers_bps
            .iter()
            .enumerate()
            .map(|(count, &bps)| (count, Multiplier::from_bps(bps)))
            .collect();
        let table = PayoutTable::from_matches(&entries).map_err(|e| {
            ConfigurationError::InvalidValue {
                field: "payouts.match_multipliers_bps".to_string(),
                value: format!("{} entries", entries.len()),
                reason: e.to_string(),
            }
        })?;
        Ok(table
            .with_categories(CategoryPayouts::uniform(Multiplier::from_bps(
                self.category_multiplier_bps,
            )))
            .with_sum_threshold(self.sum_threshold, self.sum_boundary))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub min_stake: u64,
    pub max_stake: u64,
    pub max_picks: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            min_stake: 100,
            max_stake: 1_000_000,
            max_picks: MAX_DRAW_SIZE,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub max_write_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: 5,
            retry_backoff_ms: 50,
        }
    }
}

impl SettlementConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_write_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Rocksdb,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_directory: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Rocksdb,
            data_directory: PathBuf::from("./drawhouse_data"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    /// Broadcast channel capacity for game events
    pub event_buffer: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            event_buffer: 1024,
        }
    }
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.tick_interval_ms)
    }

    /// Game parameters prefilled from configured defaults
    pub fn default_new_game(
        &self,
        label: impl Into<String>,
        open_time: DateTime<Utc>,
        close_time: DateTime<Utc>,
    ) -> EngineResult<NewGame> {
        let stake_bounds = StakeBounds::new(self.limits.min_stake, self.limits.max_stake)?;
        Ok(NewGame {
            kind: "keno".to_string(),
            label: label.into(),
            open_time,
            close_time,
            stake_bounds,
            payout_table: self.payouts.table()?,
            draw: self.draw.shape()?,
        })
    }
}

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> EngineResult<EngineConfig> {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => EngineConfig::default(),
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &Path) -> EngineResult<EngineConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into()
        })
    }

    fn apply_env_overrides(&self, config: &mut EngineConfig) -> EngineResult<()> {
        if let Some(v) = env_parse("DRAWHOUSE_TICK_INTERVAL_MS")? {
            config.scheduler.tick_interval_ms = v;
        }
        if let Some(v) = env_parse("DRAWHOUSE_AUTO_DRAW")? {
            config.scheduler.auto_draw = v;
        }
        if let Some(v) = env_parse("DRAWHOUSE_DRAW_SOURCE")? {
            config.draw.source = v;
        }
        if let Some(v) = env_parse("DRAWHOUSE_DRAW_SEED")? {
            config.draw.seed = Some(v);
        }
        if let Some(v) = env_parse("DRAWHOUSE_MIN_STAKE")? {
            config.limits.min_stake = v;
        }
        if let Some(v) = env_parse("DRAWHOUSE_MAX_STAKE")? {
            config.limits.max_stake = v;
        }
        if let Ok(dir) = env::var("DRAWHOUSE_DATA_DIR") {
            config.storage.data_directory = PathBuf::from(dir);
        }
        if let Ok(level) = env::var("DRAWHOUSE_LOG_LEVEL") {
            config.monitoring.log_level = level;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self, config: &EngineConfig) -> EngineResult<()> {
        if config.scheduler.tick_interval_ms == 0 {
            return Err(invalid("scheduler.tick_interval_ms", "0", "Tick interval cannot be zero"));
        }

        let shape = config.draw.shape()?;
        if config.draw.source == DrawSourceKind::Seeded && config.draw.seed.is_none() {
            return Err(invalid("draw.seed", "none", "Seeded draws need a seed"));
        }

        if config.payouts.match_multipliers_bps.len() > MAX_DRAW_SIZE + 1 {
            return Err(invalid(
                "payouts.match_multipliers_bps",
                &config.payouts.match_multipliers_bps.len().to_string(),
                "At most one entry per match count 0..=20",
            ));
        }
        config
            .payouts
            .table()?
            .validate(shape)
            .map_err(|e| invalid("payouts.sum_threshold", &config.payouts.sum_threshold.to_string(), &e.to_string()))?;

        if config.limits.min_stake == 0 || config.limits.min_stake > config.limits.max_stake {
            return Err(invalid(
                "limits",
                &format!("{}..={}", config.limits.min_stake, config.limits.max_stake),
                "Stake bounds need 0 < min <= max",
            ));
        }
        if config.limits.max_picks == 0 {
            return Err(invalid("limits.max_picks", "0", "At least one pick is required"));
        }

        if config.settlement.max_write_attempts == 0 {
            return Err(invalid(
                "settlement.max_write_attempts",
                "0",
                "At least one write attempt is required",
            ));
        }

        if config.storage.backend == StorageBackend::Rocksdb
            && config.storage.data_directory.as_os_str().is_empty()
        {
            return Err(invalid("storage.data_directory", "", "Data directory is required"));
        }

        if config.monitoring.event_buffer == 0 {
            return Err(invalid("monitoring.event_buffer", "0", "Event buffer cannot be zero"));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, config: &EngineConfig, path: P) -> EngineResult<()> {
        let path = path.as_ref();
        let toml_string = toml::to_string_pretty(config).map_err(|e| {
            ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, toml_string).map_err(|e| {
            ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path.display(), e))
                .into()
        })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> crate::errors::EngineError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn env_parse<T>(name: &str) -> EngineResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(name, &raw, &e.to_string())),
        Err(_) => Ok(None),
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config<P: AsRef<Path>>(path: P) -> EngineResult<()> {
    ConfigLoader::new().save(&EngineConfig::default(), path)
}
