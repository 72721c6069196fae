//! Service layer providing dependency injection
//!
//! Every engine component receives an `Arc<ServiceContainer>` and reaches its
//! collaborators (store, ledger, clock, randomness) only through it, so tests
//! swap any of them via `ServiceBuilder`.

use crate::{
    clock::{Clock, SystemClock},
    config::{ConfigLoader, DrawSourceKind, EngineConfig, StorageBackend},
    errors::{EngineResult, StorageError},
    events::EventBus,
    game_store::{GameStore, MemoryGameStore, RocksGameStore},
    games::{
        draw::{EntropyOutcomeSource, OutcomeSource, SeededOutcomeSource},
        locks::GameLocks,
        vrf_engine::VrfOutcomeSource,
    },
    ledger::{Ledger, MemoryLedger, RocksLedger},
    metrics::EngineMetrics,
    retry::RetryPolicy,
    storage::OptimizedStorage,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Service container for dependency injection
pub struct ServiceContainer {
    config: EngineConfig,
    store: Arc<dyn GameStore>,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    outcome_source: Arc<dyn OutcomeSource>,
    locks: GameLocks,
    events: EventBus,
    metrics: Arc<EngineMetrics>,
}

impl ServiceContainer {
    /// Create a container with every collaborator built from configuration
    pub async fn new(config: EngineConfig) -> EngineResult<Self> {
        ServiceBuilder::new().with_config(config).build().await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn GameStore {
        self.store.as_ref()
    }

    pub fn ledger(&self) -> &dyn Ledger {
        self.ledger.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn outcome_source(&self) -> &dyn OutcomeSource {
        self.outcome_source.as_ref()
    }

    pub fn locks(&self) -> &GameLocks {
        &self.locks
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.config.settlement.retry_policy()
    }

    fn open_storage(config: &EngineConfig) -> EngineResult<OptimizedStorage> {
        let dir = &config.storage.data_directory;
        tracing::info!(path = %dir.display(), "Opening RocksDB storage");
        OptimizedStorage::new(dir).map_err(|e| {
            StorageError::DatabaseOpenFailed(format!("{}: {}", dir.display(), e)).into()
        })
    }

    fn create_outcome_source(config: &EngineConfig) -> Arc<dyn OutcomeSource> {
        match config.draw.source {
            DrawSourceKind::Os => Arc::new(EntropyOutcomeSource),
            DrawSourceKind::Seeded => {
                Arc::new(SeededOutcomeSource::new(config.draw.seed.unwrap_or_default()))
            }
            DrawSourceKind::Vrf => {
                let source = VrfOutcomeSource::new_random();
                tracing::info!(public_key = %source.public_key_hex(), "VRF draw key generated");
                Arc::new(source)
            }
        }
    }
}

/// Service builder for creating configured service containers
#[derive(Default)]
pub struct ServiceBuilder {
    config: Option<EngineConfig>,
    config_path: Option<PathBuf>,
    store_override: Option<Arc<dyn GameStore>>,
    ledger_override: Option<Arc<dyn Ledger>>,
    clock_override: Option<Arc<dyn Clock>>,
    outcome_source_override: Option<Arc<dyn OutcomeSource>>,
}

impl ServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder over default configuration with the memory backend
    pub fn in_memory() -> Self {
        let mut config = EngineConfig::default();
        config.storage.backend = StorageBackend::Memory;
        Self::new().with_config(config)
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Load configuration from a TOML file at build time
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Override the game store (useful for testing)
    pub fn with_store(mut self, store: Arc<dyn GameStore>) -> Self {
        self.store_override = Some(store);
        self
    }

    /// Override the ledger (useful for testing)
    pub fn with_ledger(mut self, ledger: Arc<dyn Ledger>) -> Self {
        self.ledger_override = Some(ledger);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock_override = Some(clock);
        self
    }

    pub fn with_outcome_source(mut self, source: Arc<dyn OutcomeSource>) -> Self {
        self.outcome_source_override = Some(source);
        self
    }

    /// Build the service container; storage is only opened when a collaborator needs it
    pub async fn build(self) -> EngineResult<ServiceContainer> {
        let config = match (self.config, self.config_path) {
            (Some(config), _) => {
                ConfigLoader::new().validate(&config)?;
                config
            }
            (None, Some(path)) => ConfigLoader::new().with_path(path).load()?,
            (None, None) => ConfigLoader::new().load()?,
        };

        let needs_rocks = config.storage.backend == StorageBackend::Rocksdb
            && (self.store_override.is_none() || self.ledger_override.is_none());
        let storage = if needs_rocks {
            Some(ServiceContainer::open_storage(&config)?)
        } else {
            None
        };

        let store: Arc<dyn GameStore> = match (self.store_override, &storage) {
            (Some(store), _) => store,
            (None, Some(storage)) => Arc::new(RocksGameStore::new(storage.clone())),
            (None, None) => Arc::new(MemoryGameStore::new()),
        };
        let ledger: Arc<dyn Ledger> = match (self.ledger_override, &storage) {
            (Some(ledger), _) => ledger,
            (None, Some(storage)) => Arc::new(RocksLedger::new(storage.clone())),
            (None, None) => Arc::new(MemoryLedger::new()),
        };
        let clock = self
            .clock_override
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let outcome_source = self
            .outcome_source_override
            .unwrap_or_else(|| ServiceContainer::create_outcome_source(&config));

        Ok(ServiceContainer {
            events: EventBus::new(config.monitoring.event_buffer),
            config,
            store,
            ledger,
            clock,
            outcome_source,
            locks: GameLocks::new(),
            metrics: Arc::new(EngineMetrics::new()),
        })
    }
}
