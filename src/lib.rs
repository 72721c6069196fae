//! Drawhouse - timed numbers-draw wagering engine
//!
//! Games open and close on a schedule, accept wagers on chosen numbers or
//! sum categories while open, and settle exactly once against a drawn (or
//! forced) outcome after close. The scheduler drives the lifecycle; every
//! other operation is exposed on [`DrawEngine`].

pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod game_store;
pub mod games;
pub mod ledger;
pub mod metrics;
pub mod retry;
pub mod scheduler;
pub mod services;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigLoader, EngineConfig};
pub use engine::DrawEngine;
pub use errors::{EngineError, EngineResult};
pub use events::{EventBus, GameEvent};
pub use game_store::{GameStore, MemoryGameStore, RocksGameStore};
pub use ledger::{Ledger, MemoryLedger, RocksLedger};
pub use metrics::EngineMetrics;
pub use scheduler::{Scheduler, SchedulerHandle, TickReport};
pub use services::{ServiceBuilder, ServiceContainer};
pub use storage::OptimizedStorage;
