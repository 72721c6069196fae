//! Lifecycle scheduler
//!
//! One background task ticking on a fixed interval. Each tick reads the open
//! games in close-time order, activates the ones whose window has opened and
//! settles every overdue one, however many ticks were missed. A failure on one
//! game is logged and the tick moves on.

use crate::engine::DrawEngine;
use crate::errors::{EngineError, StateConflictError};
use crate::games::lifecycle::{phase_at, Phase};
use crate::games::types::{GameId, GameState};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// What one tick did
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// True when another tick was still running and this one did nothing
    pub skipped: bool,
    pub activated: Vec<GameId>,
    pub settled: Vec<GameId>,
    /// Overdue games left for a forced outcome (manual draw mode)
    pub awaiting_outcome: Vec<GameId>,
    pub failures: Vec<(GameId, String)>,
}

pub struct Scheduler {
    engine: Arc<DrawEngine>,
    interval: Duration,
    tick_lock: Mutex<()>,
    running: AtomicBool,
    shutdown: Notify,
}

impl Scheduler {
    pub fn new(engine: Arc<DrawEngine>) -> Self {
        let interval = engine.services().config().tick_interval();
        Self::with_interval(engine, interval)
    }

    pub fn with_interval(engine: Arc<DrawEngine>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            tick_lock: Mutex::new(()),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Run one pass over every open game
    pub async fn tick(&self) -> TickReport {
        let Ok(_tick_guard) = self.tick_lock.try_lock() else {
            tracing::debug!("Previous tick still running, skipping");
            return TickReport {
                skipped: true,
                ..TickReport::default()
            };
        };

        let mut report = TickReport::default();
        let metrics = self.engine.metrics();

        let games = match self.engine.list_open_games().await {
            Ok(games) => games,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list open games");
                metrics.record_tick(1);
                return report;
            }
        };

        let now = self.engine.services().clock().now();
        for game in games {
            match phase_at(&game, now) {
                Phase::BeforeOpen => {}
                Phase::Open => {
                    if game.state == GameState::Pending {
                        match self.engine.activate_game(game.id).await {
                            Ok(true) => report.activated.push(game.id),
                            Ok(false) => {}
                            Err(e) => {
                                tracing::warn!(game_id = %game.id, error = %e, "Activation failed");
                                report.failures.push((game.id, e.to_string()));
                            }
                        }
                    }
                }
                Phase::Closed => self.settle_due(game.id, &mut report).await,
            }
        }

        metrics.record_tick(report.failures.len());
        if !report.activated.is_empty() || !report.settled.is_empty() || !report.failures.is_empty() {
            tracing::info!(
                activated = report.activated.len(),
                settled = report.settled.len(),
                awaiting_outcome = report.awaiting_outcome.len(),
                failures = report.failures.len(),
                "Scheduler tick"
            );
        }
        report
    }

    async fn settle_due(&self, game_id: GameId, report: &mut TickReport) {
        match self.engine.trigger_settlement(game_id).await {
            Ok(_) => report.settled.push(game_id),
            Err(EngineError::StateConflict(StateConflictError::OutcomeMissing(_))) => {
                tracing::debug!(game_id = %game_id, "Overdue game waiting for a forced outcome");
                report.awaiting_outcome.push(game_id);
            }
            // Cancelled between listing and locking
            Err(EngineError::StateConflict(StateConflictError::GameCancelled(_))) => {}
            Err(e) => {
                tracing::error!(game_id = %game_id, error = %e, kind = e.kind(), "Settlement failed during tick");
                report.failures.push((game_id, e.to_string()));
            }
        }
    }

    /// Start the background loop
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        self.running.store(true, Ordering::SeqCst);
        let scheduler = self.clone();

        let task = tokio::spawn(async move {
            let catch_up = scheduler.engine.services().config().scheduler.catch_up_on_start;
            let mut ticker = tokio::time::interval(scheduler.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            if !catch_up {
                // The first interval tick fires immediately
                ticker.tick().await;
            }

            tracing::info!(interval_ms = scheduler.interval.as_millis() as u64, "Scheduler started");
            while scheduler.running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = ticker.tick() => {
                        scheduler.tick().await;
                    }
                    _ = scheduler.shutdown.notified() => break,
                }
            }
            tracing::info!("Scheduler stopped");
        });

        SchedulerHandle {
            scheduler: self,
            task,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }
}

/// Running scheduler task
pub struct SchedulerHandle {
    scheduler: Arc<Scheduler>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop after the current tick and wait for the task to exit
    pub async fn shutdown(self) {
        self.scheduler.stop();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Scheduler task ended abnormally");
        }
    }
}
