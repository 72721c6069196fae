//! Game state machine
//!
//! Stored state only records what has been committed. The phase a game is in
//! right now is always derived from the clock, so a stale `Active` or
//! `Pending` record never admits or refuses a wager on its own.

use crate::errors::{EngineError, EngineResult, StateConflictError, ValidationError};
use crate::events::GameEvent;
use crate::games::types::{Game, GameAggregates, GameId, GameState, NewGame, SettlementState, StakeBounds};
use crate::ledger::refund_key;
use crate::metrics::EngineMetrics;
use crate::retry::with_retry;
use crate::services::ServiceContainer;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Where `now` falls relative to a game's window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    BeforeOpen,
    Open,
    Closed,
}

pub fn phase_at(game: &Game, now: DateTime<Utc>) -> Phase {
    if now < game.open_time {
        Phase::BeforeOpen
    } else if now < game.close_time {
        Phase::Open
    } else {
        Phase::Closed
    }
}

/// State implied by the clock; terminal stored states always win
pub fn effective_state(game: &Game, now: DateTime<Utc>) -> GameState {
    if game.state.is_terminal() {
        return game.state;
    }
    match phase_at(game, now) {
        Phase::BeforeOpen => GameState::Pending,
        Phase::Open => GameState::Active,
        Phase::Closed => GameState::Completed,
    }
}

/// Require the clock-derived state to be Active
pub fn ensure_accepting(game: &Game, now: DateTime<Utc>) -> Result<(), StateConflictError> {
    match effective_state(game, now) {
        GameState::Active => Ok(()),
        state => Err(StateConflictError::GameNotActive {
            game_id: game.id,
            state,
        }),
    }
}

pub struct GameLifecycle {
    services: Arc<ServiceContainer>,
}

impl GameLifecycle {
    pub fn new(services: Arc<ServiceContainer>) -> Self {
        Self { services }
    }

    /// Validate and persist a new game
    pub async fn create_game(&self, new_game: NewGame) -> EngineResult<Game> {
        if new_game.close_time <= new_game.open_time {
            return Err(ValidationError::InvalidSchedule(format!(
                "close time {} must be after open time {}",
                new_game.close_time, new_game.open_time
            ))
            .into());
        }
        let stake_bounds = StakeBounds::new(new_game.stake_bounds.min, new_game.stake_bounds.max)?;
        new_game.draw.validate()?;
        new_game.payout_table.validate(new_game.draw)?;

        let now = self.services.clock().now();
        let state = if now < new_game.open_time {
            GameState::Pending
        } else {
            GameState::Active
        };

        let game = Game {
            id: GameId::new(),
            kind: new_game.kind,
            label: new_game.label,
            draw: new_game.draw,
            open_time: new_game.open_time,
            close_time: new_game.close_time,
            state,
            outcome: None,
            outcome_origin: None,
            draw_proof: None,
            stake_bounds,
            payout_table: new_game.payout_table,
            aggregates: GameAggregates::default(),
            created_at: now,
            settled_at: None,
        };

        let store = self.services.store();
        with_retry(self.services.retry_policy(), "insert_game", || store.insert_game(&game)).await?;

        tracing::info!(
            game_id = %game.id,
            label = %game.label,
            open_time = %game.open_time,
            close_time = %game.close_time,
            "Game created"
        );
        EngineMetrics::incr(&self.services.metrics().games_created);
        self.services.events().publish(GameEvent::GameCreated {
            game_id: game.id,
            label: game.label.clone(),
            state: game.state,
        });

        Ok(game)
    }

    /// Flip a Pending game to Active once its open time has passed.
    ///
    /// Returns false when nothing changed.
    pub async fn activate(&self, game_id: GameId) -> EngineResult<bool> {
        let _guard = self.services.locks().acquire(game_id).await;
        let store = self.services.store();

        let mut game = store
            .load_game(&game_id)
            .await?
            .ok_or(EngineError::GameNotFound(game_id))?;
        let now = self.services.clock().now();
        if game.state != GameState::Pending || phase_at(&game, now) != Phase::Open {
            return Ok(false);
        }

        game.state = GameState::Active;
        with_retry(self.services.retry_policy(), "activate_game", || store.update_game(&game)).await?;

        tracing::info!(game_id = %game_id, "Game activated");
        self.services
            .events()
            .publish(GameEvent::GameActivated { game_id });
        Ok(true)
    }

    /// Cancel a game that has no settled wagers, refunding every pending stake
    ///
    /// The game is marked Cancelled and its wagers Voided before any refund
    /// is credited. Calling this again on a Cancelled game resumes the work:
    /// leftover Pending wagers are voided and every refund is replayed under
    /// its idempotency key.
    pub async fn cancel_game(&self, game_id: GameId) -> EngineResult<Game> {
        let guard = self.services.locks().acquire(game_id).await;
        let store = self.services.store();
        let ledger = self.services.ledger();
        let policy = self.services.retry_policy();

        let mut game = store
            .load_game(&game_id)
            .await?
            .ok_or(EngineError::GameNotFound(game_id))?;

        if game.state == GameState::Completed {
            return Err(StateConflictError::GameAlreadySettled(game_id).into());
        }

        let wagers = store.wagers_for_game(&game_id).await?;
        if wagers
            .iter()
            .any(|w| matches!(w.state, SettlementState::Won | SettlementState::Lost))
        {
            return Err(StateConflictError::GameAlreadySettled(game_id).into());
        }

        let newly_cancelled = game.state != GameState::Cancelled;
        if newly_cancelled {
            game.state = GameState::Cancelled;
            with_retry(policy, "cancel_game", || store.update_game(&game)).await?;
            EngineMetrics::incr(&self.services.metrics().games_cancelled);
        }

        let now = self.services.clock().now();
        let mut voided = Vec::with_capacity(wagers.len());
        let mut refunded = 0;
        for mut wager in wagers {
            if wager.state == SettlementState::Pending {
                wager.state = SettlementState::Voided;
                wager.settled_at = Some(now);
                with_retry(policy, "void_wager", || store.update_wager(&wager)).await?;
                refunded += 1;
            }
            voided.push(wager);
        }

        for wager in &voided {
            let key = refund_key(&wager.id);
            let credited = with_retry(policy, "refund_credit", || {
                ledger.credit(&wager.owner_id, wager.stake, &key)
            })
            .await;
            if let Err(e) = credited {
                if e.is_operator_alert() {
                    EngineMetrics::incr(&self.services.metrics().persistence_escalations);
                }
                tracing::error!(
                    game_id = %game_id,
                    wager_id = %wager.id,
                    error = %e,
                    "Refund not credited for cancelled game; cancel again to retry"
                );
                return Err(e);
            }
        }

        game.aggregates = GameAggregates::from_wagers(&voided);
        with_retry(policy, "cancel_game", || store.update_game(&game)).await?;

        drop(guard);
        self.services.locks().release(&game_id);

        if newly_cancelled || refunded > 0 {
            tracing::warn!(game_id = %game_id, refunded, "Game cancelled");
            self.services
                .events()
                .publish(GameEvent::GameCancelled { game_id, refunded });
        }

        Ok(game)
    }
}
