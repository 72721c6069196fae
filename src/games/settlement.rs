//! Settlement coordinator
//!
//! `settle` is the only path that assigns an outcome or settles wagers. The
//! scheduler tick, forced outcomes and manual processing all funnel through
//! it, and it holds the game's lock for the whole run.
//!
//! Per wager the payout credit is applied before the wager is persisted. The
//! credit carries the `payout:{wager}` idempotency key, so if the wager write
//! fails the next run finds the wager still Pending and the replayed credit
//! is a no-op.

use crate::errors::{EngineError, EngineResult, StateConflictError};
use crate::events::GameEvent;
use crate::games::draw::DrawnOutcome;
use crate::games::payout;
use crate::games::types::{
    Amount, Game, GameAggregates, GameId, GameState, Outcome, OutcomeOrigin, SettlementState,
    Wager,
};
use crate::ledger::payout_key;
use crate::metrics::EngineMetrics;
use crate::retry::with_retry;
use crate::services::ServiceContainer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How `settle` obtains the outcome when the game has none yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeResolution {
    /// Draw from the configured outcome source
    Draw,
    /// Use operator-supplied numbers; rejected if an outcome already exists
    Forced(Vec<u8>),
    /// Only settle against an outcome that is already stored
    ExistingOnly,
}

/// Result of one settlement run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSummary {
    pub game_id: GameId,
    pub state: GameState,
    pub outcome: Option<Outcome>,
    /// Wagers moved out of Pending by this run
    pub newly_settled: usize,
    pub winners: usize,
    pub payout_credited: Amount,
    pub aggregates: GameAggregates,
}

impl SettlementSummary {
    fn unchanged(game: &Game) -> Self {
        Self {
            game_id: game.id,
            state: game.state,
            outcome: game.outcome.clone(),
            newly_settled: 0,
            winners: 0,
            payout_credited: 0,
            aggregates: game.aggregates,
        }
    }
}

pub struct SettlementCoordinator {
    services: Arc<ServiceContainer>,
}

impl SettlementCoordinator {
    pub fn new(services: Arc<ServiceContainer>) -> Self {
        Self { services }
    }

    /// Assign the outcome if needed and settle every pending wager, exactly once
    pub async fn settle(
        &self,
        game_id: GameId,
        resolution: OutcomeResolution,
    ) -> EngineResult<SettlementSummary> {
        let guard = self.services.locks().acquire(game_id).await;
        let result = self.settle_locked(game_id, resolution).await;
        drop(guard);

        match &result {
            Ok(summary) if summary.state == GameState::Completed => {
                self.services.locks().release(&game_id);
            }
            Err(e) if e.is_operator_alert() => {
                EngineMetrics::incr(&self.services.metrics().persistence_escalations);
                tracing::error!(
                    game_id = %game_id,
                    error = %e,
                    "Settlement interrupted; re-run settle to resume"
                );
            }
            Err(e) => {
                tracing::debug!(game_id = %game_id, error = %e, "Settlement rejected");
            }
            Ok(_) => {}
        }

        result
    }

    async fn settle_locked(
        &self,
        game_id: GameId,
        resolution: OutcomeResolution,
    ) -> EngineResult<SettlementSummary> {
        let store = self.services.store();
        let policy = self.services.retry_policy();

        let mut game = with_retry(policy, "load_game", || store.load_game(&game_id))
            .await?
            .ok_or(EngineError::GameNotFound(game_id))?;

        match game.state {
            GameState::Cancelled => return Err(StateConflictError::GameCancelled(game_id).into()),
            GameState::Completed => {
                if matches!(resolution, OutcomeResolution::Forced(_)) {
                    return Err(StateConflictError::OutcomeAlreadySet(game_id).into());
                }
                return Ok(SettlementSummary::unchanged(&game));
            }
            GameState::Pending | GameState::Active => {}
        }

        let now = self.services.clock().now();
        if now < game.close_time {
            return Err(StateConflictError::GameNotClosed(game_id).into());
        }

        let outcome = self.resolve_outcome(&mut game, resolution).await?;

        let pending = with_retry(policy, "pending_wagers", || {
            store.pending_wagers_for_game(&game_id)
        })
        .await?;

        let mut newly_settled = 0;
        let mut winners = 0;
        let mut payout_credited: Amount = 0;
        for wager in pending {
            let settled = self.settle_wager(&game, &outcome, wager, now).await?;
            newly_settled += 1;
            if settled.state == SettlementState::Won {
                winners += 1;
                payout_credited = payout_credited.saturating_add(settled.payout_amount);
            }
        }

        let all_wagers = with_retry(policy, "wagers_for_game", || store.wagers_for_game(&game_id)).await?;
        game.aggregates = GameAggregates::from_wagers(&all_wagers);
        game.state = GameState::Completed;
        game.settled_at = Some(now);
        with_retry(policy, "complete_game", || store.update_game(&game)).await?;

        tracing::info!(
            game_id = %game_id,
            newly_settled,
            winners,
            payout_credited,
            stake_total = game.aggregates.stake_total,
            payout_total = game.aggregates.payout_total,
            "Game settled"
        );
        EngineMetrics::incr(&self.services.metrics().games_settled);
        self.services.events().publish(GameEvent::GameSettled {
            game_id,
            wagers_settled: newly_settled,
            winners,
            payout_total: game.aggregates.payout_total,
        });

        Ok(SettlementSummary {
            game_id,
            state: game.state,
            outcome: Some(outcome),
            newly_settled,
            winners,
            payout_credited,
            aggregates: game.aggregates,
        })
    }

    /// Return the stored outcome, or assign and persist one
    async fn resolve_outcome(
        &self,
        game: &mut Game,
        resolution: OutcomeResolution,
    ) -> EngineResult<Outcome> {
        if let Some(outcome) = &game.outcome {
            if matches!(resolution, OutcomeResolution::Forced(_)) {
                return Err(StateConflictError::OutcomeAlreadySet(game.id).into());
            }
            tracing::debug!(game_id = %game.id, "Resuming settlement with stored outcome");
            return Ok(outcome.clone());
        }

        let (drawn, origin) = match resolution {
            OutcomeResolution::ExistingOnly => {
                return Err(StateConflictError::OutcomeMissing(game.id).into());
            }
            OutcomeResolution::Forced(numbers) => (
                DrawnOutcome::unproven(Outcome::new(numbers, game.draw)?),
                OutcomeOrigin::Forced,
            ),
            OutcomeResolution::Draw => {
                (self.services.outcome_source().draw(game)?, OutcomeOrigin::Generated)
            }
        };

        game.outcome = Some(drawn.outcome.clone());
        game.outcome_origin = Some(origin);
        game.draw_proof = drawn.proof;

        // Persist before touching wagers so the outcome can never change on resume
        let store = self.services.store();
        let snapshot: &Game = game;
        with_retry(self.services.retry_policy(), "store_outcome", || {
            store.update_game(snapshot)
        })
        .await?;

        tracing::info!(
            game_id = %game.id,
            origin = ?origin,
            sum = drawn.outcome.sum(),
            "Outcome assigned"
        );
        self.services.events().publish(GameEvent::OutcomeDrawn {
            game_id: game.id,
            outcome: drawn.outcome.clone(),
            origin,
        });

        Ok(drawn.outcome)
    }

    async fn settle_wager(
        &self,
        game: &Game,
        outcome: &Outcome,
        mut wager: Wager,
        now: DateTime<Utc>,
    ) -> EngineResult<Wager> {
        let policy = self.services.retry_policy();
        let result = payout::calculate(
            wager.kind,
            &wager.chosen_numbers,
            wager.stake,
            outcome,
            &game.payout_table,
        );

        if result.won && result.payout_amount > 0 {
            let ledger = self.services.ledger();
            let key = payout_key(&wager.id);
            let owner = &wager.owner_id;
            with_retry(policy, "payout_credit", || {
                ledger.credit(owner, result.payout_amount, &key)
            })
            .await?;
        }

        wager.state = if result.won {
            SettlementState::Won
        } else {
            SettlementState::Lost
        };
        wager.matched_numbers = result.matched_numbers;
        wager.matched_count = result.matched_count;
        wager.applied_multiplier = result.multiplier;
        wager.payout_amount = result.payout_amount;
        wager.settled_at = Some(now);

        let store = self.services.store();
        with_retry(policy, "settle_wager", || store.update_wager(&wager)).await?;

        tracing::debug!(
            game_id = %game.id,
            wager_id = %wager.id,
            state = %wager.state,
            matched = wager.matched_count,
            payout = wager.payout_amount,
            "Wager settled"
        );
        self.services.metrics().record_wager_settled(
            (wager.state == SettlementState::Won).then_some(wager.payout_amount),
        );

        Ok(wager)
    }
}
