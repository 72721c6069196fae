//! Wager intake
//!
//! Placement and cancellation take the same per-game lock as settlement, so
//! a wager is either admitted before the game settles or refused.

use crate::errors::{EngineError, EngineResult, StateConflictError, ValidationError};
use crate::events::GameEvent;
use crate::games::lifecycle::ensure_accepting;
use crate::games::types::{
    GameState, Multiplier, OwnerId, SettlementState, Wager, WagerId, WagerRequest,
};
use crate::ledger::{refund_key, stake_key};
use crate::metrics::EngineMetrics;
use crate::retry::with_retry;
use crate::services::ServiceContainer;
use std::sync::Arc;

pub struct WagerIntake {
    services: Arc<ServiceContainer>,
}

impl WagerIntake {
    pub fn new(services: Arc<ServiceContainer>) -> Self {
        Self { services }
    }

    /// Validate, debit the stake and record a Pending wager
    pub async fn place(&self, request: WagerRequest) -> EngineResult<Wager> {
        let game_id = request.game_id;
        let _guard = self.services.locks().acquire(game_id).await;
        let store = self.services.store();
        let ledger = self.services.ledger();
        let policy = self.services.retry_policy();

        let mut game = store
            .load_game(&game_id)
            .await?
            .ok_or(EngineError::GameNotFound(game_id))?;

        let now = self.services.clock().now();
        ensure_accepting(&game, now)?;
        game.stake_bounds.check(request.stake)?;
        request.kind.validate_selection(
            &request.numbers,
            game.draw,
            self.services.config().limits.max_picks,
        )?;

        let mut chosen_numbers = request.numbers;
        chosen_numbers.sort_unstable();
        let wager = Wager {
            id: WagerId::new(),
            game_id,
            owner_id: request.owner_id,
            kind: request.kind,
            chosen_numbers,
            stake: request.stake,
            state: SettlementState::Pending,
            matched_numbers: Vec::new(),
            matched_count: 0,
            applied_multiplier: Multiplier::ZERO,
            payout_amount: 0,
            placed_at: now,
            settled_at: None,
        };

        let stake_ref = stake_key(&wager.id);
        with_retry(policy, "stake_debit", || {
            ledger.debit(&wager.owner_id, wager.stake, &stake_ref)
        })
        .await
        .map_err(|e| {
            if let EngineError::InsufficientFunds { .. } = e {
                tracing::debug!(owner = %wager.owner_id, game_id = %game_id, "Wager rejected: insufficient funds");
            }
            e
        })?;

        // The clock already says Active; record it while we hold the lock
        if game.state == GameState::Pending {
            game.state = GameState::Active;
        }
        game.aggregates.wager_count += 1;
        game.aggregates.stake_total = game.aggregates.stake_total.saturating_add(wager.stake);

        if let Err(e) = with_retry(policy, "insert_wager", || store.insert_wager(&wager, &game)).await {
            // Give the stake back; the wager never existed
            let refund = refund_key(&wager.id);
            if let Err(refund_err) = with_retry(policy, "refund_credit", || {
                ledger.credit(&wager.owner_id, wager.stake, &refund)
            })
            .await
            {
                EngineMetrics::incr(&self.services.metrics().persistence_escalations);
                tracing::error!(
                    wager_id = %wager.id,
                    owner = %wager.owner_id,
                    stake = wager.stake,
                    error = %refund_err,
                    "Stake debited for a wager that was not recorded"
                );
            }
            return Err(e);
        }

        tracing::info!(
            game_id = %game_id,
            wager_id = %wager.id,
            owner = %wager.owner_id,
            kind = %wager.kind,
            stake = wager.stake,
            "Wager placed"
        );
        self.services.metrics().record_wager_placed(wager.stake);
        self.services.events().publish(GameEvent::WagerPlaced {
            game_id,
            wager_id: wager.id,
            owner_id: wager.owner_id.clone(),
            stake: wager.stake,
        });

        Ok(wager)
    }

    /// Void a Pending wager while its game is still open and refund the stake
    ///
    /// The Voided state is persisted before the refund is credited. Cancelling
    /// an already Voided wager replays the same keyed refund, which completes
    /// a cancellation whose credit failed.
    pub async fn cancel(&self, wager_id: WagerId, owner: &OwnerId) -> EngineResult<Wager> {
        let store = self.services.store();
        let policy = self.services.retry_policy();

        let game_id = store
            .load_wager(&wager_id)
            .await?
            .ok_or(EngineError::WagerNotFound(wager_id))?
            .game_id;

        let _guard = self.services.locks().acquire(game_id).await;

        // Re-read under the lock; settlement may have run while we waited
        let mut wager = store
            .load_wager(&wager_id)
            .await?
            .ok_or(EngineError::WagerNotFound(wager_id))?;
        if &wager.owner_id != owner {
            return Err(ValidationError::NotWagerOwner(wager_id).into());
        }

        match wager.state {
            SettlementState::Pending => {}
            SettlementState::Voided => {
                self.credit_refund(&wager).await?;
                tracing::debug!(game_id = %game_id, wager_id = %wager_id, "Refund replayed for voided wager");
                return Ok(wager);
            }
            state => {
                return Err(StateConflictError::WagerNotPending { wager_id, state }.into());
            }
        }

        let mut game = store
            .load_game(&game_id)
            .await?
            .ok_or(EngineError::GameNotFound(game_id))?;
        let now = self.services.clock().now();
        ensure_accepting(&game, now)?;

        wager.state = SettlementState::Voided;
        wager.settled_at = Some(now);
        game.aggregates.wager_count = game.aggregates.wager_count.saturating_sub(1);
        game.aggregates.stake_total = game.aggregates.stake_total.saturating_sub(wager.stake);
        with_retry(policy, "void_wager", || store.update_wager_with_game(&wager, &game)).await?;
        self.services.metrics().record_wager_cancelled(wager.stake);

        self.credit_refund(&wager).await?;

        tracing::info!(game_id = %game_id, wager_id = %wager_id, owner = %owner, "Wager cancelled");
        self.services.events().publish(GameEvent::WagerCancelled {
            game_id,
            wager_id,
            owner_id: owner.clone(),
        });

        Ok(wager)
    }

    /// Credit the stake back under the wager's refund key
    async fn credit_refund(&self, wager: &Wager) -> EngineResult<()> {
        let ledger = self.services.ledger();
        let key = refund_key(&wager.id);
        let credited = with_retry(self.services.retry_policy(), "refund_credit", || {
            ledger.credit(&wager.owner_id, wager.stake, &key)
        })
        .await;

        if let Err(e) = credited {
            if e.is_operator_alert() {
                EngineMetrics::incr(&self.services.metrics().persistence_escalations);
            }
            tracing::error!(
                wager_id = %wager.id,
                owner = %wager.owner_id,
                stake = wager.stake,
                error = %e,
                "Wager voided but refund not credited; cancel again to retry"
            );
            return Err(e);
        }
        Ok(())
    }
}
