//! Draw engine facade
//!
//! Every operation the surrounding application calls. Settlement from any
//! trigger (tick, forced outcome, manual processing) goes through
//! `SettlementCoordinator::settle`.

use crate::errors::{EngineError, EngineResult};
use crate::events::GameEvent;
use crate::games::{
    GameLifecycle, OutcomeResolution, SettlementCoordinator, SettlementSummary, WagerIntake,
};
use crate::games::types::{Game, GameId, GameState, NewGame, OwnerId, Wager, WagerId, WagerRequest};
use crate::metrics::EngineMetrics;
use crate::services::ServiceContainer;
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct DrawEngine {
    services: Arc<ServiceContainer>,
    lifecycle: GameLifecycle,
    settlement: SettlementCoordinator,
    intake: WagerIntake,
}

impl DrawEngine {
    pub fn new(services: Arc<ServiceContainer>) -> Self {
        Self {
            lifecycle: GameLifecycle::new(services.clone()),
            settlement: SettlementCoordinator::new(services.clone()),
            intake: WagerIntake::new(services.clone()),
            services,
        }
    }

    pub fn services(&self) -> &Arc<ServiceContainer> {
        &self.services
    }

    pub async fn create_game(&self, new_game: NewGame) -> EngineResult<Game> {
        self.lifecycle.create_game(new_game).await
    }

    pub async fn place_wager(&self, request: WagerRequest) -> EngineResult<Wager> {
        self.intake.place(request).await
    }

    pub async fn cancel_wager(&self, wager_id: WagerId, owner: &OwnerId) -> EngineResult<Wager> {
        self.intake.cancel(wager_id, owner).await
    }

    /// Admin override: settle a closed game against the supplied numbers
    pub async fn force_outcome(&self, game_id: GameId, numbers: Vec<u8>) -> EngineResult<Game> {
        tracing::warn!(game_id = %game_id, "Forcing outcome");
        self.settlement
            .settle(game_id, OutcomeResolution::Forced(numbers))
            .await?;
        self.get_game(game_id).await
    }

    /// Admin "generate result": draw from the configured source even in manual mode
    pub async fn draw_outcome(&self, game_id: GameId) -> EngineResult<SettlementSummary> {
        self.settlement.settle(game_id, OutcomeResolution::Draw).await
    }

    /// Idempotent settlement. In manual draw mode it needs a stored outcome.
    pub async fn trigger_settlement(&self, game_id: GameId) -> EngineResult<SettlementSummary> {
        self.settlement.settle(game_id, self.due_resolution()).await
    }

    pub async fn cancel_game(&self, game_id: GameId) -> EngineResult<Game> {
        self.lifecycle.cancel_game(game_id).await
    }

    /// Flip a Pending game whose open time has passed; false if nothing changed
    pub async fn activate_game(&self, game_id: GameId) -> EngineResult<bool> {
        self.lifecycle.activate(game_id).await
    }

    pub async fn get_game(&self, game_id: GameId) -> EngineResult<Game> {
        self.services
            .store()
            .load_game(&game_id)
            .await?
            .ok_or(EngineError::GameNotFound(game_id))
    }

    pub async fn get_wager(&self, wager_id: WagerId) -> EngineResult<Wager> {
        self.services
            .store()
            .load_wager(&wager_id)
            .await?
            .ok_or(EngineError::WagerNotFound(wager_id))
    }

    pub async fn list_games(&self, state: Option<GameState>) -> EngineResult<Vec<Game>> {
        self.services.store().list_games(state).await
    }

    /// Games that still need activation or settlement, by close time
    pub async fn list_open_games(&self) -> EngineResult<Vec<Game>> {
        self.services.store().list_open_games().await
    }

    pub async fn get_wagers_for_game(&self, game_id: GameId) -> EngineResult<Vec<Wager>> {
        self.get_game(game_id).await?;
        self.services.store().wagers_for_game(&game_id).await
    }

    pub async fn get_wagers_for_owner(&self, owner: &OwnerId) -> EngineResult<Vec<Wager>> {
        self.services.store().wagers_for_owner(owner).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.services.events().subscribe()
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        self.services.metrics()
    }

    pub(crate) fn due_resolution(&self) -> OutcomeResolution {
        if self.services.config().scheduler.auto_draw {
            OutcomeResolution::Draw
        } else {
            OutcomeResolution::ExistingOnly
        }
    }
}
