//! Game lifecycle notifications
//!
//! The realtime layer subscribes here instead of polling the store. Sending
//! never blocks; with no subscribers events are simply dropped.

use crate::games::types::{Amount, GameId, GameState, Outcome, OutcomeOrigin, OwnerId, WagerId};
use serde::Serialize;
use tokio::sync::broadcast;

/// Event emitted on every externally visible state change
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    GameCreated {
        game_id: GameId,
        label: String,
        state: GameState,
    },
    GameActivated {
        game_id: GameId,
    },
    OutcomeDrawn {
        game_id: GameId,
        outcome: Outcome,
        origin: OutcomeOrigin,
    },
    GameSettled {
        game_id: GameId,
        wagers_settled: usize,
        winners: usize,
        payout_total: Amount,
    },
    GameCancelled {
        game_id: GameId,
        refunded: usize,
    },
    WagerPlaced {
        game_id: GameId,
        wager_id: WagerId,
        owner_id: OwnerId,
        stake: Amount,
    },
    WagerCancelled {
        game_id: GameId,
        wager_id: WagerId,
        owner_id: OwnerId,
    },
}

impl GameEvent {
    pub fn game_id(&self) -> GameId {
        match self {
            GameEvent::GameCreated { game_id, .. }
            | GameEvent::GameActivated { game_id }
            | GameEvent::OutcomeDrawn { game_id, .. }
            | GameEvent::GameSettled { game_id, .. }
            | GameEvent::GameCancelled { game_id, .. }
            | GameEvent::WagerPlaced { game_id, .. }
            | GameEvent::WagerCancelled { game_id, .. } => *game_id,
        }
    }

    /// Stored game state implied by the event, if it changes one
    pub fn resulting_state(&self) -> Option<GameState> {
        match self {
            GameEvent::GameCreated { state, .. } => Some(*state),
            GameEvent::GameActivated { .. } => Some(GameState::Active),
            GameEvent::GameSettled { .. } => Some(GameState::Completed),
            GameEvent::GameCancelled { .. } => Some(GameState::Cancelled),
            _ => None,
        }
    }
}

/// Broadcast fan-out of `GameEvent`s
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GameEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: GameEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
