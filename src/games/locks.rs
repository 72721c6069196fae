use crate::games::types::GameId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-game async mutexes serializing intake, cancellation and settlement
pub struct GameLocks {
    /// Map of game_id -> lock
    locks: Arc<DashMap<GameId, Arc<Mutex<()>>>>,
}

impl GameLocks {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Wait for exclusive access to a game
    pub async fn acquire(&self, game_id: GameId) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the shard lock is released before awaiting
        let lock = self.entry(game_id);
        lock.lock_owned().await
    }

    /// Take the lock only if nobody else holds it
    pub fn try_acquire(&self, game_id: GameId) -> Option<OwnedMutexGuard<()>> {
        self.entry(game_id).try_lock_owned().ok()
    }

    /// Drop the lock for a game in a terminal state (no-op while held)
    pub fn release(&self, game_id: &GameId) -> bool {
        self.locks
            .remove_if(game_id, |_, lock| Arc::strong_count(lock) == 1)
            .is_some()
    }

    /// Number of games with a registered lock
    pub fn tracked_count(&self) -> usize {
        self.locks.len()
    }

    fn entry(&self, game_id: GameId) -> Arc<Mutex<()>> {
        self.locks
            .entry(game_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Default for GameLocks {
    fn default() -> Self {
        Self::new()
    }
}
