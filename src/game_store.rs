//! Persistent game and wager records.
//!
//! `RocksGameStore` keeps JSON records plus key-only prefix indexes; a record
//! and every index entry it implies are written in one `WriteBatch`.

use crate::{
    errors::{EngineResult, StorageError},
    games::types::{Game, GameId, GameState, OwnerId, SettlementState, Wager, WagerId},
    storage::OptimizedStorage,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};

const GAME_RECORD_PREFIX: &str = "game:record:";
const GAME_OPEN_PREFIX: &str = "game:open:";
const WAGER_RECORD_PREFIX: &str = "wager:record:";
const WAGER_GAME_PREFIX: &str = "wager:game:";
const WAGER_PENDING_PREFIX: &str = "wager:pending:";
const WAGER_OWNER_PREFIX: &str = "wager:owner:";

/// Persistence collaborator for games and wagers
#[async_trait]
pub trait GameStore: Send + Sync {
    async fn insert_game(&self, game: &Game) -> EngineResult<()>;

    async fn load_game(&self, id: &GameId) -> EngineResult<Option<Game>>;

    async fn update_game(&self, game: &Game) -> EngineResult<()>;

    /// All games, optionally filtered by stored state, ordered by close time
    async fn list_games(&self, state: Option<GameState>) -> EngineResult<Vec<Game>>;

    /// Games whose stored state is Pending or Active, ordered by close time
    async fn list_open_games(&self) -> EngineResult<Vec<Game>>;

    /// Store a new wager together with its game's updated aggregates
    async fn insert_wager(&self, wager: &Wager, game: &Game) -> EngineResult<()>;

    async fn load_wager(&self, id: &WagerId) -> EngineResult<Option<Wager>>;

    async fn update_wager(&self, wager: &Wager) -> EngineResult<()>;

    /// Update a wager and its game in one write
    async fn update_wager_with_game(&self, wager: &Wager, game: &Game) -> EngineResult<()>;

    /// Wagers of a game in placement order
    async fn wagers_for_game(&self, game_id: &GameId) -> EngineResult<Vec<Wager>>;

    /// Unsettled wagers of a game in placement order
    async fn pending_wagers_for_game(&self, game_id: &GameId) -> EngineResult<Vec<Wager>>;

    async fn wagers_for_owner(&self, owner: &OwnerId) -> EngineResult<Vec<Wager>>;
}

fn sort_games(games: &mut [Game]) {
    games.sort_by(|a, b| a.close_time.cmp(&b.close_time).then(a.id.cmp(&b.id)));
}

fn sort_wagers(wagers: &mut [Wager]) {
    wagers.sort_by(|a, b| a.placed_at.cmp(&b.placed_at).then(a.id.cmp(&b.id)));
}

fn is_open(state: GameState) -> bool {
    matches!(state, GameState::Pending | GameState::Active)
}

/// In-memory store for tests and the `memory` backend
#[derive(Default)]
pub struct MemoryGameStore {
    games: DashMap<GameId, Game>,
    wagers: DashMap<WagerId, Wager>,
    game_wagers: DashMap<GameId, Vec<WagerId>>,
    owner_wagers: DashMap<OwnerId, Vec<WagerId>>,
}

impl MemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect_wagers(&self, ids: &[WagerId]) -> Vec<Wager> {
        let mut wagers: Vec<Wager> = ids
            .iter()
            .filter_map(|id| self.wagers.get(id).map(|w| w.clone()))
            .collect();
        sort_wagers(&mut wagers);
        wagers
    }

    fn ids_for_game(&self, game_id: &GameId) -> Vec<WagerId> {
        self.game_wagers
            .get(game_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl GameStore for MemoryGameStore {
    async fn insert_game(&self, game: &Game) -> EngineResult<()> {
        self.games.insert(game.id, game.clone());
        Ok(())
    }

    async fn load_game(&self, id: &GameId) -> EngineResult<Option<Game>> {
        Ok(self.games.get(id).map(|g| g.clone()))
    }

    async fn update_game(&self, game: &Game) -> EngineResult<()> {
        self.games.insert(game.id, game.clone());
        Ok(())
    }

    async fn list_games(&self, state: Option<GameState>) -> EngineResult<Vec<Game>> {
        let mut games: Vec<Game> = self
            .games
            .iter()
            .filter(|g| state.map_or(true, |s| g.state == s))
            .map(|g| g.clone())
            .collect();
        sort_games(&mut games);
        Ok(games)
    }

    async fn list_open_games(&self) -> EngineResult<Vec<Game>> {
        let mut games: Vec<Game> = self
            .games
            .iter()
            .filter(|g| is_open(g.state))
            .map(|g| g.clone())
            .collect();
        sort_games(&mut games);
        Ok(games)
    }

    async fn insert_wager(&self, wager: &Wager, game: &Game) -> EngineResult<()> {
        self.wagers.insert(wager.id, wager.clone());
        self.game_wagers
            .entry(wager.game_id)
            .or_default()
            .push(wager.id);
        self.owner_wagers
            .entry(wager.owner_id.clone())
            .or_default()
            .push(wager.id);
        self.games.insert(game.id, game.clone());
        Ok(())
    }

    async fn load_wager(&self, id: &WagerId) -> EngineResult<Option<Wager>> {
        Ok(self.wagers.get(id).map(|w| w.clone()))
    }

    async fn update_wager(&self, wager: &Wager) -> EngineResult<()> {
        self.wagers.insert(wager.id, wager.clone());
        Ok(())
    }

    async fn update_wager_with_game(&self, wager: &Wager, game: &Game) -> EngineResult<()> {
        self.wagers.insert(wager.id, wager.clone());
        self.games.insert(game.id, game.clone());
        Ok(())
    }

    async fn wagers_for_game(&self, game_id: &GameId) -> EngineResult<Vec<Wager>> {
        Ok(self.collect_wagers(&self.ids_for_game(game_id)))
    }

    async fn pending_wagers_for_game(&self, game_id: &GameId) -> EngineResult<Vec<Wager>> {
        let mut wagers = self.collect_wagers(&self.ids_for_game(game_id));
        wagers.retain(|w| w.state == SettlementState::Pending);
        Ok(wagers)
    }

    async fn wagers_for_owner(&self, owner: &OwnerId) -> EngineResult<Vec<Wager>> {
        let ids = self
            .owner_wagers
            .get(owner)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        Ok(self.collect_wagers(&ids))
    }
}

fn game_record_key(id: &GameId) -> Vec<u8> {
    format!("{}{}", GAME_RECORD_PREFIX, id).into_bytes()
}

fn game_open_key(id: &GameId) -> Vec<u8> {
    format!("{}{}", GAME_OPEN_PREFIX, id).into_bytes()
}

fn wager_record_key(id: &WagerId) -> Vec<u8> {
    format!("{}{}", WAGER_RECORD_PREFIX, id).into_bytes()
}

fn wager_game_key(game_id: &GameId, id: &WagerId) -> Vec<u8> {
    format!("{}{}:{}", WAGER_GAME_PREFIX, game_id, id).into_bytes()
}

fn wager_pending_key(game_id: &GameId, id: &WagerId) -> Vec<u8> {
    format!("{}{}:{}", WAGER_PENDING_PREFIX, game_id, id).into_bytes()
}

fn wager_owner_key(owner: &OwnerId, id: &WagerId) -> Vec<u8> {
    format!("{}{}:{}", WAGER_OWNER_PREFIX, owner, id).into_bytes()
}

/// Puts and deletes for one atomic write
#[derive(Default)]
struct Batch {
    puts: Vec<(Vec<u8>, Vec<u8>)>,
    deletes: Vec<Vec<u8>>,
}

impl Batch {
    fn put_game(&mut self, game: &Game) -> EngineResult<()> {
        self.puts.push((game_record_key(&game.id), encode(game)?));
        if is_open(game.state) {
            self.puts.push((game_open_key(&game.id), Vec::new()));
        } else {
            self.deletes.push(game_open_key(&game.id));
        }
        Ok(())
    }

    fn put_wager(&mut self, wager: &Wager) -> EngineResult<()> {
        self.puts.push((wager_record_key(&wager.id), encode(wager)?));
        let pending = wager_pending_key(&wager.game_id, &wager.id);
        if wager.state == SettlementState::Pending {
            self.puts.push((pending, Vec::new()));
        } else {
            self.deletes.push(pending);
        }
        Ok(())
    }

    fn index_new_wager(&mut self, wager: &Wager) {
        self.puts
            .push((wager_game_key(&wager.game_id, &wager.id), Vec::new()));
        self.puts
            .push((wager_owner_key(&wager.owner_id, &wager.id), Vec::new()));
    }
}

fn encode<T: Serialize>(value: &T) -> EngineResult<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| StorageError::WriteFailed(format!("Failed to encode record: {}", e)).into())
}

fn decode<T: DeserializeOwned>(bytes: &[u8], what: &str) -> EngineResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        StorageError::CorruptedData(format!("Failed to decode {}: {}", what, e)).into()
    })
}

/// RocksDB-backed store
#[derive(Clone)]
pub struct RocksGameStore {
    storage: OptimizedStorage,
}

impl RocksGameStore {
    pub fn new(storage: OptimizedStorage) -> Self {
        Self { storage }
    }

    fn write(&self, batch: Batch) -> EngineResult<()> {
        self.storage
            .batch_write(&batch.puts, &batch.deletes)
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    fn read(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        Ok(self
            .storage
            .get(key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?)
    }

    fn scan(&self, prefix: &str) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .storage
            .scan_prefix(prefix.as_bytes(), usize::MAX)
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?)
    }

    /// Trailing id of an index key; everything after the last ':' is a uuid
    fn index_suffix(key: &[u8]) -> Option<uuid::Uuid> {
        let key = std::str::from_utf8(key).ok()?;
        let (_, id) = key.rsplit_once(':')?;
        uuid::Uuid::parse_str(id).ok()
    }

    fn wagers_under(&self, prefix: &str) -> EngineResult<Vec<Wager>> {
        let mut wagers = Vec::new();
        for (key, _) in self.scan(prefix)? {
            let Some(id) = Self::index_suffix(&key) else {
                tracing::warn!(key = %String::from_utf8_lossy(&key), "Skipping malformed wager index key");
                continue;
            };
            let wager_id = WagerId(id);
            match self.read(&wager_record_key(&wager_id))? {
                Some(bytes) => wagers.push(decode(&bytes, "wager")?),
                None => tracing::warn!(wager_id = %wager_id, "Wager index entry without record"),
            }
        }
        sort_wagers(&mut wagers);
        Ok(wagers)
    }
}

#[async_trait]
impl GameStore for RocksGameStore {
    async fn insert_game(&self, game: &Game) -> EngineResult<()> {
        let mut batch = Batch::default();
        batch.put_game(game)?;
        self.write(batch)
    }

    async fn load_game(&self, id: &GameId) -> EngineResult<Option<Game>> {
        match self.read(&game_record_key(id))? {
            Some(bytes) => Ok(Some(decode(&bytes, "game")?)),
            None => Ok(None),
        }
    }

    async fn update_game(&self, game: &Game) -> EngineResult<()> {
        self.insert_game(game).await
    }

    async fn list_games(&self, state: Option<GameState>) -> EngineResult<Vec<Game>> {
        let mut games = Vec::new();
        for (_, value) in self.scan(GAME_RECORD_PREFIX)? {
            let game: Game = decode(&value, "game")?;
            if state.map_or(true, |s| game.state == s) {
                games.push(game);
            }
        }
        sort_games(&mut games);
        Ok(games)
    }

    async fn list_open_games(&self) -> EngineResult<Vec<Game>> {
        let mut games = Vec::new();
        for (key, _) in self.scan(GAME_OPEN_PREFIX)? {
            let Some(id) = Self::index_suffix(&key) else {
                continue;
            };
            if let Some(game) = self.load_game(&GameId(id)).await? {
                // Index entries are advisory; the record is authoritative
                if is_open(game.state) {
                    games.push(game);
                }
            }
        }
        sort_games(&mut games);
        Ok(games)
    }

    async fn insert_wager(&self, wager: &Wager, game: &Game) -> EngineResult<()> {
        let mut batch = Batch::default();
        batch.put_wager(wager)?;
        batch.index_new_wager(wager);
        batch.put_game(game)?;
        self.write(batch)
    }

    async fn load_wager(&self, id: &WagerId) -> EngineResult<Option<Wager>> {
        match self.read(&wager_record_key(id))? {
            Some(bytes) => Ok(Some(decode(&bytes, "wager")?)),
            None => Ok(None),
        }
    }

    async fn update_wager(&self, wager: &Wager) -> EngineResult<()> {
        let mut batch = Batch::default();
        batch.put_wager(wager)?;
        self.write(batch)
    }

    async fn update_wager_with_game(&self, wager: &Wager, game: &Game) -> EngineResult<()> {
        let mut batch = Batch::default();
        batch.put_wager(wager)?;
        batch.put_game(game)?;
        self.write(batch)
    }

    async fn wagers_for_game(&self, game_id: &GameId) -> EngineResult<Vec<Wager>> {
        self.wagers_under(&format!("{}{}:", WAGER_GAME_PREFIX, game_id))
    }

    async fn pending_wagers_for_game(&self, game_id: &GameId) -> EngineResult<Vec<Wager>> {
        let mut wagers = self.wagers_under(&format!("{}{}:", WAGER_PENDING_PREFIX, game_id))?;
        wagers.retain(|w| w.state == SettlementState::Pending);
        Ok(wagers)
    }

    async fn wagers_for_owner(&self, owner: &OwnerId) -> EngineResult<Vec<Wager>> {
        let mut wagers = self.wagers_under(&format!("{}{}:", WAGER_OWNER_PREFIX, owner))?;
        // Owner ids may contain ':' so the prefix can over-match
        wagers.retain(|w| &w.owner_id == owner);
        Ok(wagers)
    }
}
