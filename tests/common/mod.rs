//! Shared harness for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use drawhouse::{
    config::StorageBackend,
    errors::{EngineResult, StorageError},
    games::{
        draw::DrawnOutcome,
        types::{
            Amount, Game, GameId, GameState, OwnerId, Outcome, Wager, WagerId, WagerKind,
            WagerRequest,
        },
        OutcomeSource,
    },
    Clock, DrawEngine, EngineConfig, GameStore, Ledger, ManualClock, MemoryGameStore, MemoryLedger,
    ServiceBuilder,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub const STARTING_BALANCE: Amount = 1_000_000;

/// Always draws the same numbers and counts how often it was asked
pub struct FixedOutcomeSource {
    numbers: Vec<u8>,
    draws: AtomicUsize,
}

impl FixedOutcomeSource {
    pub fn new(numbers: Vec<u8>) -> Self {
        Self {
            numbers,
            draws: AtomicUsize::new(0),
        }
    }

    pub fn draws(&self) -> usize {
        self.draws.load(Ordering::SeqCst)
    }
}

impl OutcomeSource for FixedOutcomeSource {
    fn draw(&self, game: &Game) -> EngineResult<DrawnOutcome> {
        self.draws.fetch_add(1, Ordering::SeqCst);
        Ok(DrawnOutcome::unproven(Outcome::new(self.numbers.clone(), game.draw)?))
    }
}

fn injected(flag: &AtomicBool) -> EngineResult<()> {
    if flag.load(Ordering::SeqCst) {
        return Err(StorageError::WriteFailed("injected failure".to_string()).into());
    }
    Ok(())
}

/// Memory store with switchable write failures and a gate on open-game listing
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryGameStore,
    pub fail_wager_updates: AtomicBool,
    pub fail_wager_inserts: AtomicBool,
    /// While set, `list_open_games` signals `listing_entered` and waits for `listing_release`
    pub hold_listing: AtomicBool,
    pub listing_entered: Notify,
    pub listing_release: Notify,
}

impl FlakyStore {
    fn check(&self) -> EngineResult<()> {
        injected(&self.fail_wager_updates)
    }
}

#[async_trait]
impl GameStore for FlakyStore {
    async fn insert_game(&self, game: &Game) -> EngineResult<()> {
        self.inner.insert_game(game).await
    }

    async fn load_game(&self, id: &GameId) -> EngineResult<Option<Game>> {
        self.inner.load_game(id).await
    }

    async fn update_game(&self, game: &Game) -> EngineResult<()> {
        self.inner.update_game(game).await
    }

    async fn list_games(&self, state: Option<GameState>) -> EngineResult<Vec<Game>> {
        self.inner.list_games(state).await
    }

    async fn list_open_games(&self) -> EngineResult<Vec<Game>> {
        if self.hold_listing.load(Ordering::SeqCst) {
            self.listing_entered.notify_one();
            self.listing_release.notified().await;
        }
        self.inner.list_open_games().await
    }

    async fn insert_wager(&self, wager: &Wager, game: &Game) -> EngineResult<()> {
        injected(&self.fail_wager_inserts)?;
        self.inner.insert_wager(wager, game).await
    }

    async fn load_wager(&self, id: &WagerId) -> EngineResult<Option<Wager>> {
        self.inner.load_wager(id).await
    }

    async fn update_wager(&self, wager: &Wager) -> EngineResult<()> {
        self.check()?;
        self.inner.update_wager(wager).await
    }

    async fn update_wager_with_game(&self, wager: &Wager, game: &Game) -> EngineResult<()> {
        self.check()?;
        self.inner.update_wager_with_game(wager, game).await
    }

    async fn wagers_for_game(&self, game_id: &GameId) -> EngineResult<Vec<Wager>> {
        self.inner.wagers_for_game(game_id).await
    }

    async fn pending_wagers_for_game(&self, game_id: &GameId) -> EngineResult<Vec<Wager>> {
        self.inner.pending_wagers_for_game(game_id).await
    }

    async fn wagers_for_owner(&self, owner: &OwnerId) -> EngineResult<Vec<Wager>> {
        self.inner.wagers_for_owner(owner).await
    }
}

/// Ledger in front of a `MemoryLedger` whose credits can be made to fail
pub struct FlakyLedger {
    inner: Arc<MemoryLedger>,
    pub fail_credits: AtomicBool,
}

impl FlakyLedger {
    pub fn new(inner: Arc<MemoryLedger>) -> Self {
        Self {
            inner,
            fail_credits: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    async fn balance(&self, owner: &OwnerId) -> EngineResult<Amount> {
        self.inner.balance(owner).await
    }

    async fn debit(&self, owner: &OwnerId, amount: Amount, key: &str) -> EngineResult<Amount> {
        self.inner.debit(owner, amount, key).await
    }

    async fn credit(&self, owner: &OwnerId, amount: Amount, key: &str) -> EngineResult<Amount> {
        if self.fail_credits.load(Ordering::SeqCst) {
            return Err(StorageError::LedgerUnavailable("injected failure".to_string()).into());
        }
        self.inner.credit(owner, amount, key).await
    }
}

pub struct Harness {
    pub engine: Arc<DrawEngine>,
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<MemoryLedger>,
    /// The engine's view of `ledger`; flip `fail_credits` to break payouts and refunds
    pub ledger_faults: Arc<FlakyLedger>,
}

pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.storage.backend = StorageBackend::Memory;
    config.settlement.max_write_attempts = 2;
    config.settlement.retry_backoff_ms = 1;
    config
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
        .map(|t| t.with_timezone(&Utc))
        .unwrap()
}

pub async fn harness_with(
    config: EngineConfig,
    source: Arc<dyn OutcomeSource>,
    store: Option<Arc<dyn GameStore>>,
) -> Harness {
    let clock = Arc::new(ManualClock::new(start_time()));
    let ledger = Arc::new(MemoryLedger::new());
    let ledger_faults = Arc::new(FlakyLedger::new(ledger.clone()));
    let mut builder = ServiceBuilder::new()
        .with_config(config)
        .with_clock(clock.clone())
        .with_ledger(ledger_faults.clone())
        .with_outcome_source(source);
    if let Some(store) = store {
        builder = builder.with_store(store);
    }
    let services = builder.build().await.unwrap();

    Harness {
        engine: Arc::new(DrawEngine::new(Arc::new(services))),
        clock,
        ledger,
        ledger_faults,
    }
}

pub async fn harness(source: Arc<dyn OutcomeSource>) -> Harness {
    harness_with(test_config(), source, None).await
}

impl Harness {
    /// Game opening now and closing in five minutes, with configured defaults
    pub async fn open_game(&self) -> Game {
        let now = self.clock.now();
        self.game_between(now, now + Duration::minutes(5)).await
    }

    pub async fn game_between(&self, open: DateTime<Utc>, close: DateTime<Utc>) -> Game {
        let new_game = self
            .engine
            .services()
            .config()
            .default_new_game("round", open, close)
            .unwrap();
        self.engine.create_game(new_game).await.unwrap()
    }

    pub fn funded_owner(&self, name: &str) -> OwnerId {
        let owner = OwnerId::new(name);
        self.ledger.deposit(&owner, STARTING_BALANCE);
        owner
    }

    pub async fn place(
        &self,
        owner: &OwnerId,
        game_id: GameId,
        kind: WagerKind,
        numbers: &[u8],
        stake: Amount,
    ) -> EngineResult<Wager> {
        self.engine
            .place_wager(WagerRequest {
                owner_id: owner.clone(),
                game_id,
                kind,
                numbers: numbers.to_vec(),
                stake,
            })
            .await
    }

    pub async fn balance(&self, owner: &OwnerId) -> Amount {
        self.ledger.balance(owner).await.unwrap()
    }

    /// Move the clock past the game's close time
    pub fn close(&self, game: &Game) {
        self.clock.set(game.close_time + Duration::seconds(1));
    }
}

/// The twenty smallest numbers: sum 210
pub fn low_draw() -> Vec<u8> {
    (1..=20).collect()
}

/// The twenty largest numbers: sum 1410
pub fn high_draw() -> Vec<u8> {
    (61..=80).collect()
}

/// 31..=50, summing to exactly 810
pub fn threshold_draw() -> Vec<u8> {
    (31..=50).collect()
}
