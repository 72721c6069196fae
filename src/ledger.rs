//! Account ledger collaborator
//!
//! The engine only ever debits stakes and credits payouts or refunds. Every
//! mutation carries an idempotency key; replaying a key is a no-op that
//! returns the current balance, which is what makes settlement retry-safe.

use crate::errors::{EngineError, EngineResult, StorageError};
use crate::games::types::{Amount, OwnerId, WagerId};
use crate::storage::OptimizedStorage;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use tokio::sync::Mutex;

const BALANCE_PREFIX: &str = "ledger:balance:";
const APPLIED_PREFIX: &str = "ledger:applied:";

/// Idempotency key for the stake debit of a wager
pub fn stake_key(wager_id: &WagerId) -> String {
    format!("stake:{}", wager_id)
}

/// Idempotency key for the payout credit of a wager
pub fn payout_key(wager_id: &WagerId) -> String {
    format!("payout:{}", wager_id)
}

/// Idempotency key for the refund credit of a wager
pub fn refund_key(wager_id: &WagerId) -> String {
    format!("refund:{}", wager_id)
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Current balance (zero for unknown owners)
    async fn balance(&self, owner: &OwnerId) -> EngineResult<Amount>;

    /// Remove funds; fails with `InsufficientFunds` without partial debit
    async fn debit(&self, owner: &OwnerId, amount: Amount, key: &str) -> EngineResult<Amount>;

    /// Add funds
    async fn credit(&self, owner: &OwnerId, amount: Amount, key: &str) -> EngineResult<Amount>;
}

#[derive(Debug, Default)]
struct Account {
    balance: Amount,
    applied: HashSet<String>,
}

/// In-memory ledger; each owner's account is mutated under its map entry lock
#[derive(Default)]
pub struct MemoryLedger {
    accounts: DashMap<OwnerId, Account>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed funds outside the wager flow
    pub fn deposit(&self, owner: &OwnerId, amount: Amount) -> Amount {
        let mut account = self.accounts.entry(owner.clone()).or_default();
        account.balance = account.balance.saturating_add(amount);
        account.balance
    }

    /// Whether a mutation with this key has been applied for the owner
    pub fn has_applied(&self, owner: &OwnerId, key: &str) -> bool {
        self.accounts
            .get(owner)
            .map(|account| account.applied.contains(key))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn balance(&self, owner: &OwnerId) -> EngineResult<Amount> {
        Ok(self.accounts.get(owner).map(|a| a.balance).unwrap_or(0))
    }

    async fn debit(&self, owner: &OwnerId, amount: Amount, key: &str) -> EngineResult<Amount> {
        let mut account = self.accounts.entry(owner.clone()).or_default();
        if account.applied.contains(key) {
            return Ok(account.balance);
        }
        if account.balance < amount {
            return Err(EngineError::InsufficientFunds {
                owner: owner.clone(),
                available: account.balance,
                required: amount,
            });
        }
        account.balance -= amount;
        account.applied.insert(key.to_string());
        Ok(account.balance)
    }

    async fn credit(&self, owner: &OwnerId, amount: Amount, key: &str) -> EngineResult<Amount> {
        let mut account = self.accounts.entry(owner.clone()).or_default();
        if account.applied.contains(key) {
            return Ok(account.balance);
        }
        account.balance = account.balance.saturating_add(amount);
        account.applied.insert(key.to_string());
        Ok(account.balance)
    }
}

/// RocksDB-backed ledger. Balance and applied key are written in one batch.
pub struct RocksLedger {
    storage: OptimizedStorage,
    write_lock: Mutex<()>,
}

impl RocksLedger {
    pub fn new(storage: OptimizedStorage) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    fn balance_key(owner: &OwnerId) -> Vec<u8> {
        format!("{}{}", BALANCE_PREFIX, owner).into_bytes()
    }

    fn applied_key(owner: &OwnerId, key: &str) -> Vec<u8> {
        format!("{}{}:{}", APPLIED_PREFIX, owner, key).into_bytes()
    }

    fn read_balance(&self, owner: &OwnerId) -> EngineResult<Amount> {
        let bytes = self
            .storage
            .get(&Self::balance_key(owner))
            .map_err(|e| StorageError::LedgerUnavailable(e.to_string()))?;
        match bytes {
            None => Ok(0),
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StorageError::CorruptedData(format!("balance record for {}", owner))
                })?;
                Ok(Amount::from_be_bytes(raw))
            }
        }
    }

    fn already_applied(&self, owner: &OwnerId, key: &str) -> EngineResult<bool> {
        let found = self
            .storage
            .get(&Self::applied_key(owner, key))
            .map_err(|e| StorageError::LedgerUnavailable(e.to_string()))?;
        Ok(found.is_some())
    }

    fn commit(&self, owner: &OwnerId, key: &str, balance: Amount) -> EngineResult<()> {
        let puts = [
            (Self::balance_key(owner), balance.to_be_bytes().to_vec()),
            (Self::applied_key(owner, key), Vec::new()),
        ];
        self.storage
            .batch_write(&puts, &[])
            .map_err(|e| StorageError::LedgerUnavailable(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Ledger for RocksLedger {
    async fn balance(&self, owner: &OwnerId) -> EngineResult<Amount> {
        self.read_balance(owner)
    }

    async fn debit(&self, owner: &OwnerId, amount: Amount, key: &str) -> EngineResult<Amount> {
        let _guard = self.write_lock.lock().await;
        let balance = self.read_balance(owner)?;
        if self.already_applied(owner, key)? {
            return Ok(balance);
        }
        if balance < amount {
            return Err(EngineError::InsufficientFunds {
                owner: owner.clone(),
                available: balance,
                required: amount,
            });
        }
        let balance = balance - amount;
        self.commit(owner, key, balance)?;
        Ok(balance)
    }

    async fn credit(&self, owner: &OwnerId, amount: Amount, key: &str) -> EngineResult<Amount> {
        let _guard = self.write_lock.lock().await;
        let balance = self.read_balance(owner)?;
        if self.already_applied(owner, key)? {
            return Ok(balance);
        }
        let balance = balance.saturating_add(amount);
        self.commit(owner, key, balance)?;
        Ok(balance)
    }
}
