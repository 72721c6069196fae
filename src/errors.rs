//! Error taxonomy for the draw engine
//!
//! Validation, state and funds errors are expected and user facing. Storage
//! errors are the only class that should page an operator.

use crate::games::types::{Amount, GameId, GameState, OwnerId, SettlementState, WagerId};
use thiserror::Error;

/// Root error type for all engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Game not found: {0}")]
    GameNotFound(GameId),

    #[error("Wager not found: {0}")]
    WagerNotFound(WagerId),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("State conflict: {0}")]
    StateConflict(#[from] StateConflictError),

    #[error("Insufficient funds for {owner}: available {available}, required {required}")]
    InsufficientFunds {
        owner: OwnerId,
        available: Amount,
        required: Amount,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

/// Malformed input, rejected before anything is persisted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid wager shape: {0}")]
    InvalidWagerShape(String),

    #[error("Stake {stake} outside bounds {min}..={max}")]
    StakeOutOfBounds { stake: Amount, min: Amount, max: Amount },

    #[error("Invalid stake bounds {min}..={max}")]
    InvalidStakeBounds { min: Amount, max: Amount },

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Invalid outcome: {0}")]
    InvalidOutcome(String),

    #[error("Invalid draw shape: {draw_size} of {universe_size}")]
    InvalidDrawShape { universe_size: u8, draw_size: u8 },

    #[error("Invalid payout table: {0}")]
    InvalidPayoutTable(String),

    #[error("Wager {0} does not belong to the caller")]
    NotWagerOwner(WagerId),
}

/// The game or wager is not in a state that allows the operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateConflictError {
    #[error("Game {game_id} is not accepting wagers (state: {state})")]
    GameNotActive { game_id: GameId, state: GameState },

    #[error("Game {0} has not reached its close time")]
    GameNotClosed(GameId),

    #[error("Game {0} is cancelled")]
    GameCancelled(GameId),

    #[error("Game {0} has no outcome")]
    OutcomeMissing(GameId),

    #[error("Game {0} already has an outcome")]
    OutcomeAlreadySet(GameId),

    #[error("Wager {wager_id} is {state}, not pending")]
    WagerNotPending { wager_id: WagerId, state: SettlementState },

    #[error("Game {0} already has settled wagers")]
    GameAlreadySettled(GameId),
}

/// Persistence and ledger failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Database open failed: {0}")]
    DatabaseOpenFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl EngineError {
    /// Only persistence failures after validation should alert operators
    pub fn is_operator_alert(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }

    /// Transient failures worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Storage(StorageError::WriteFailed(_))
                | EngineError::Storage(StorageError::ReadFailed(_))
                | EngineError::Storage(StorageError::LedgerUnavailable(_))
        )
    }

    /// Stable code callers can branch on
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::GameNotFound(_) => "GAME_NOT_FOUND",
            EngineError::WagerNotFound(_) => "WAGER_NOT_FOUND",
            EngineError::Validation(ValidationError::InvalidWagerShape(_)) => "INVALID_WAGER_SHAPE",
            EngineError::Validation(ValidationError::StakeOutOfBounds { .. }) => "STAKE_OUT_OF_BOUNDS",
            EngineError::Validation(ValidationError::NotWagerOwner(_)) => "NOT_WAGER_OWNER",
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::StateConflict(StateConflictError::GameNotActive { .. }) => "GAME_NOT_ACTIVE",
            EngineError::StateConflict(_) => "STATE_CONFLICT",
            EngineError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            EngineError::Storage(_) => "PERSISTENCE_ERROR",
            EngineError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::CorruptedData(e.to_string())
    }
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::WriteFailed(e.to_string())
    }
}

// Convenience type aliases for Results
pub type EngineResult<T> = Result<T, EngineError>;
pub type StorageResult<T> = Result<T, StorageError>;
