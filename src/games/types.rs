use crate::errors::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Currency amount in minor units (cents, lamports, ...)
pub type Amount = u64;

/// Highest match count a payout table can describe
pub const MAX_DRAW_SIZE: usize = 20;

/// Game identifier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct GameId(pub Uuid);

impl GameId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GameId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wager identifier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct WagerId(pub Uuid);

impl WagerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WagerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account owner (user id or wallet address)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored lifecycle state of a game
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GameState {
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl GameState {
    /// Completed and Cancelled never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, GameState::Completed | GameState::Cancelled)
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameState::Pending => write!(f, "pending"),
            GameState::Active => write!(f, "active"),
            GameState::Completed => write!(f, "completed"),
            GameState::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for GameState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(GameState::Pending),
            "active" => Ok(GameState::Active),
            "completed" => Ok(GameState::Completed),
            "cancelled" => Ok(GameState::Cancelled),
            other => Err(format!("unknown game state '{}'", other)),
        }
    }
}

/// Settlement state of a single wager
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SettlementState {
    Pending,
    Won,
    Lost,
    Voided,
}

impl SettlementState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SettlementState::Pending)
    }
}

impl fmt::Display for SettlementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementState::Pending => write!(f, "pending"),
            SettlementState::Won => write!(f, "won"),
            SettlementState::Lost => write!(f, "lost"),
            SettlementState::Voided => write!(f, "voided"),
        }
    }
}

/// Supported wager kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WagerKind {
    /// Pick 1..=20 numbers, paid by how many of them are drawn
    Numbers,
    /// Sum of the draw at or above the threshold
    Big,
    /// Sum of the draw below the threshold
    Small,
    /// Sum of the draw is even
    Even,
    /// Sum of the draw is odd
    Odd,
}

impl WagerKind {
    /// Threshold kinds are decided by the draw sum, never by picks
    pub fn requires_numbers(self) -> bool {
        matches!(self, WagerKind::Numbers)
    }

    /// Check the chosen numbers against this kind's cardinality rule
    pub fn validate_selection(
        self,
        numbers: &[u8],
        shape: DrawShape,
        max_picks: usize,
    ) -> Result<(), ValidationError> {
        if !self.requires_numbers() {
            if !numbers.is_empty() {
                return Err(ValidationError::InvalidWagerShape(format!(
                    "{} wagers take no numbers, got {}",
                    self,
                    numbers.len()
                )));
            }
            return Ok(());
        }

        let limit = max_picks.min(MAX_DRAW_SIZE);
        if numbers.is_empty() || numbers.len() > limit {
            return Err(ValidationError::InvalidWagerShape(format!(
                "numbers wagers take 1 to {} picks, got {}",
                limit,
                numbers.len()
            )));
        }

        let mut seen = [false; 256];
        for &n in numbers {
            if n == 0 || n > shape.universe_size {
                return Err(ValidationError::InvalidWagerShape(format!(
                    "number {} outside 1..={}",
                    n, shape.universe_size
                )));
            }
            if seen[n as usize] {
                return Err(ValidationError::InvalidWagerShape(format!(
                    "number {} picked twice",
                    n
                )));
            }
            seen[n as usize] = true;
        }

        Ok(())
    }
}

impl fmt::Display for WagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WagerKind::Numbers => write!(f, "numbers"),
            WagerKind::Big => write!(f, "big"),
            WagerKind::Small => write!(f, "small"),
            WagerKind::Even => write!(f, "even"),
            WagerKind::Odd => write!(f, "odd"),
        }
    }
}

/// Universe and sample size of a draw
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrawShape {
    pub universe_size: u8,
    pub draw_size: u8,
}

impl DrawShape {
    pub fn new(universe_size: u8, draw_size: u8) -> Result<Self, ValidationError> {
        let shape = Self {
            universe_size,
            draw_size,
        };
        shape.validate()?;
        Ok(shape)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.draw_size == 0
            || self.draw_size > self.universe_size
            || self.draw_size as usize > MAX_DRAW_SIZE
        {
            return Err(ValidationError::InvalidDrawShape {
                universe_size: self.universe_size,
                draw_size: self.draw_size,
            });
        }
        Ok(())
    }
}

impl Default for DrawShape {
    fn default() -> Self {
        Self {
            universe_size: 80,
            draw_size: 20,
        }
    }
}

/// Drawn numbers, distinct and ascending
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct Outcome(Vec<u8>);

impl Outcome {
    /// Validate a caller-supplied draw against the game's shape
    pub fn new(mut numbers: Vec<u8>, shape: DrawShape) -> Result<Self, ValidationError> {
        if numbers.len() != shape.draw_size as usize {
            return Err(ValidationError::InvalidOutcome(format!(
                "expected {} numbers, got {}",
                shape.draw_size,
                numbers.len()
            )));
        }
        numbers.sort_unstable();
        if let Some(&n) = numbers.iter().find(|&&n| n == 0 || n > shape.universe_size) {
            return Err(ValidationError::InvalidOutcome(format!(
                "number {} outside 1..={}",
                n, shape.universe_size
            )));
        }
        if numbers.windows(2).any(|w| w[0] == w[1]) {
            return Err(ValidationError::InvalidOutcome(
                "drawn numbers must be distinct".to_string(),
            ));
        }
        Ok(Self(numbers))
    }

    /// Wrap numbers already known to be distinct; sorts them
    pub(crate) fn from_distinct(mut numbers: Vec<u8>) -> Self {
        numbers.sort_unstable();
        Self(numbers)
    }

    pub fn numbers(&self) -> &[u8] {
        &self.0
    }

    pub fn contains(&self, number: u8) -> bool {
        self.0.binary_search(&number).is_ok()
    }

    pub fn sum(&self) -> u32 {
        self.0.iter().map(|&n| n as u32).sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<u8>> for Outcome {
    type Error = ValidationError;

    fn try_from(mut numbers: Vec<u8>) -> Result<Self, Self::Error> {
        numbers.sort_unstable();
        if numbers.first() == Some(&0) || numbers.windows(2).any(|w| w[0] == w[1]) {
            return Err(ValidationError::InvalidOutcome(
                "stored outcome is not a set of positive numbers".to_string(),
            ));
        }
        Ok(Self(numbers))
    }
}

impl From<Outcome> for Vec<u8> {
    fn from(outcome: Outcome) -> Self {
        outcome.0
    }
}

/// Where a game's outcome came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeOrigin {
    Generated,
    Forced,
}

/// Verifiable draw evidence (hex encoded)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrawProof {
    pub public_key: String,
    pub signature: String,
    pub output: String,
    pub input_message: String,
}

/// Payout multiplier in basis points (10_000 = 1x)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(transparent)]
pub struct Multiplier(u32);

impl Multiplier {
    pub const BPS_PER_UNIT: u32 = 10_000;
    pub const ZERO: Multiplier = Multiplier(0);

    pub const fn from_bps(bps: u32) -> Self {
        Self(bps)
    }

    pub const fn whole(units: u32) -> Self {
        Self(units * Self::BPS_PER_UNIT)
    }

    pub fn bps(self) -> u32 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// stake × multiplier, rounded down to whole minor units
    pub fn apply(self, stake: Amount) -> Amount {
        let scaled = stake as u128 * self.0 as u128 / Self::BPS_PER_UNIT as u128;
        scaled.min(Amount::MAX as u128) as Amount
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / Self::BPS_PER_UNIT;
        let frac = self.0 % Self::BPS_PER_UNIT;
        if frac == 0 {
            write!(f, "{}x", whole)
        } else {
            let frac = format!("{:04}", frac);
            write!(f, "{}.{}x", whole, frac.trim_end_matches('0'))
        }
    }
}

/// How sum wagers treat a draw sum exactly at the threshold
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SumBoundary {
    /// Big wins at sum >= threshold, small only below it
    #[default]
    Exclusive,
    /// Both big and small win at sum == threshold
    BothWin,
}

/// Multipliers for the outcome-category wagers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryPayouts {
    pub big: Multiplier,
    pub small: Multiplier,
    pub even: Multiplier,
    pub odd: Multiplier,
}

impl CategoryPayouts {
    pub fn uniform(multiplier: Multiplier) -> Self {
        Self {
            big: multiplier,
            small: multiplier,
            even: multiplier,
            odd: multiplier,
        }
    }
}

impl Default for CategoryPayouts {
    fn default() -> Self {
        Self::uniform(Multiplier::from_bps(19_500))
    }
}

/// Typed payout table: match count index plus category multipliers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayoutTable {
    /// Multiplier for 0..=20 matched numbers
    pub matches: [Multiplier; MAX_DRAW_SIZE + 1],
    pub categories: CategoryPayouts,
    pub sum_threshold: u32,
    #[serde(default)]
    pub sum_boundary: SumBoundary,
}

impl PayoutTable {
    /// Build from (match count, multiplier) pairs; unlisted counts pay nothing
    pub fn from_matches(entries: &[(usize, Multiplier)]) -> Result<Self, ValidationError> {
        let mut matches = [Multiplier::ZERO; MAX_DRAW_SIZE + 1];
        for &(count, multiplier) in entries {
            if count > MAX_DRAW_SIZE {
                return Err(ValidationError::InvalidPayoutTable(format!(
                    "match count {} exceeds {}",
                    count, MAX_DRAW_SIZE
                )));
            }
            matches[count] = multiplier;
        }
        Ok(Self {
            matches,
            ..Self::default()
        })
    }

    pub fn with_categories(mut self, categories: CategoryPayouts) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_sum_threshold(mut self, threshold: u32, boundary: SumBoundary) -> Self {
        self.sum_threshold = threshold;
        self.sum_boundary = boundary;
        self
    }

    pub fn for_matches(&self, matched_count: usize) -> Multiplier {
        self.matches
            .get(matched_count)
            .copied()
            .unwrap_or(Multiplier::ZERO)
    }

    pub fn validate(&self, shape: DrawShape) -> Result<(), ValidationError> {
        let max_sum: u32 = (0..shape.draw_size as u32)
            .map(|i| shape.universe_size as u32 - i)
            .sum();
        if self.sum_threshold == 0 || self.sum_threshold > max_sum {
            return Err(ValidationError::InvalidPayoutTable(format!(
                "sum threshold {} outside 1..={}",
                self.sum_threshold, max_sum
            )));
        }
        Ok(())
    }
}

impl Default for PayoutTable {
    fn default() -> Self {
        Self {
            matches: [Multiplier::ZERO; MAX_DRAW_SIZE + 1],
            categories: CategoryPayouts::default(),
            sum_threshold: 810,
            sum_boundary: SumBoundary::Exclusive,
        }
    }
}

/// Inclusive stake limits
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StakeBounds {
    pub min: Amount,
    pub max: Amount,
}

impl StakeBounds {
    pub fn new(min: Amount, max: Amount) -> Result<Self, ValidationError> {
        if min == 0 || min > max {
            return Err(ValidationError::InvalidStakeBounds { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn check(&self, stake: Amount) -> Result<(), ValidationError> {
        if stake < self.min || stake > self.max {
            return Err(ValidationError::StakeOutOfBounds {
                stake,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// Per-game totals, recomputed from the wager set at settlement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GameAggregates {
    pub wager_count: u64,
    pub stake_total: Amount,
    pub payout_total: Amount,
}

impl GameAggregates {
    /// Full recomputation; voided wagers are excluded
    pub fn from_wagers<'a>(wagers: impl IntoIterator<Item = &'a Wager>) -> Self {
        wagers
            .into_iter()
            .filter(|w| w.state != SettlementState::Voided)
            .fold(Self::default(), |mut acc, w| {
                acc.wager_count += 1;
                acc.stake_total = acc.stake_total.saturating_add(w.stake);
                if w.state == SettlementState::Won {
                    acc.payout_total = acc.payout_total.saturating_add(w.payout_amount);
                }
                acc
            })
    }
}

/// A timed draw
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Game {
    pub id: GameId,
    pub kind: String,
    pub label: String,
    pub draw: DrawShape,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub state: GameState,
    pub outcome: Option<Outcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_origin: Option<OutcomeOrigin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draw_proof: Option<DrawProof>,
    pub stake_bounds: StakeBounds,
    pub payout_table: PayoutTable,
    pub aggregates: GameAggregates,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
}

/// Operator input for creating a game
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGame {
    pub kind: String,
    pub label: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub stake_bounds: StakeBounds,
    pub payout_table: PayoutTable,
    #[serde(default)]
    pub draw: DrawShape,
}

/// A stake placed against a game's future outcome
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wager {
    pub id: WagerId,
    pub game_id: GameId,
    pub owner_id: OwnerId,
    pub kind: WagerKind,
    pub chosen_numbers: Vec<u8>,
    pub stake: Amount,
    pub state: SettlementState,
    pub matched_numbers: Vec<u8>,
    pub matched_count: u8,
    pub applied_multiplier: Multiplier,
    pub payout_amount: Amount,
    pub placed_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Request to place a wager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerRequest {
    pub owner_id: OwnerId,
    pub game_id: GameId,
    pub kind: WagerKind,
    #[serde(default)]
    pub numbers: Vec<u8>,
    pub stake: Amount,
}
