//! Payout calculation
//!
//! Pure mapping from (wager kind, picks, stake, outcome, table) to the
//! settlement figures stored on a wager. Unknown kinds cannot reach this
//! point since `WagerKind` is closed and validated at intake.

use crate::games::types::{Amount, Multiplier, Outcome, PayoutTable, SumBoundary, WagerKind};
use serde::{Deserialize, Serialize};

/// Result of evaluating one wager against an outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutResult {
    pub matched_numbers: Vec<u8>,
    pub matched_count: u8,
    pub multiplier: Multiplier,
    pub payout_amount: Amount,
    pub won: bool,
}

impl PayoutResult {
    fn category(won: bool, multiplier: Multiplier, stake: Amount) -> Self {
        let multiplier = if won { multiplier } else { Multiplier::ZERO };
        Self {
            matched_numbers: Vec::new(),
            matched_count: 0,
            multiplier,
            payout_amount: multiplier.apply(stake),
            won: won && !multiplier.is_zero(),
        }
    }
}

/// Evaluate a wager against a drawn outcome
pub fn calculate(
    kind: WagerKind,
    chosen_numbers: &[u8],
    stake: Amount,
    outcome: &Outcome,
    table: &PayoutTable,
) -> PayoutResult {
    match kind {
        WagerKind::Numbers => numbers_payout(chosen_numbers, stake, outcome, table),
        WagerKind::Big => {
            PayoutResult::category(is_big(outcome.sum(), table), table.categories.big, stake)
        }
        WagerKind::Small => {
            PayoutResult::category(is_small(outcome.sum(), table), table.categories.small, stake)
        }
        WagerKind::Even => {
            PayoutResult::category(outcome.sum() % 2 == 0, table.categories.even, stake)
        }
        WagerKind::Odd => {
            PayoutResult::category(outcome.sum() % 2 == 1, table.categories.odd, stake)
        }
    }
}

fn numbers_payout(
    chosen_numbers: &[u8],
    stake: Amount,
    outcome: &Outcome,
    table: &PayoutTable,
) -> PayoutResult {
    let mut matched_numbers: Vec<u8> = chosen_numbers
        .iter()
        .copied()
        .filter(|&n| outcome.contains(n))
        .collect();
    matched_numbers.sort_unstable();

    let matched_count = matched_numbers.len();
    let multiplier = table.for_matches(matched_count);
    let won = matched_count > 0 && !multiplier.is_zero();
    let multiplier = if won { multiplier } else { Multiplier::ZERO };

    PayoutResult {
        matched_count: matched_count as u8,
        matched_numbers,
        multiplier,
        payout_amount: multiplier.apply(stake),
        won,
    }
}

fn is_big(sum: u32, table: &PayoutTable) -> bool {
    sum >= table.sum_threshold
}

fn is_small(sum: u32, table: &PayoutTable) -> bool {
    match table.sum_boundary {
        SumBoundary::Exclusive => sum < table.sum_threshold,
        SumBoundary::BothWin => sum <= table.sum_threshold,
    }
}
