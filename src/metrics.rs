//! Engine counters and Prometheus text export

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct EngineMetrics {
    start_time: Instant,
    pub games_created: AtomicU64,
    pub games_settled: AtomicU64,
    pub games_cancelled: AtomicU64,
    pub wagers_placed: AtomicU64,
    pub wagers_cancelled: AtomicU64,
    pub wagers_settled: AtomicU64,
    pub wagers_won: AtomicU64,
    pub stake_total: AtomicU64,
    pub payout_total: AtomicU64,
    pub ticks: AtomicU64,
    pub tick_failures: AtomicU64,
    pub persistence_escalations: AtomicU64,
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub games_created: u64,
    pub games_settled: u64,
    pub games_cancelled: u64,
    pub wagers_placed: u64,
    pub wagers_cancelled: u64,
    pub wagers_settled: u64,
    pub wagers_won: u64,
    pub stake_total: u64,
    pub payout_total: u64,
    pub ticks: u64,
    pub tick_failures: u64,
    pub persistence_escalations: u64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            games_created: AtomicU64::new(0),
            games_settled: AtomicU64::new(0),
            games_cancelled: AtomicU64::new(0),
            wagers_placed: AtomicU64::new(0),
            wagers_cancelled: AtomicU64::new(0),
            wagers_settled: AtomicU64::new(0),
            wagers_won: AtomicU64::new(0),
            stake_total: AtomicU64::new(0),
            payout_total: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            tick_failures: AtomicU64::new(0),
            persistence_escalations: AtomicU64::new(0),
        }
    }

    pub fn record_wager_placed(&self, stake: u64) {
        self.wagers_placed.fetch_add(1, Ordering::Relaxed);
        self.stake_total.fetch_add(stake, Ordering::Relaxed);
    }

    pub fn record_wager_cancelled(&self, stake: u64) {
        self.wagers_cancelled.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .stake_total
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(stake)));
    }

    pub fn record_wager_settled(&self, payout: Option<u64>) {
        self.wagers_settled.fetch_add(1, Ordering::Relaxed);
        if let Some(payout) = payout {
            self.wagers_won.fetch_add(1, Ordering::Relaxed);
            self.payout_total.fetch_add(payout, Ordering::Relaxed);
        }
    }

    pub fn record_tick(&self, failures: usize) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.tick_failures.fetch_add(failures as u64, Ordering::Relaxed);
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_seconds: self.uptime().as_secs(),
            games_created: self.games_created.load(Ordering::Relaxed),
            games_settled: self.games_settled.load(Ordering::Relaxed),
            games_cancelled: self.games_cancelled.load(Ordering::Relaxed),
            wagers_placed: self.wagers_placed.load(Ordering::Relaxed),
            wagers_cancelled: self.wagers_cancelled.load(Ordering::Relaxed),
            wagers_settled: self.wagers_settled.load(Ordering::Relaxed),
            wagers_won: self.wagers_won.load(Ordering::Relaxed),
            stake_total: self.stake_total.load(Ordering::Relaxed),
            payout_total: self.payout_total.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            tick_failures: self.tick_failures.load(Ordering::Relaxed),
            persistence_escalations: self.persistence_escalations.load(Ordering::Relaxed),
        }
    }

    /// Export in Prometheus text exposition format
    pub fn to_prometheus_format(&self) -> String {
        let s = self.snapshot();
        let mut output = String::new();

        let series: [(&str, &str, &str, u64); 13] = [
            ("drawhouse_uptime_seconds", "gauge", "Seconds since the engine started", s.uptime_seconds),
            ("drawhouse_games_created_total", "counter", "Games created", s.games_created),
            ("drawhouse_games_settled_total", "counter", "Games settled", s.games_settled),
            ("drawhouse_games_cancelled_total", "counter", "Games cancelled", s.games_cancelled),
            ("drawhouse_wagers_placed_total", "counter", "Wagers admitted", s.wagers_placed),
            ("drawhouse_wagers_cancelled_total", "counter", "Wagers voided by their owner", s.wagers_cancelled),
            ("drawhouse_wagers_settled_total", "counter", "Wagers moved to won or lost", s.wagers_settled),
            ("drawhouse_wagers_won_total", "counter", "Winning wagers", s.wagers_won),
            ("drawhouse_stake_total", "gauge", "Stake admitted net of cancellations, minor units", s.stake_total),
            ("drawhouse_payout_total", "counter", "Payouts credited in minor units", s.payout_total),
            ("drawhouse_ticks_total", "counter", "Scheduler ticks", s.ticks),
            ("drawhouse_tick_failures_total", "counter", "Per-game failures during ticks", s.tick_failures),
            ("drawhouse_persistence_escalations_total", "counter", "Writes that exhausted retries", s.persistence_escalations),
        ];

        for (name, kind, help, value) in series {
            output.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n\n"
            ));
        }

        output
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
