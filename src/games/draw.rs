//! Outcome generation
//!
//! `draw_numbers` is the pure sampler; `OutcomeSource` is the injectable seam
//! the settlement path draws through.

use crate::errors::EngineResult;
use crate::games::types::{DrawProof, DrawShape, Game, Outcome};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Draw `draw_size` distinct numbers uniformly from `1..=universe_size`, ascending.
///
/// # Panics
///
/// Panics if `draw_size > universe_size`. Shapes are validated when games are
/// created, so reaching this is a programming error.
pub fn draw_numbers<R: Rng + ?Sized>(rng: &mut R, universe_size: u8, draw_size: u8) -> Outcome {
    assert!(
        draw_size <= universe_size,
        "cannot draw {} numbers from a universe of {}",
        draw_size,
        universe_size
    );

    let picks = rand::seq::index::sample(rng, universe_size as usize, draw_size as usize)
        .into_iter()
        .map(|i| (i + 1) as u8)
        .collect();
    Outcome::from_distinct(picks)
}

/// Freshly drawn outcome plus optional evidence
#[derive(Debug, Clone)]
pub struct DrawnOutcome {
    pub outcome: Outcome,
    pub proof: Option<DrawProof>,
}

impl DrawnOutcome {
    pub fn unproven(outcome: Outcome) -> Self {
        Self {
            outcome,
            proof: None,
        }
    }
}

/// Injectable randomness for game outcomes
pub trait OutcomeSource: Send + Sync {
    fn draw(&self, game: &Game) -> EngineResult<DrawnOutcome>;
}

/// Operating system entropy via the thread-local generator
#[derive(Debug, Default, Clone, Copy)]
pub struct EntropyOutcomeSource;

impl OutcomeSource for EntropyOutcomeSource {
    fn draw(&self, game: &Game) -> EngineResult<DrawnOutcome> {
        let DrawShape {
            universe_size,
            draw_size,
        } = game.draw;
        let outcome = draw_numbers(&mut rand::thread_rng(), universe_size, draw_size);
        Ok(DrawnOutcome::unproven(outcome))
    }
}

/// Reproducible sequence of draws from a fixed seed
#[derive(Debug)]
pub struct SeededOutcomeSource {
    rng: Mutex<StdRng>,
}

impl SeededOutcomeSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl OutcomeSource for SeededOutcomeSource {
    fn draw(&self, game: &Game) -> EngineResult<DrawnOutcome> {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let outcome = draw_numbers(&mut *rng, game.draw.universe_size, game.draw.draw_size);
        Ok(DrawnOutcome::unproven(outcome))
    }
}
