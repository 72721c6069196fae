pub mod draw;
pub mod intake;
pub mod lifecycle;
pub mod locks;
pub mod payout;
pub mod settlement;
pub mod types;
pub mod vrf_engine;

pub use draw::{DrawnOutcome, EntropyOutcomeSource, OutcomeSource, SeededOutcomeSource};
pub use intake::WagerIntake;
pub use lifecycle::GameLifecycle;
pub use locks::GameLocks;
pub use settlement::{OutcomeResolution, SettlementCoordinator, SettlementSummary};
pub use types::*;
pub use vrf_engine::{verify_draw, VrfOutcomeSource};
