//! End-to-End Scenario for Spindle
//!
//! Four constant workers, a coordinator calling them concurrently each
//! round, and an accumulator summing the rounds it receives over a channel.

pub mod blueprints;
pub mod scenario;

pub use blueprints::{Accumulator, AccumulatorClient, Coordinator, Four, One, Three, Two};
pub use scenario::{expected_total, registry, run_rounds, ScenarioReport, DEFAULT_ROUNDS};
