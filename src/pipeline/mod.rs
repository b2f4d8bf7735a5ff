//! Batch orchestration and run statistics.

mod orchestrator;
mod stats;

pub use orchestrator::{BatchOrchestrator, RunOptions};
pub use stats::{ItemOutcome, RunStats, Stage};
