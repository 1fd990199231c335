//! Scoring Engine (C5) — turns raw market data into a signal with confidence, TP/SL and
//! reasoning, §4.6. `dimensions` computes the fourteen named votes; `engine` aggregates them,
//! builds the trading plan, and optionally asks the Knowledge Provider for a bounded adjustment.

pub mod dimensions;
pub mod engine;
pub mod weights;

pub use dimensions::DimensionOutput;
pub use engine::{ScoringEngine, ScoringThresholds};
pub use weights::ScoringWeights;
