//! Adaptive sampling workers
//!
//! - `Aggregator`: counts throughput on every node, computes and publishes
//!   probabilities on the leader
//! - `StrategyStore`: serves the latest published probabilities on every node

pub mod aggregator;
pub mod calculator;
pub mod model;
pub mod strategy_store;

pub use aggregator::{Aggregator, CycleOutcome};
pub use calculator::{PercentageIncreaseCappedCalculator, ProbabilityCalculator};
pub use model::{SamplingStrategyResponse, ServiceOperationProbabilities, Throughput};
pub use strategy_store::StrategyStore;
