//! Data exchanged between the aggregator, the store and clients

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// operation -> sampling probability
pub type OperationProbabilities = HashMap<String, f64>;

/// service -> operation -> sampling probability
pub type ServiceOperationProbabilities = HashMap<String, OperationProbabilities>;

/// Root spans observed for one service/operation during one calculation interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    pub service: String,
    pub operation: String,
    pub count: u64,
    /// Probabilities the clients reported sampling with, formatted for stable set membership
    #[serde(default)]
    pub probabilities: BTreeSet<String>,
}

impl Throughput {
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            count: 0,
            probabilities: BTreeSet::new(),
        }
    }
}

/// Probabilities written by a leader, as persisted in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilitiesRecord {
    pub hostname: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub probabilities: ServiceOperationProbabilities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SamplingStrategyType {
    Probabilistic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbabilisticSamplingStrategy {
    pub sampling_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSamplingStrategy {
    pub operation: String,
    pub probabilistic_sampling: ProbabilisticSamplingStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerOperationSamplingStrategies {
    pub default_sampling_probability: f64,
    pub default_lower_bound_traces_per_second: f64,
    pub per_operation_strategies: Vec<OperationSamplingStrategy>,
}

/// Strategy document served to tracing clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingStrategyResponse {
    pub strategy_type: SamplingStrategyType,
    pub probabilistic_sampling: ProbabilisticSamplingStrategy,
    pub operation_sampling: PerOperationSamplingStrategies,
}

impl SamplingStrategyResponse {
    /// Sampling rate for `operation`, falling back to the service default
    pub fn rate_for(&self, operation: &str) -> f64 {
        self.operation_sampling
            .per_operation_strategies
            .iter()
            .find(|s| s.operation == operation)
            .map(|s| s.probabilistic_sampling.sampling_rate)
            .unwrap_or(self.operation_sampling.default_sampling_probability)
    }
}
