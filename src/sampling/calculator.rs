//! Sampling probability calculation
//!
//! Given the observed QPS of an operation and the probability it was sampled
//! with, pick the probability that brings sampled QPS to the target.

use crate::common::Options;
use crate::sampling::model::{ServiceOperationProbabilities, Throughput};
use std::collections::HashMap;
use std::time::Duration;

/// Default cap on how fast a probability may grow in one calculation
pub const DEFAULT_PERCENTAGE_INCREASE_CAP: f64 = 0.5;

pub trait ProbabilityCalculator: Send + Sync {
    fn calculate(&self, target_qps: f64, current_qps: f64, previous_probability: f64) -> f64;
}

/// Moves straight down when oversampling, but grows by at most
/// `percentage_increase_cap` per calculation when undersampling so a traffic
/// dip does not flood the backend once traffic returns.
#[derive(Debug, Clone, Copy)]
pub struct PercentageIncreaseCappedCalculator {
    percentage_increase_cap: f64,
}

impl PercentageIncreaseCappedCalculator {
    pub fn new(percentage_increase_cap: f64) -> Self {
        let cap = if percentage_increase_cap > 0.0 {
            percentage_increase_cap
        } else {
            DEFAULT_PERCENTAGE_INCREASE_CAP
        };
        Self {
            percentage_increase_cap: cap,
        }
    }
}

impl Default for PercentageIncreaseCappedCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_PERCENTAGE_INCREASE_CAP)
    }
}

impl ProbabilityCalculator for PercentageIncreaseCappedCalculator {
    fn calculate(&self, target_qps: f64, current_qps: f64, previous_probability: f64) -> f64 {
        let factor = target_qps / current_qps;
        let new_probability = previous_probability * factor;
        if factor > 1.0 {
            let percent_increase = (new_probability - previous_probability) / previous_probability;
            if percent_increase > self.percentage_increase_cap {
                return previous_probability + previous_probability * self.percentage_increase_cap;
            }
        }
        new_probability
    }
}

/// Observed QPS per service/operation over `window`
pub fn throughput_to_qps(
    throughput: &[Throughput],
    window: Duration,
) -> HashMap<String, HashMap<String, f64>> {
    let mut counts: HashMap<String, HashMap<String, u64>> = HashMap::new();
    for t in throughput {
        *counts
            .entry(t.service.clone())
            .or_default()
            .entry(t.operation.clone())
            .or_default() += t.count;
    }

    let secs = window.as_secs_f64().max(f64::EPSILON);
    counts
        .into_iter()
        .map(|(service, ops)| {
            let ops = ops
                .into_iter()
                .map(|(op, count)| (op, count as f64 / secs))
                .collect();
            (service, ops)
        })
        .collect()
}

/// Compute the next probabilities from observed throughput and the previous
/// probabilities.
///
/// Operations within `delta_tolerance` of the target, or with no traffic,
/// keep their previous probability. Operations known previously but absent
/// from `throughput` are carried over unchanged.
pub fn calculate_probabilities(
    options: &Options,
    calculator: &dyn ProbabilityCalculator,
    throughput: &[Throughput],
    previous: &ServiceOperationProbabilities,
) -> ServiceOperationProbabilities {
    let qps = throughput_to_qps(throughput, options.calculation_window());
    let target = options.target_samples_per_second;
    let mut result = previous.clone();

    for (service, ops) in qps {
        let service_probabilities = result.entry(service).or_default();
        for (operation, current_qps) in ops {
            let previous_probability = service_probabilities
                .get(&operation)
                .copied()
                .unwrap_or(options.initial_sampling_probability);

            let within_tolerance = ((current_qps - target).abs() / target) < options.delta_tolerance;
            let probability = if current_qps <= 0.0 || within_tolerance {
                previous_probability
            } else {
                calculator.calculate(target, current_qps, previous_probability)
            };

            service_probabilities.insert(
                operation,
                probability.clamp(options.min_sampling_probability, 1.0),
            );
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throughput(service: &str, operation: &str, count: u64) -> Throughput {
        Throughput {
            count,
            ..Throughput::new(service, operation)
        }
    }

    fn options() -> Options {
        Options {
            calculation_interval: Duration::from_secs(10),
            buckets_for_calculation: 1,
            target_samples_per_second: 1.0,
            delta_tolerance: 0.1,
            initial_sampling_probability: 0.1,
            min_sampling_probability: 0.001,
            ..Default::default()
        }
    }

    #[test]
    fn test_calculator_decreases_directly() {
        let calc = PercentageIncreaseCappedCalculator::default();
        // 4x oversampling: probability drops to a quarter
        let p = calc.calculate(1.0, 4.0, 0.4);
        assert!((p - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_calculator_caps_increase() {
        let calc = PercentageIncreaseCappedCalculator::default();
        // 10x undersampling: growth capped at +50%
        let p = calc.calculate(1.0, 0.1, 0.1);
        assert!((p - 0.15).abs() < 1e-9);

        // small increase passes through
        let p = calc.calculate(1.0, 0.8, 0.1);
        assert!((p - 0.125).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_cap_uses_default() {
        let calc = PercentageIncreaseCappedCalculator::new(0.0);
        let p = calc.calculate(1.0, 0.1, 0.1);
        assert!((p - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_throughput_to_qps_sums_buckets() {
        let qps = throughput_to_qps(
            &[
                throughput("api", "GET", 50),
                throughput("api", "GET", 50),
                throughput("db", "query", 10),
            ],
            Duration::from_secs(10),
        );
        assert_eq!(qps["api"]["GET"], 10.0);
        assert_eq!(qps["db"]["query"], 1.0);
    }

    #[test]
    fn test_calculate_probabilities() {
        let opts = options();
        let calc = PercentageIncreaseCappedCalculator::default();

        let mut previous = ServiceOperationProbabilities::new();
        previous
            .entry("api".into())
            .or_default()
            .insert("idle".into(), 0.3);

        let result = calculate_probabilities(
            &opts,
            &calc,
            &[
                // 20 qps sampled at the initial 0.1 -> 0.1 / 20
                throughput("api", "hot", 200),
                // 1 qps is on target
                throughput("api", "steady", 10),
            ],
            &previous,
        );

        assert!((result["api"]["hot"] - 0.005).abs() < 1e-9);
        assert_eq!(result["api"]["steady"], 0.1);
        // no traffic in the window: carried over
        assert_eq!(result["api"]["idle"], 0.3);
    }

    #[test]
    fn test_probabilities_are_clamped() {
        let opts = options();
        let calc = PercentageIncreaseCappedCalculator::default();

        let mut previous = ServiceOperationProbabilities::new();
        previous
            .entry("api".into())
            .or_default()
            .insert("cold".into(), 0.9);

        let result = calculate_probabilities(
            &opts,
            &calc,
            &[
                throughput("api", "flood", 1_000_000),
                throughput("api", "cold", 1),
            ],
            &previous,
        );

        assert_eq!(result["api"]["flood"], opts.min_sampling_probability);
        assert_eq!(result["api"]["cold"], 1.0);
    }
}
