//! Metrics collection
//!
//! Lightweight atomic counters and gauges for the coordination layer,
//! rendered in Prometheus text format by the HTTP API:
//! - Leadership transitions and lock errors from the election loop
//! - Calculation cycles and artifact writes from the aggregator
//! - Cache refreshes and strategy requests from the strategy store

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counter for tracking monotonically increasing counts
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge for tracking current values
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Metrics shared by the participant, the workers and the HTTP API
#[derive(Debug)]
pub struct SamplerMetrics {
    /// Election loop
    pub leader_acquired: Counter,
    pub leader_lost: Counter,
    pub lock_errors: Counter,
    pub is_leader: Gauge,

    /// Aggregator
    pub throughput_recorded: Counter,
    pub calculations: Counter,
    pub probabilities_written: Counter,
    pub aggregator_errors: Counter,

    /// Strategy store
    pub cache_refreshes: Counter,
    pub cache_refresh_errors: Counter,
    pub strategy_requests: Counter,

    start_time: Instant,
}

impl SamplerMetrics {
    pub fn new() -> Self {
        Self {
            leader_acquired: Counter::new(),
            leader_lost: Counter::new(),
            lock_errors: Counter::new(),
            is_leader: Gauge::new(),
            throughput_recorded: Counter::new(),
            calculations: Counter::new(),
            probabilities_written: Counter::new(),
            aggregator_errors: Counter::new(),
            cache_refreshes: Counter::new(),
            cache_refresh_errors: Counter::new(),
            strategy_requests: Counter::new(),
            start_time: Instant::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        let series: [(&str, &str, &str, u64); 11] = [
            (
                "sampler_leader_acquired_total",
                "counter",
                "Times this node acquired the leader lease",
                self.leader_acquired.get(),
            ),
            (
                "sampler_leader_lost_total",
                "counter",
                "Times this node lost or gave up the leader lease",
                self.leader_lost.get(),
            ),
            (
                "sampler_lock_errors_total",
                "counter",
                "Failed lock acquire/renew calls",
                self.lock_errors.get(),
            ),
            (
                "sampler_is_leader",
                "gauge",
                "1 if this node currently holds the leader lease",
                self.is_leader.get(),
            ),
            (
                "sampler_throughput_recorded_total",
                "counter",
                "Root spans counted by the aggregator",
                self.throughput_recorded.get(),
            ),
            (
                "sampler_calculations_total",
                "counter",
                "Probability calculations run as leader",
                self.calculations.get(),
            ),
            (
                "sampler_probabilities_written_total",
                "counter",
                "Probability sets written to the store",
                self.probabilities_written.get(),
            ),
            (
                "sampler_aggregator_errors_total",
                "counter",
                "Failed aggregator cycles",
                self.aggregator_errors.get(),
            ),
            (
                "sampler_cache_refreshes_total",
                "counter",
                "Successful strategy cache refreshes",
                self.cache_refreshes.get(),
            ),
            (
                "sampler_cache_refresh_errors_total",
                "counter",
                "Failed strategy cache refreshes",
                self.cache_refresh_errors.get(),
            ),
            (
                "sampler_strategy_requests_total",
                "counter",
                "Sampling strategies served",
                self.strategy_requests.get(),
            ),
        ];

        for (name, kind, help, value) in series {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} {}", name, kind);
            let _ = writeln!(out, "{} {}", name, value);
        }

        out.push_str("# HELP sampler_uptime_seconds Node uptime in seconds\n");
        out.push_str("# TYPE sampler_uptime_seconds gauge\n");
        let _ = writeln!(out, "sampler_uptime_seconds {}", self.uptime_seconds());

        out
    }
}

impl Default for SamplerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();

        assert_eq!(counter.get(), 0);
        counter.inc();
        assert_eq!(counter.get(), 1);
        counter.inc();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new();

        assert_eq!(gauge.get(), 0);
        gauge.set(1);
        assert_eq!(gauge.get(), 1);
        gauge.set(0);
        assert_eq!(gauge.get(), 0);
    }

    #[test]
    fn test_prometheus_output() {
        let metrics = SamplerMetrics::new();
        metrics.leader_acquired.inc();
        metrics.is_leader.set(1);

        let output = metrics.to_prometheus();
        assert!(output.contains("# TYPE sampler_leader_acquired_total counter"));
        assert!(output.contains("sampler_leader_acquired_total 1"));
        assert!(output.contains("sampler_is_leader 1"));
        assert!(output.contains("sampler_uptime_seconds"));
    }
}
