//! Configuration for adaptive-sampler nodes

use crate::common::utils::{duration_str, generate_node_id};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix, e.g. `SAMPLER__SAMPLING__AGGREGATION_BUCKETS=4`
pub const ENV_PREFIX: &str = "SAMPLER";

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID, also used as the lock owner identity
    #[serde(default = "generate_node_id")]
    pub node_id: String,

    /// Bind address for the HTTP API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Adaptive sampling options
    #[serde(default)]
    pub sampling: Options,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 14268))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: generate_node_id(),
            bind_addr: default_bind_addr(),
            log_level: default_log_level(),
            sampling: Options::default(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then `SAMPLER__*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.sampling.validate()?;
        Ok(config)
    }
}

/// Adaptive sampling options, an immutable snapshot handed to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Number of throughput buckets the store keeps (store partitioning)
    pub aggregation_buckets: usize,

    /// How often a follower tries to take the lock
    #[serde(with = "duration_str")]
    pub follower_lease_refresh_interval: Duration,

    /// How often the leader renews its lease
    #[serde(with = "duration_str")]
    pub leader_lease_refresh_interval: Duration,

    /// Length of one throughput bucket and of one aggregator cycle
    #[serde(with = "duration_str")]
    pub calculation_interval: Duration,

    /// Number of most recent buckets used per calculation
    pub buckets_for_calculation: usize,

    pub target_samples_per_second: f64,

    /// Relative distance to the target within which probabilities are left alone
    pub delta_tolerance: f64,

    pub initial_sampling_probability: f64,

    pub min_sampling_probability: f64,

    pub min_samples_per_second: f64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            aggregation_buckets: 10,
            follower_lease_refresh_interval: Duration::from_secs(60),
            leader_lease_refresh_interval: Duration::from_secs(5),
            calculation_interval: Duration::from_secs(60),
            buckets_for_calculation: 1,
            target_samples_per_second: 1.0,
            delta_tolerance: 0.3,
            initial_sampling_probability: 0.001,
            min_sampling_probability: 1e-5,
            min_samples_per_second: 1.0 / 60.0,
        }
    }
}

impl Options {
    /// Check the invariants the coordinator relies on
    pub fn validate(&self) -> Result<()> {
        if self.follower_lease_refresh_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "follower_lease_refresh_interval must be > 0".into(),
            ));
        }
        if self.leader_lease_refresh_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "leader_lease_refresh_interval must be > 0".into(),
            ));
        }
        if self.calculation_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "calculation_interval must be > 0".into(),
            ));
        }
        if self.aggregation_buckets == 0 || self.buckets_for_calculation == 0 {
            return Err(Error::InvalidConfig(
                "aggregation_buckets and buckets_for_calculation must be > 0".into(),
            ));
        }
        if self.target_samples_per_second <= 0.0 || self.min_samples_per_second < 0.0 {
            return Err(Error::InvalidConfig(
                "samples per second must be positive".into(),
            ));
        }
        if self.delta_tolerance < 0.0 {
            return Err(Error::InvalidConfig("delta_tolerance must be >= 0".into()));
        }
        for (name, p) in [
            ("initial_sampling_probability", self.initial_sampling_probability),
            ("min_sampling_probability", self.min_sampling_probability),
        ] {
            if !(p > 0.0 && p <= 1.0) {
                return Err(Error::InvalidConfig(format!(
                    "{} must be in (0, 1], got {}",
                    name, p
                )));
            }
        }
        if self.follower_lease_refresh_interval < self.leader_lease_refresh_interval {
            tracing::warn!(
                "follower lease refresh interval ({:?}) is shorter than the leader's ({:?})",
                self.follower_lease_refresh_interval,
                self.leader_lease_refresh_interval
            );
        }
        Ok(())
    }

    /// Throughput window consulted by one calculation
    pub fn calculation_window(&self) -> Duration {
        self.calculation_interval * self.buckets_for_calculation as u32
    }
}
