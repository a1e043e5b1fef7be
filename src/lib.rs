//! # adaptive-sampler
//!
//! A leader-elected adaptive sampling service:
//! - Lease-based leader election over a pluggable distributed lock
//! - Exactly one node (ideally) computes sampling probabilities
//! - Every node serves the last published probabilities from a local cache
//! - Deterministic startup, failover and shutdown through one `Coordinator`
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            Lock backend + Sampling store     │
//! │   (shared by every node in the cluster)      │
//! └───────────┬──────────────────────────────────┘
//!             │ acquire / renew / release, read / write
//!   ┌─────────┴──────────┬──────────────────┐
//!   │                    │                  │
//! ┌─▼──────────┐   ┌─────▼──────┐   ┌──────▼─────┐
//! │ Node 1     │   │ Node 2     │   │ Node 3     │
//! │ (leader)   │   │ (follower) │   │ (follower) │
//! │ aggregator │   │ aggregator │   │ aggregator │
//! │ strategies │   │ strategies │   │ strategies │
//! └────────────┘   └────────────┘   └────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! ```no_run
//! use adaptive_sampler::{Coordinator, MemoryBackend, Options};
//!
//! # async fn run() -> adaptive_sampler::Result<()> {
//! let backend = MemoryBackend::new();
//! let factory = backend.factory("node-1");
//!
//! let mut coordinator = Coordinator::new(Options::default(), "node-1");
//! coordinator.initialize(Some(&factory)).await?;
//! let (aggregator, strategies) = coordinator.build_workers()?;
//!
//! aggregator.record_throughput("frontend", "GET /", 1.0);
//! let strategy = strategies.get_sampling_strategy("frontend");
//! # let _ = strategy;
//!
//! coordinator.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod coordinator;
pub mod sampling;

// Re-export commonly used types
pub use common::{
    Config, DistributedLock, Error, MemoryBackend, Options, Result, SamplingStore,
    SamplingStoreFactory,
};
pub use coordinator::{Coordinator, CoordinatorState, Election, ElectionParticipant};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
