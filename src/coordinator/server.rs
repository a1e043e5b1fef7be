//! Coordinator lifecycle
//!
//! `initialize` → `build_workers` → `close`, in that order and once each.
//! Every entry point is fail-stop: after an error nothing it tried to start
//! is left running.

use crate::common::{
    Error, Options, Result, SamplerMetrics, SamplingStore, SamplingStoreFactory,
};
use crate::coordinator::election::{
    Election, ElectionParticipant, ParticipantOptions, DEFAULT_RESOURCE_NAME,
};
use crate::sampling::{Aggregator, StrategyStore};
use std::sync::Arc;

/// Lifecycle state of a coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Unstarted,
    Running,
    Closed,
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorState::Unstarted => write!(f, "unstarted"),
            CoordinatorState::Running => write!(f, "running"),
            CoordinatorState::Closed => write!(f, "closed"),
        }
    }
}

struct Running {
    store: Arc<dyn SamplingStore>,
    participant: Arc<ElectionParticipant>,
    workers: Option<(Arc<Aggregator>, Arc<StrategyStore>)>,
}

enum Lifecycle {
    Unstarted,
    Running(Running),
    Closed,
}

/// Per-process owner of the election participant, the sampling store and
/// the two workers built on them
pub struct Coordinator {
    options: Options,
    node_id: String,
    resource_name: String,
    metrics: Arc<SamplerMetrics>,
    lifecycle: Lifecycle,
}

impl Coordinator {
    pub fn new(options: Options, node_id: impl Into<String>) -> Self {
        Self {
            options,
            node_id: node_id.into(),
            resource_name: DEFAULT_RESOURCE_NAME.to_string(),
            metrics: Arc::new(SamplerMetrics::new()),
            lifecycle: Lifecycle::Unstarted,
        }
    }

    /// Elect on a different lock resource
    pub fn with_resource_name(mut self, resource_name: impl Into<String>) -> Self {
        self.resource_name = resource_name.into();
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn metrics(&self) -> Arc<SamplerMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn state(&self) -> CoordinatorState {
        match self.lifecycle {
            Lifecycle::Unstarted => CoordinatorState::Unstarted,
            Lifecycle::Running(_) => CoordinatorState::Running,
            Lifecycle::Closed => CoordinatorState::Closed,
        }
    }

    pub fn participant(&self) -> Option<Arc<ElectionParticipant>> {
        match &self.lifecycle {
            Lifecycle::Running(running) => Some(Arc::clone(&running.participant)),
            _ => None,
        }
    }

    pub fn store(&self) -> Option<Arc<dyn SamplingStore>> {
        match &self.lifecycle {
            Lifecycle::Running(running) => Some(Arc::clone(&running.store)),
            _ => None,
        }
    }

    /// Create the lock and store through `factory` and start the election.
    ///
    /// A missing factory is a configuration error. Construction errors from
    /// the factory are returned as-is and leave the coordinator unstarted.
    pub async fn initialize(&mut self, factory: Option<&dyn SamplingStoreFactory>) -> Result<()> {
        if !matches!(self.lifecycle, Lifecycle::Unstarted) {
            return Err(Error::InvalidState(format!(
                "initialize called on a {} coordinator",
                self.state()
            )));
        }
        let factory = factory.ok_or(Error::NoBackend)?;
        self.options.validate()?;

        let lock = factory.create_lock().await?;
        let store = factory
            .create_sampling_store(self.options.aggregation_buckets)
            .await?;

        let participant = Arc::new(ElectionParticipant::new(
            lock,
            self.resource_name.clone(),
            ParticipantOptions::from(&self.options),
            Arc::clone(&self.metrics),
        ));
        participant.start();

        tracing::info!("Coordinator {} initialized", self.node_id);
        tracing::info!("  Lock resource: {}", self.resource_name);
        tracing::info!(
            "  Lease refresh: leader {:?}, follower {:?}",
            self.options.leader_lease_refresh_interval,
            self.options.follower_lease_refresh_interval
        );
        tracing::info!("  Aggregation buckets: {}", self.options.aggregation_buckets);

        self.lifecycle = Lifecycle::Running(Running {
            store,
            participant,
            workers: None,
        });
        Ok(())
    }

    /// Build and start the aggregator and the strategy store.
    ///
    /// Both are constructed before either is started, so a construction
    /// failure starts nothing.
    pub fn build_workers(&mut self) -> Result<(Arc<Aggregator>, Arc<StrategyStore>)> {
        let state = self.state();
        let running = match &mut self.lifecycle {
            Lifecycle::Running(running) => running,
            _ => {
                return Err(Error::InvalidState(format!(
                    "build_workers called on a {} coordinator",
                    state
                )))
            }
        };
        if running.workers.is_some() {
            return Err(Error::InvalidState("workers already built".into()));
        }

        let election: Arc<dyn Election> = running.participant.clone();
        let strategies = Arc::new(StrategyStore::new(
            self.options.clone(),
            Arc::clone(&election),
            Arc::clone(&running.store),
            Arc::clone(&self.metrics),
            running.participant.child_token(),
        ));
        let aggregator = Arc::new(Aggregator::new(
            self.options.clone(),
            self.node_id.clone(),
            election,
            Arc::clone(&running.store),
            Arc::clone(&self.metrics),
            running.participant.child_token(),
        )?);

        strategies.start();
        aggregator.start();
        tracing::info!("✓ Sampling workers started on {}", self.node_id);

        running.workers = Some((Arc::clone(&aggregator), Arc::clone(&strategies)));
        Ok((aggregator, strategies))
    }

    /// Close the election participant, then wait for the workers, which
    /// stand down with it.
    pub async fn close(&mut self) -> Result<()> {
        let running = match std::mem::replace(&mut self.lifecycle, Lifecycle::Closed) {
            Lifecycle::Running(running) => running,
            other => {
                let state = match other {
                    Lifecycle::Unstarted => CoordinatorState::Unstarted,
                    _ => CoordinatorState::Closed,
                };
                self.lifecycle = other;
                return Err(Error::InvalidState(format!(
                    "close called on a {} coordinator",
                    state
                )));
            }
        };

        let result = running.participant.close().await;
        if let Some((aggregator, strategies)) = running.workers {
            aggregator.close().await;
            strategies.close().await;
        }
        match &result {
            Ok(()) => tracing::info!("Coordinator {} closed", self.node_id),
            Err(e) => tracing::error!("Coordinator {} closed with error: {}", self.node_id, e),
        }
        result
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("node_id", &self.node_id)
            .field("resource_name", &self.resource_name)
            .field("state", &self.state())
            .finish()
    }
}
