//! Strategy store: the read side of adaptive sampling
//!
//! Runs on every node regardless of leadership. Keeps the latest published
//! probabilities in a local cache and answers strategy requests from it; if
//! the store becomes unreachable the last-known-good cache keeps serving.

use crate::common::{Options, Result, SamplerMetrics, SamplingStore};
use crate::coordinator::election::Election;
use crate::sampling::model::{
    OperationSamplingStrategy, PerOperationSamplingStrategies, ProbabilisticSamplingStrategy,
    SamplingStrategyResponse, SamplingStrategyType, ServiceOperationProbabilities,
};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct StrategyStore {
    options: Options,
    election: Arc<dyn Election>,
    store: Arc<dyn SamplingStore>,
    cache: RwLock<ServiceOperationProbabilities>,
    metrics: Arc<SamplerMetrics>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StrategyStore {
    pub fn new(
        options: Options,
        election: Arc<dyn Election>,
        store: Arc<dyn SamplingStore>,
        metrics: Arc<SamplerMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            options,
            election,
            store,
            cache: RwLock::new(ServiceOperationProbabilities::new()),
            metrics,
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Reload the cache from the store. On failure the cache is untouched.
    pub async fn refresh(&self) -> Result<()> {
        match self.store.get_latest_probabilities().await {
            Ok(probabilities) => {
                *self.cache.write().unwrap_or_else(PoisonError::into_inner) = probabilities;
                self.metrics.cache_refreshes.inc();
                Ok(())
            }
            Err(e) => {
                self.metrics.cache_refresh_errors.inc();
                Err(e)
            }
        }
    }

    /// Refresh now, then every `follower_lease_refresh_interval` until the
    /// store's token fires.
    pub fn start(self: &Arc<Self>) {
        let strategies = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let interval = self.options.follower_lease_refresh_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    res = strategies.refresh() => {
                        if let Err(e) = res {
                            tracing::warn!("Serving cached strategies, refresh failed: {}", e);
                        }
                    }
                }
            }
            tracing::debug!("Strategy store stopped");
        });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub async fn close(&self) {
        self.shutdown.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Whether this node is currently the one computing strategies
    pub fn is_leader(&self) -> bool {
        self.election.is_leader()
    }

    /// Snapshot of the cached probabilities
    pub fn cached(&self) -> ServiceOperationProbabilities {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Strategy for `service` from the cache
    pub fn get_sampling_strategy(&self, service: &str) -> SamplingStrategyResponse {
        self.metrics.strategy_requests.inc();
        let default_probability = self.options.initial_sampling_probability;

        let mut per_operation: Vec<OperationSamplingStrategy> = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service)
            .map(|ops| {
                ops.iter()
                    .map(|(operation, probability)| OperationSamplingStrategy {
                        operation: operation.clone(),
                        probabilistic_sampling: ProbabilisticSamplingStrategy {
                            sampling_rate: *probability,
                        },
                    })
                    .collect()
            })
            .unwrap_or_default();
        per_operation.sort_by(|a, b| a.operation.cmp(&b.operation));

        SamplingStrategyResponse {
            strategy_type: SamplingStrategyType::Probabilistic,
            probabilistic_sampling: ProbabilisticSamplingStrategy {
                sampling_rate: default_probability,
            },
            operation_sampling: PerOperationSamplingStrategies {
                default_sampling_probability: default_probability,
                default_lower_bound_traces_per_second: self.options.min_samples_per_second,
                per_operation_strategies: per_operation,
            },
        }
    }
}

impl std::fmt::Debug for StrategyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyStore")
            .field("refresh_interval", &self.options.follower_lease_refresh_interval)
            .finish()
    }
}
