//! Throughput aggregator: the write side of adaptive sampling
//!
//! Every node counts the root spans it sees and flushes the counts to the
//! store once per calculation interval. Only the node that believes it is
//! leader at the start of a cycle turns the stored throughput into new
//! probabilities and publishes them. Followers keep their local copy in step
//! with what the leader published, so whoever leads next continues from it.

use crate::common::{Error, Options, Result, SamplerMetrics, SamplingStore};
use crate::coordinator::election::Election;
use crate::sampling::calculator::{
    calculate_probabilities, PercentageIncreaseCappedCalculator, ProbabilityCalculator,
};
use crate::sampling::model::{ServiceOperationProbabilities, Throughput};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What one aggregator cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Not leader at cycle start; throughput flushed only
    Follower,
    /// Leader; probabilities published for this many services
    Computed { services: usize },
}

type ThroughputKey = (String, String);

pub struct Aggregator {
    options: Options,
    hostname: String,
    election: Arc<dyn Election>,
    store: Arc<dyn SamplingStore>,
    calculator: Box<dyn ProbabilityCalculator>,
    current: Mutex<HashMap<ThroughputKey, Throughput>>,
    probabilities: Mutex<ServiceOperationProbabilities>,
    /// Leadership seen by the previous cycle
    was_leader: AtomicBool,
    metrics: Arc<SamplerMetrics>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Aggregator {
    /// Fails on options the calculation cannot run with; nothing is started.
    pub fn new(
        options: Options,
        hostname: impl Into<String>,
        election: Arc<dyn Election>,
        store: Arc<dyn SamplingStore>,
        metrics: Arc<SamplerMetrics>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        options.validate()?;
        let hostname = hostname.into();
        if hostname.is_empty() {
            return Err(Error::InvalidConfig("aggregator hostname is empty".into()));
        }
        Ok(Self {
            options,
            hostname,
            election,
            store,
            calculator: Box::new(PercentageIncreaseCappedCalculator::default()),
            current: Mutex::new(HashMap::new()),
            probabilities: Mutex::new(ServiceOperationProbabilities::new()),
            was_leader: AtomicBool::new(false),
            metrics,
            shutdown,
            task: Mutex::new(None),
        })
    }

    /// Count one root span sampled with `probability`
    pub fn record_throughput(&self, service: &str, operation: &str, probability: f64) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = current
            .entry((service.to_string(), operation.to_string()))
            .or_insert_with(|| Throughput::new(service, operation));
        entry.count += 1;
        entry.probabilities.insert(format!("{:.6}", probability));
        self.metrics.throughput_recorded.inc();
    }

    /// Probabilities this node last computed as leader
    pub fn probabilities(&self) -> ServiceOperationProbabilities {
        self.probabilities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// One work cycle. Leadership is read once, before any work.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        self.flush_throughput().await?;

        let is_leader = self.election.is_leader();
        let was_leader = self.was_leader.swap(is_leader, Ordering::SeqCst);
        if !is_leader {
            let published = self.store.get_latest_probabilities().await?;
            self.set_probabilities(published);
            return Ok(CycleOutcome::Follower);
        }

        let end = Utc::now();
        let window = chrono::Duration::from_std(self.options.calculation_window())
            .map_err(|e| Error::InvalidConfig(format!("calculation window: {}", e)))?;
        let throughput = self.store.get_throughput(end - window, end).await?;

        let previous = self.previous_probabilities(was_leader).await?;
        let next = calculate_probabilities(
            &self.options,
            self.calculator.as_ref(),
            &throughput,
            &previous,
        );
        self.metrics.calculations.inc();

        self.store.insert_probabilities(&self.hostname, &next).await?;
        self.metrics.probabilities_written.inc();
        let services = next.len();
        self.set_probabilities(next);

        tracing::debug!(
            "Published probabilities for {} services from {} throughput records",
            services,
            throughput.len()
        );
        Ok(CycleOutcome::Computed { services })
    }

    /// Spawn the periodic cycle; stops when the aggregator's token fires.
    pub fn start(self: &Arc<Self>) {
        let aggregator = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let interval = self.options.calculation_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    res = aggregator.run_cycle() => {
                        if let Err(e) = res {
                            aggregator.metrics.aggregator_errors.inc();
                            tracing::error!("Aggregator cycle failed: {}", e);
                        }
                    }
                }
            }
            tracing::debug!("Aggregator stopped");
        });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Stop the periodic cycle and wait for it
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

    async fn flush_throughput(&self) -> Result<()> {
        let bucket: Vec<Throughput> = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *current).into_values().collect()
        };
        if bucket.is_empty() {
            return Ok(());
        }
        // the interval is lost on failure; the next one is counted afresh
        self.store.insert_throughput(bucket).await
    }

    fn set_probabilities(&self, probabilities: ServiceOperationProbabilities) {
        *self
            .probabilities
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = probabilities;
    }

    /// A node that was not leader last cycle starts from whatever the store
    /// holds now, since another leader may have published in between.
    async fn previous_probabilities(
        &self,
        was_leader: bool,
    ) -> Result<ServiceOperationProbabilities> {
        let local = self.probabilities();
        if was_leader && !local.is_empty() {
            return Ok(local);
        }
        let published = self.store.get_latest_probabilities().await?;
        if published.is_empty() {
            Ok(local)
        } else {
            Ok(published)
        }
    }
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("hostname", &self.hostname)
            .field("calculation_interval", &self.options.calculation_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct FixedElection(AtomicBool);

    impl FixedElection {
        fn new(leader: bool) -> Arc<Self> {
            Arc::new(Self(AtomicBool::new(leader)))
        }
    }

    impl Election for FixedElection {
        fn is_leader(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn options() -> Options {
        Options {
            calculation_interval: Duration::from_secs(10),
            initial_sampling_probability: 0.1,
            ..Default::default()
        }
    }

    fn aggregator(
        election: Arc<dyn Election>,
        store: Arc<MemoryStore>,
    ) -> Aggregator {
        Aggregator::new(
            options(),
            "node-a",
            election,
            store,
            Arc::new(SamplerMetrics::new()),
            CancellationToken::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_options_rejected() {
        let result = Aggregator::new(
            Options {
                calculation_interval: Duration::ZERO,
                ..Default::default()
            },
            "node-a",
            FixedElection::new(true),
            Arc::new(MemoryStore::new(1)),
            Arc::new(SamplerMetrics::new()),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_follower_flushes_but_does_not_publish() {
        let store = Arc::new(MemoryStore::new(10));
        let agg = aggregator(FixedElection::new(false), store.clone());
        agg.record_throughput("api", "GET", 0.1);
        agg.record_throughput("api", "GET", 0.1);

        assert_eq!(agg.run_cycle().await.unwrap(), CycleOutcome::Follower);
        assert_eq!(store.bucket_count(), 1);
        assert!(store.latest_record().is_none());
    }

    #[tokio::test]
    async fn test_leader_publishes() {
        let store = Arc::new(MemoryStore::new(10));
        let agg = aggregator(FixedElection::new(true), store.clone());
        for _ in 0..200 {
            agg.record_throughput("api", "GET", 0.1);
        }

        assert_eq!(
            agg.run_cycle().await.unwrap(),
            CycleOutcome::Computed { services: 1 }
        );
        let record = store.latest_record().unwrap();
        assert_eq!(record.hostname, "node-a");
        // 20 qps at 0.1 against a target of 1 qps
        let p = record.probabilities["api"]["GET"];
        assert!((p - 0.005).abs() < 1e-9);
        assert_eq!(agg.probabilities(), record.probabilities);
    }

    #[tokio::test]
    async fn test_new_leader_continues_from_published() {
        let store = Arc::new(MemoryStore::new(10));
        let mut published = ServiceOperationProbabilities::new();
        published
            .entry("api".into())
            .or_default()
            .insert("GET".into(), 0.42);
        store.insert_probabilities("old-leader", &published).await.unwrap();

        let agg = aggregator(FixedElection::new(true), store.clone());
        agg.run_cycle().await.unwrap();
        assert_eq!(agg.probabilities()["api"]["GET"], 0.42);
        assert_eq!(store.latest_record().unwrap().hostname, "node-a");
    }

    #[tokio::test]
    async fn test_follower_tracks_published_probabilities() {
        let store = Arc::new(MemoryStore::new(10));
        let mut published = ServiceOperationProbabilities::new();
        published
            .entry("api".into())
            .or_default()
            .insert("GET".into(), 0.42);
        store.insert_probabilities("node-b", &published).await.unwrap();

        let agg = aggregator(FixedElection::new(false), store.clone());
        assert_eq!(agg.run_cycle().await.unwrap(), CycleOutcome::Follower);
        assert_eq!(agg.probabilities(), published);
        assert_eq!(store.latest_record().unwrap().hostname, "node-b");
    }

    #[tokio::test]
    async fn test_reelected_leader_continues_from_interim_leader() {
        let store = Arc::new(MemoryStore::new(10));
        let election = FixedElection::new(true);
        let agg = aggregator(election.clone(), store.clone());
        for _ in 0..200 {
            agg.record_throughput("api", "GET", 0.1);
        }
        agg.run_cycle().await.unwrap();
        assert!((agg.probabilities()["api"]["GET"] - 0.005).abs() < 1e-9);

        election.0.store(false, Ordering::SeqCst);
        assert_eq!(agg.run_cycle().await.unwrap(), CycleOutcome::Follower);

        // another node leads in between and publishes
        let mut interim = ServiceOperationProbabilities::new();
        interim
            .entry("api".into())
            .or_default()
            .insert("GET".into(), 0.42);
        store.insert_probabilities("node-b", &interim).await.unwrap();

        election.0.store(true, Ordering::SeqCst);
        agg.run_cycle().await.unwrap();
        let record = store.latest_record().unwrap();
        assert_eq!(record.hostname, "node-a");
        // 20 qps against a target of 1 qps, starting from 0.42
        let p = record.probabilities["api"]["GET"];
        assert!((p - 0.021).abs() < 1e-9, "got {}", p);
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let store = Arc::new(MemoryStore::new(10));
        let agg = aggregator(FixedElection::new(true), store.clone());
        agg.record_throughput("api", "GET", 0.1);
        store.set_unavailable(true);
        assert!(matches!(agg.run_cycle().await, Err(Error::Store(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_cycles_until_cancelled() {
        let store = Arc::new(MemoryStore::new(10));
        let token = CancellationToken::new();
        let agg = Arc::new(
            Aggregator::new(
                options(),
                "node-a",
                FixedElection::new(true),
                store.clone(),
                Arc::new(SamplerMetrics::new()),
                token.clone(),
            )
            .unwrap(),
        );
        agg.start();
        assert!(agg.is_running());

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(store.latest_record().is_some());

        token.cancel();
        agg.close().await;
        assert!(!agg.is_running());
    }
}
