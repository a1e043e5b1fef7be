//! Sampling store abstraction
//!
//! Shared by all nodes: every node writes throughput observations, the leader
//! writes computed probabilities, and every node reads the latest
//! probabilities back. Last write wins; concurrency across nodes is the
//! backend's concern.

use crate::sampling::model::{ProbabilitiesRecord, ServiceOperationProbabilities, Throughput};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Trait for sampling store backends
#[async_trait]
pub trait SamplingStore: Send + Sync {
    /// Persist one calculation interval's worth of throughput.
    async fn insert_throughput(&self, throughput: Vec<Throughput>) -> Result<()>;

    /// Throughput inserted within `(start, end]`, so back-to-back windows
    /// never count a bucket twice.
    async fn get_throughput(&self, start: DateTime<Utc>, end: DateTime<Utc>)
        -> Result<Vec<Throughput>>;

    /// Replace the published probabilities.
    async fn insert_probabilities(
        &self,
        hostname: &str,
        probabilities: &ServiceOperationProbabilities,
    ) -> Result<()>;

    /// Latest published probabilities, empty if none were ever written.
    async fn get_latest_probabilities(&self) -> Result<ServiceOperationProbabilities>;
}

/// In-memory sampling store
///
/// Keeps at most `aggregation_buckets` throughput buckets; older ones are
/// dropped as new ones arrive.
#[derive(Debug)]
pub struct MemoryStore {
    buckets: Mutex<VecDeque<(DateTime<Utc>, Vec<Throughput>)>>,
    max_buckets: usize,
    probabilities: Mutex<Option<ProbabilitiesRecord>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new(aggregation_buckets: usize) -> Self {
        Self {
            buckets: Mutex::new(VecDeque::with_capacity(aggregation_buckets)),
            max_buckets: aggregation_buckets,
            probabilities: Mutex::new(None),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every call fail, to simulate a store outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of retained throughput buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Last record written by a leader
    pub fn latest_record(&self) -> Option<ProbabilitiesRecord> {
        self.probabilities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push_bucket(&self, at: DateTime<Utc>, throughput: Vec<Throughput>) {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        buckets.push_back((at, throughput));
        while buckets.len() > self.max_buckets {
            buckets.pop_front();
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Store("memory store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SamplingStore for MemoryStore {
    async fn insert_throughput(&self, throughput: Vec<Throughput>) -> Result<()> {
        self.check_available()?;
        self.push_bucket(Utc::now(), throughput);
        Ok(())
    }

    async fn get_throughput(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Throughput>> {
        self.check_available()?;
        let buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(buckets
            .iter()
            .filter(|(ts, _)| *ts > start && *ts <= end)
            .flat_map(|(_, throughput)| throughput.iter().cloned())
            .collect())
    }

    async fn insert_probabilities(
        &self,
        hostname: &str,
        probabilities: &ServiceOperationProbabilities,
    ) -> Result<()> {
        self.check_available()?;
        *self
            .probabilities
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(ProbabilitiesRecord {
            hostname: hostname.to_string(),
            timestamp: Utc::now(),
            probabilities: probabilities.clone(),
        });
        Ok(())
    }

    async fn get_latest_probabilities(&self) -> Result<ServiceOperationProbabilities> {
        self.check_available()?;
        Ok(self
            .probabilities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|record| record.probabilities.clone())
            .unwrap_or_default())
    }
}
