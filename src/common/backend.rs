//! Backend factory boundary
//!
//! The coordinator never names a concrete lock or store: it asks a
//! `SamplingStoreFactory` for both. `MemoryBackend` is the in-process
//! implementation; every node built from the same backend shares one lock
//! table and one store.

use crate::common::lock::{DistributedLock, LockTable};
use crate::common::storage::{MemoryStore, SamplingStore};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, OnceLock};

/// Creates the lock handle and store a coordinator runs on
#[async_trait]
pub trait SamplingStoreFactory: Send + Sync {
    async fn create_lock(&self) -> Result<Arc<dyn DistributedLock>>;

    async fn create_sampling_store(
        &self,
        aggregation_buckets: usize,
    ) -> Result<Arc<dyn SamplingStore>>;
}

/// Shared in-memory lock table and store
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    locks: Arc<LockTable>,
    store: Arc<OnceLock<Arc<MemoryStore>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locks(&self) -> &Arc<LockTable> {
        &self.locks
    }

    /// The shared store, once some node created it
    pub fn store(&self) -> Option<Arc<MemoryStore>> {
        self.store.get().cloned()
    }

    /// Factory for one node, identified by `node_id` on the lock table
    pub fn factory(&self, node_id: impl Into<String>) -> MemoryStoreFactory {
        MemoryStoreFactory {
            backend: self.clone(),
            node_id: node_id.into(),
        }
    }
}

/// A node's view of a `MemoryBackend`
#[derive(Debug, Clone)]
pub struct MemoryStoreFactory {
    backend: MemoryBackend,
    node_id: String,
}

impl MemoryStoreFactory {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

#[async_trait]
impl SamplingStoreFactory for MemoryStoreFactory {
    async fn create_lock(&self) -> Result<Arc<dyn DistributedLock>> {
        Ok(Arc::new(self.backend.locks.handle(self.node_id.clone())))
    }

    async fn create_sampling_store(
        &self,
        aggregation_buckets: usize,
    ) -> Result<Arc<dyn SamplingStore>> {
        if aggregation_buckets == 0 {
            return Err(Error::InvalidConfig(
                "aggregation_buckets must be > 0".into(),
            ));
        }
        let store = self
            .backend
            .store
            .get_or_init(|| Arc::new(MemoryStore::new(aggregation_buckets)));
        Ok(Arc::clone(store) as Arc<dyn SamplingStore>)
    }
}
