//! Lease-based distributed lock abstraction
//!
//! The election participant only needs acquire/renew/release on a named
//! resource. Mutual exclusion across the cluster is the lock backend's job;
//! `LockTable` is the in-process backend, shared by every node that holds a
//! `MemoryLock` handle on it. It also carries fault injection (partitions,
//! latency) so failover can be exercised without a real consensus store.

use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Trait for lease-based lock backends
///
/// Each call is made on behalf of the node that owns the handle. `Ok(false)`
/// means the lock is held by someone else (or, for renew/release, is no
/// longer held by this node); `Err` means the backend could not answer.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Take the lease on `resource` for `ttl` if it is free or already ours.
    async fn acquire(&self, resource: &str, ttl: Duration) -> Result<bool>;

    /// Extend a lease this node currently holds.
    async fn renew(&self, resource: &str, ttl: Duration) -> Result<bool>;

    /// Give up the lease if this node holds it.
    async fn release(&self, resource: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
struct Lease {
    owner: String,
    expires_at: Instant,
}

impl Lease {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Default)]
struct TableState {
    leases: HashMap<String, Lease>,
    partitioned: HashSet<String>,
    latency: Duration,
}

/// In-memory lock table shared by all `MemoryLock` handles
#[derive(Debug, Default)]
pub struct LockTable {
    state: Mutex<TableState>,
}

impl LockTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Per-node handle on this table
    pub fn handle(self: &Arc<Self>, owner: impl Into<String>) -> MemoryLock {
        MemoryLock {
            table: Arc::clone(self),
            owner: owner.into(),
        }
    }

    /// Current live holder of `resource`
    pub fn holder(&self, resource: &str) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .leases
            .get(resource)
            .filter(|lease| lease.is_live(Instant::now()))
            .map(|lease| lease.owner.clone())
    }

    /// Cut `owner` off from the table: its leases vanish and every call it
    /// makes fails until `heal`.
    pub fn partition(&self, owner: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.leases.retain(|_, lease| lease.owner != owner);
        state.partitioned.insert(owner.to_string());
        tracing::debug!("lock table: partitioned {}", owner);
    }

    pub fn heal(&self, owner: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.partitioned.remove(owner);
        tracing::debug!("lock table: healed {}", owner);
    }

    /// Delay applied before every call, to simulate a slow backend
    pub fn set_latency(&self, latency: Duration) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latency = latency;
    }

    fn latency(&self) -> Duration {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latency
    }

    fn with_state<T>(&self, owner: &str, f: impl FnOnce(&mut TableState) -> T) -> Result<T> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.partitioned.contains(owner) {
            return Err(Error::LockUnavailable(format!(
                "{} cannot reach the lock table",
                owner
            )));
        }
        Ok(f(&mut state))
    }
}

/// A node's handle on a `LockTable`
#[derive(Debug, Clone)]
pub struct MemoryLock {
    table: Arc<LockTable>,
    owner: String,
}

impl MemoryLock {
    async fn simulate_latency(&self) {
        let latency = self.table.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn acquire(&self, resource: &str, ttl: Duration) -> Result<bool> {
        self.simulate_latency().await;
        self.table.with_state(&self.owner, |state| {
            let now = Instant::now();
            match state.leases.get(resource) {
                Some(lease) if lease.is_live(now) && lease.owner != self.owner => false,
                _ => {
                    state.leases.insert(
                        resource.to_string(),
                        Lease {
                            owner: self.owner.clone(),
                            expires_at: now + ttl,
                        },
                    );
                    true
                }
            }
        })
    }

    async fn renew(&self, resource: &str, ttl: Duration) -> Result<bool> {
        self.simulate_latency().await;
        self.table.with_state(&self.owner, |state| {
            let now = Instant::now();
            match state.leases.get_mut(resource) {
                Some(lease) if lease.is_live(now) && lease.owner == self.owner => {
                    lease.expires_at = now + ttl;
                    true
                }
                _ => false,
            }
        })
    }

    async fn release(&self, resource: &str) -> Result<bool> {
        self.simulate_latency().await;
        self.table.with_state(&self.owner, |state| {
            match state.leases.get(resource) {
                Some(lease) if lease.owner == self.owner => {
                    state.leases.remove(resource);
                    true
                }
                _ => false,
            }
        })
    }
}
