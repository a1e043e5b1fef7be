//! Lease-based leader election participant
//!
//! Each node runs one participant. It polls a `DistributedLock` from a
//! background task: followers try to take the lease every
//! `follower_lease_refresh_interval`, the leader renews it every
//! `leader_lease_refresh_interval`. Any failed renewal demotes the node at
//! once, whether the lease went to a contender or the backend is
//! unreachable. Mutual exclusion is only as strong as the lock backend;
//! between two nodes the dual-leader window is bounded by one lease interval.

use crate::common::{DistributedLock, Error, Options, Result, SamplerMetrics};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lock resource the sampling leader is elected on
pub const DEFAULT_RESOURCE_NAME: &str = "sampling_store_leader";

/// Election role of this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionRole {
    Follower,
    Leader,
}

impl std::fmt::Display for ElectionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElectionRole::Follower => write!(f, "follower"),
            ElectionRole::Leader => write!(f, "leader"),
        }
    }
}

/// Leadership view handed to workers
pub trait Election: Send + Sync {
    /// Non-blocking; may be stale by up to one refresh interval.
    fn is_leader(&self) -> bool;
}

/// Lease cadence of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticipantOptions {
    pub leader_lease_refresh_interval: Duration,
    pub follower_lease_refresh_interval: Duration,
}

impl From<&Options> for ParticipantOptions {
    fn from(options: &Options) -> Self {
        Self {
            leader_lease_refresh_interval: options.leader_lease_refresh_interval,
            follower_lease_refresh_interval: options.follower_lease_refresh_interval,
        }
    }
}

/// State shared between the participant and its lease loop
struct LeaseState {
    lock: Arc<dyn DistributedLock>,
    resource_name: String,
    options: ParticipantOptions,
    leader: AtomicBool,
    stopped: AtomicBool,
    metrics: Arc<SamplerMetrics>,
}

impl LeaseState {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    fn set_role(&self, role: ElectionRole) {
        let leader = role == ElectionRole::Leader;
        let was_leader = self.leader.swap(leader, Ordering::SeqCst);
        if was_leader == leader {
            return;
        }
        self.metrics.is_leader.set(leader as u64);
        if leader {
            self.metrics.leader_acquired.inc();
            tracing::info!("Acquired leader lease on {}", self.resource_name);
        } else {
            self.metrics.leader_lost.inc();
            tracing::info!("Stepped down from leader lease on {}", self.resource_name);
        }
    }

    /// Lease TTL requested from the backend: the longer interval plus one
    /// leader interval, so a renewal always lands while the lease is live
    /// and a crashed leader's lease lapses within about one follower poll.
    fn lease_ttl(&self) -> Duration {
        let options = &self.options;
        options
            .follower_lease_refresh_interval
            .max(options.leader_lease_refresh_interval)
            + options.leader_lease_refresh_interval
    }

    /// Transient backend errors are expected while the lock is unreachable
    /// and only warrant a warning; anything else is logged as an error.
    fn record_lock_error(&self, op: &str, e: &Error) {
        self.metrics.lock_errors.inc();
        if e.is_retryable() {
            tracing::warn!("Failed to {} lease on {}: {}", op, self.resource_name, e);
        } else {
            tracing::error!("Failed to {} lease on {}: {}", op, self.resource_name, e);
        }
    }

    /// One acquire or renew attempt; returns the delay before the next one.
    async fn refresh_lease(&self) -> Duration {
        let ttl = self.lease_ttl();
        if self.is_leader() {
            match self.lock.renew(&self.resource_name, ttl).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!("Lease on {} is no longer ours", self.resource_name);
                    self.set_role(ElectionRole::Follower);
                }
                Err(e) => {
                    self.record_lock_error("renew", &e);
                    self.set_role(ElectionRole::Follower);
                }
            }
        } else {
            match self.lock.acquire(&self.resource_name, ttl).await {
                Ok(true) => self.set_role(ElectionRole::Leader),
                Ok(false) => {
                    tracing::trace!("Lease on {} held elsewhere", self.resource_name);
                }
                Err(e) => self.record_lock_error("acquire", &e),
            }
        }

        if self.is_leader() {
            self.options.leader_lease_refresh_interval
        } else {
            self.options.follower_lease_refresh_interval
        }
    }
}

/// Lease loop: runs until `shutdown` fires. Every lock call and every sleep
/// is raced against the token, so cancellation lands within one iteration.
async fn run_lease_loop(state: Arc<LeaseState>, shutdown: CancellationToken) {
    tracing::debug!("Lease loop on {} started", state.resource_name);
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = state.refresh_lease() => next,
        };
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(next) => {}
        }
    }
    state.stopped.store(true, Ordering::SeqCst);
    tracing::debug!("Lease loop on {} stopped", state.resource_name);
}

/// A node's seat in the leader election
pub struct ElectionParticipant {
    state: Arc<LeaseState>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl ElectionParticipant {
    pub fn new(
        lock: Arc<dyn DistributedLock>,
        resource_name: impl Into<String>,
        options: ParticipantOptions,
        metrics: Arc<SamplerMetrics>,
    ) -> Self {
        Self {
            state: Arc::new(LeaseState {
                lock,
                resource_name: resource_name.into(),
                options,
                leader: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                metrics,
            }),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Spawn the lease loop. Must be called once, inside a tokio runtime;
    /// further calls are ignored.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                "Election participant on {} already started",
                self.state.resource_name
            );
            return;
        }
        let handle = tokio::spawn(run_lease_loop(
            Arc::clone(&self.state),
            self.shutdown.clone(),
        ));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub fn role(&self) -> ElectionRole {
        if self.state.is_leader() {
            ElectionRole::Leader
        } else {
            ElectionRole::Follower
        }
    }

    pub fn resource_name(&self) -> &str {
        &self.state.resource_name
    }

    pub fn options(&self) -> ParticipantOptions {
        self.state.options
    }

    /// Completion signal: true once the lease loop has exited (or never ran
    /// and the participant was closed).
    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }

    /// Token cancelled when the participant closes; workers derive theirs
    /// from it so they stand down with the election.
    pub fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Stop the lease loop, wait for it, then release the lease.
    ///
    /// The loop is stopped even when the release fails; the release error is
    /// returned. The release is bounded by the lease TTL since the lease
    /// lapses on its own after that.
    pub async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(
                    "Lease loop on {} ended abnormally: {}",
                    self.state.resource_name,
                    e
                );
            }
        }
        self.state.stopped.store(true, Ordering::SeqCst);
        self.state.set_role(ElectionRole::Follower);

        let ttl = self.state.lease_ttl();
        match tokio::time::timeout(ttl, self.state.lock.release(&self.state.resource_name)).await
        {
            Ok(Ok(released)) => {
                tracing::debug!(
                    "Election participant on {} closed (released: {})",
                    self.state.resource_name,
                    released
                );
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(
                    "Failed to release lease on {}: {}",
                    self.state.resource_name,
                    e
                );
                Err(e)
            }
            Err(_) => Err(Error::Timeout(format!(
                "release of {} did not complete within {:?}",
                self.state.resource_name, ttl
            ))),
        }
    }
}

impl Election for ElectionParticipant {
    fn is_leader(&self) -> bool {
        self.state.is_leader()
    }
}

impl Drop for ElectionParticipant {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for ElectionParticipant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElectionParticipant")
            .field("resource_name", &self.state.resource_name)
            .field("role", &self.role())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
