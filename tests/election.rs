//! Leader election tests against the in-memory lock table

use adaptive_sampler::common::{LockTable, SamplerMetrics};
use adaptive_sampler::coordinator::{
    Election, ElectionParticipant, ParticipantOptions, DEFAULT_RESOURCE_NAME,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const LEADER_INTERVAL: Duration = Duration::from_millis(10);
const FOLLOWER_INTERVAL: Duration = Duration::from_millis(50);

fn participant(table: &Arc<LockTable>, owner: &str) -> Arc<ElectionParticipant> {
    participant_with(
        table,
        owner,
        LEADER_INTERVAL,
        FOLLOWER_INTERVAL,
        Arc::new(SamplerMetrics::new()),
    )
}

fn participant_with(
    table: &Arc<LockTable>,
    owner: &str,
    leader_interval: Duration,
    follower_interval: Duration,
    metrics: Arc<SamplerMetrics>,
) -> Arc<ElectionParticipant> {
    Arc::new(ElectionParticipant::new(
        Arc::new(table.handle(owner)),
        DEFAULT_RESOURCE_NAME,
        ParticipantOptions {
            leader_lease_refresh_interval: leader_interval,
            follower_lease_refresh_interval: follower_interval,
        },
        metrics,
    ))
}

/// Poll `cond` every millisecond; returns the time it took to hold, or
/// `None` after `timeout`.
async fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> Option<Duration> {
    let start = Instant::now();
    loop {
        if cond() {
            return Some(start.elapsed());
        }
        if start.elapsed() >= timeout {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

fn leaders(participants: &[Arc<ElectionParticipant>]) -> usize {
    participants.iter().filter(|p| p.is_leader()).count()
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_leader() {
    for n in 1..=6 {
        let table = LockTable::new();
        let participants: Vec<_> = (0..n)
            .map(|i| participant(&table, &format!("node-{}", i)))
            .collect();
        for p in &participants {
            p.start();
        }

        let mut saw_leader = false;
        for _ in 0..400 {
            tokio::time::sleep(Duration::from_millis(1)).await;
            let count = leaders(&participants);
            assert!(count <= 1, "{} leaders among {} participants", count, n);
            saw_leader |= count == 1;
        }
        assert!(saw_leader, "no leader elected among {} participants", n);

        for p in &participants {
            p.close().await.unwrap();
        }
        assert_eq!(leaders(&participants), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_leadership_moves_when_leader_closes() {
    let table = LockTable::new();
    let participants: Vec<_> = (0..3)
        .map(|i| participant(&table, &format!("node-{}", i)))
        .collect();
    for p in &participants {
        p.start();
    }

    wait_until(FOLLOWER_INTERVAL, || leaders(&participants) == 1)
        .await
        .expect("a leader is elected");
    let leader = participants.iter().position(|p| p.is_leader()).unwrap();
    participants[leader].close().await.unwrap();

    // the released lease is picked up at the next follower poll
    let others: Vec<_> = participants
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != leader)
        .map(|(_, p)| Arc::clone(p))
        .collect();
    wait_until(FOLLOWER_INTERVAL * 2, || leaders(&others) == 1)
        .await
        .expect("a new leader is elected");

    for p in &others {
        p.close().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_renewal_hands_over_leadership() {
    let table = LockTable::new();
    let p1 = participant(&table, "p1");
    let p2 = participant(&table, "p2");

    p1.start();
    wait_until(LEADER_INTERVAL, || p1.is_leader())
        .await
        .expect("p1 acquires first");
    p2.start();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(p1.is_leader());
    assert!(!p2.is_leader());

    // p1's next renewal is rejected
    table.partition("p1");

    let demoted = wait_until(LEADER_INTERVAL * 2, || !p1.is_leader())
        .await
        .expect("p1 steps down");
    assert!(demoted <= LEADER_INTERVAL + Duration::from_millis(1));

    let handed_over = wait_until(FOLLOWER_INTERVAL * 2, || p2.is_leader())
        .await
        .expect("p2 takes over");
    assert!(handed_over <= FOLLOWER_INTERVAL + Duration::from_millis(1));
    assert!(!p1.is_leader());

    // p1 stays follower once reachable again
    table.heal("p1");
    tokio::time::sleep(FOLLOWER_INTERVAL * 3).await;
    assert!(!p1.is_leader());
    assert!(p2.is_leader());

    p2.close().await.unwrap();
    p1.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_close_follower_stops_loop() {
    let table = LockTable::new();
    let leader = participant(&table, "leader");
    leader.start();
    wait_until(LEADER_INTERVAL, || leader.is_leader())
        .await
        .expect("leader elected");

    let follower = participant(&table, "follower");
    follower.start();
    tokio::time::sleep(FOLLOWER_INTERVAL * 2).await;
    assert!(!follower.is_leader());
    assert!(!follower.is_stopped());

    follower.close().await.unwrap();
    assert!(follower.is_stopped());
    // closing a follower leaves the leader's lease alone
    assert_eq!(table.holder(DEFAULT_RESOURCE_NAME).as_deref(), Some("leader"));

    leader.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_close_during_inflight_renewal() {
    let table = LockTable::new();
    let p = participant(&table, "p1");
    p.start();
    wait_until(LEADER_INTERVAL, || p.is_leader())
        .await
        .expect("leader elected");

    // the next renewal hangs far longer than any interval
    table.set_latency(Duration::from_secs(60));
    tokio::time::sleep(LEADER_INTERVAL + Duration::from_millis(2)).await;
    table.set_latency(Duration::ZERO);

    let start = Instant::now();
    let closed = tokio::time::timeout(LEADER_INTERVAL * 2, p.close()).await;
    assert!(closed.is_ok(), "close did not complete within 2x interval");
    closed.unwrap().unwrap();
    assert!(start.elapsed() <= LEADER_INTERVAL * 2);
    assert!(p.is_stopped());
    assert!(!p.is_leader());
}

#[tokio::test(start_paused = true)]
async fn test_lock_outage_then_recovery() {
    let table = LockTable::new();
    let p = participant(&table, "p1");
    table.partition("p1");
    p.start();

    tokio::time::sleep(FOLLOWER_INTERVAL * 3).await;
    assert!(!p.is_leader());
    assert!(!p.is_stopped());

    table.heal("p1");
    wait_until(FOLLOWER_INTERVAL * 2, || p.is_leader())
        .await
        .expect("acquires once the backend is back");

    p.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stable_leadership_across_intervals() {
    let configs = [(10, 50), (25, 50), (50, 50), (100, 100), (5, 500)];
    for (leader_ms, follower_ms) in configs {
        let leader_interval = Duration::from_millis(leader_ms);
        let follower_interval = Duration::from_millis(follower_ms);
        let table = LockTable::new();
        let metrics: Vec<_> = (0..2).map(|_| Arc::new(SamplerMetrics::new())).collect();
        let participants: Vec<_> = metrics
            .iter()
            .enumerate()
            .map(|(i, m)| {
                participant_with(
                    &table,
                    &format!("node-{}", i),
                    leader_interval,
                    follower_interval,
                    Arc::clone(m),
                )
            })
            .collect();
        for p in &participants {
            p.start();
        }

        tokio::time::sleep(Duration::from_millis(1)).await;
        for _ in 0..(follower_ms * 10) {
            assert_eq!(
                leaders(&participants),
                1,
                "leader {}ms / follower {}ms",
                leader_ms,
                follower_ms
            );
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let acquired: u64 = metrics.iter().map(|m| m.leader_acquired.get()).sum();
        let lost: u64 = metrics.iter().map(|m| m.leader_lost.get()).sum();
        assert_eq!(acquired, 1, "leader {}ms / follower {}ms", leader_ms, follower_ms);
        assert_eq!(lost, 0, "leader {}ms / follower {}ms", leader_ms, follower_ms);

        for p in &participants {
            p.close().await.unwrap();
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_former_leader_is_reelected() {
    let table = LockTable::new();
    let p1 = participant(&table, "p1");
    let p2 = participant(&table, "p2");
    p1.start();
    wait_until(LEADER_INTERVAL, || p1.is_leader())
        .await
        .expect("p1 acquires first");
    p2.start();

    table.partition("p1");
    wait_until(FOLLOWER_INTERVAL * 2, || p2.is_leader())
        .await
        .expect("p2 takes over");
    table.heal("p1");

    p2.close().await.unwrap();
    wait_until(FOLLOWER_INTERVAL * 2, || p1.is_leader())
        .await
        .expect("p1 leads again");
    assert!(!p2.is_leader());

    p1.close().await.unwrap();
}
