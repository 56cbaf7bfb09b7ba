//! Several controller replicas competing for one lease
//!
//! Uses paused tokio time so lease expiry, renewal and retry periods can be
//! stepped through deterministically.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fip_common::Result;
use fip_controller::{GateConfig, GateState, LeaderGate};

use common::{FakeLock, SharedLease};

const LEASE_DURATION: Duration = Duration::from_secs(15);

fn gate_config() -> GateConfig {
    GateConfig {
        renew_deadline: Duration::from_secs(10),
        retry_period: Duration::from_secs(2),
    }
}

/// Tracks how many replicas are inside the leading callback at once
#[derive(Default)]
struct Occupancy {
    current: AtomicUsize,
    peak: AtomicUsize,
    entries: Mutex<Vec<String>>,
}

impl Occupancy {
    async fn lead(&self, identity: &str, token: CancellationToken) -> Result<()> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.entries.lock().unwrap().push(identity.to_string());
        token.cancelled().await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Replica {
    lock: Arc<FakeLock>,
    gate: Arc<LeaderGate>,
    handle: JoinHandle<Result<()>>,
}

fn spawn_replica(
    identity: &'static str,
    lease: &Arc<SharedLease>,
    occupancy: &Arc<Occupancy>,
    shutdown: &CancellationToken,
) -> Replica {
    let lock = Arc::new(FakeLock::new(identity, lease.clone(), LEASE_DURATION));
    let gate = Arc::new(LeaderGate::new(lock.clone(), gate_config()));
    let handle = tokio::spawn({
        let gate = gate.clone();
        let occupancy = occupancy.clone();
        let shutdown = shutdown.clone();
        async move {
            gate.run(shutdown, |token| {
                let occupancy = occupancy.clone();
                async move { occupancy.lead(identity, token).await }
            })
            .await
        }
    });
    Replica { lock, gate, handle }
}

fn leaders(replicas: &[Replica]) -> usize {
    replicas
        .iter()
        .filter(|r| r.gate.state() == GateState::Leading)
        .count()
}

/// Story: three replicas start together and exactly one leads
#[tokio::test(start_paused = true)]
async fn story_only_one_replica_leads() {
    let lease = Arc::new(SharedLease::default());
    let occupancy = Arc::new(Occupancy::default());
    let shutdown = CancellationToken::new();

    let replicas: Vec<_> = ["fip-0", "fip-1", "fip-2"]
        .into_iter()
        .map(|id| spawn_replica(id, &lease, &occupancy, &shutdown))
        .collect();

    for _ in 0..30 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(leaders(&replicas) <= 1);
    }
    assert_eq!(leaders(&replicas), 1);
    assert_eq!(occupancy.peak.load(Ordering::SeqCst), 1);
    assert_eq!(occupancy.entries.lock().unwrap().len(), 1);

    shutdown.cancel();
    for replica in replicas {
        replica.handle.await.unwrap().unwrap();
        assert_eq!(replica.gate.state(), GateState::Stopped);
    }
    assert_eq!(lease.holder(), None, "leader releases the lease on shutdown");
}

/// Story: the leader loses contact with the API server, steps down at its
/// renew deadline, and another replica takes over once the lease expires
#[tokio::test(start_paused = true)]
async fn story_partitioned_leader_is_replaced() {
    let lease = Arc::new(SharedLease::default());
    let occupancy = Arc::new(Occupancy::default());
    let shutdown = CancellationToken::new();

    let first = spawn_replica("fip-0", &lease, &occupancy, &shutdown);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(first.gate.state(), GateState::Leading);

    let second = spawn_replica("fip-1", &lease, &occupancy, &shutdown);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(second.gate.state(), GateState::Standby);

    first.lock.partition(true);
    let replicas = [first, second];

    let mut took_over = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(leaders(&replicas) <= 1, "two replicas leading at once");
        if replicas[1].gate.state() == GateState::Leading {
            took_over = true;
            break;
        }
    }
    assert!(took_over, "standby replica never took over");
    assert_eq!(lease.holder().as_deref(), Some("fip-1"));
    assert_eq!(occupancy.peak.load(Ordering::SeqCst), 1);

    shutdown.cancel();
    for replica in replicas {
        replica.handle.await.unwrap().unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn leadership_moves_when_the_leader_shuts_down() {
    let lease = Arc::new(SharedLease::default());
    let occupancy = Arc::new(Occupancy::default());

    let first_shutdown = CancellationToken::new();
    let rest_shutdown = CancellationToken::new();
    let first = spawn_replica("fip-0", &lease, &occupancy, &first_shutdown);
    tokio::time::sleep(Duration::from_secs(1)).await;
    let second = spawn_replica("fip-1", &lease, &occupancy, &rest_shutdown);
    tokio::time::sleep(Duration::from_secs(1)).await;

    first_shutdown.cancel();
    first.handle.await.unwrap().unwrap();

    // Released lease is picked up on the next attempt rather than at expiry
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(second.gate.state(), GateState::Leading);
    assert_eq!(
        *occupancy.entries.lock().unwrap(),
        vec!["fip-0".to_string(), "fip-1".to_string()]
    );

    rest_shutdown.cancel();
    second.handle.await.unwrap().unwrap();
}
