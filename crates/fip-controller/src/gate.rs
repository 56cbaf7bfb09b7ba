//! Leader-election gate
//!
//! Serializes controller replicas through a cluster-wide lease. The gate
//! moves through three states:
//!
//! - `Standby`: tries to acquire the lease every retry period
//! - `Leading`: holds the lease, renews it every retry period and runs the
//!   reconciliation loop with a cancellation token scoped to this leadership
//! - `Stopped`: the process is shutting down
//!
//! Renewal runs as its own task. A renewal rejected because another replica
//! holds the lease ends leadership at once; failed renewal calls end it once
//! the renew deadline has passed since the last success, which is before the
//! lease can expire for the other replicas. Ending leadership cancels the
//! leadership token and the loop future is dropped, so no cycle keeps running
//! on a replica that no longer leads.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fip_common::leader_election::LeaseLock;
use fip_common::retry::jittered;
use fip_common::{Error, Result};

/// Jitter added to acquisition attempts so replicas don't poll in lockstep
const ACQUIRE_JITTER: f64 = 0.2;

/// Lease timing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GateConfig {
    /// How long the leader keeps retrying a failed renewal
    pub renew_deadline: Duration,
    /// Interval between acquisition and renewal attempts
    pub retry_period: Duration,
}

/// Leadership state of this replica
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    /// Waiting to acquire the lease
    Standby,
    /// Holding the lease and running the loop
    Leading,
    /// Shut down
    Stopped,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standby => f.write_str("Standby"),
            Self::Leading => f.write_str("Leading"),
            Self::Stopped => f.write_str("Stopped"),
        }
    }
}

/// Runs a callback only while this replica holds the lease
pub struct LeaderGate {
    lock: Arc<dyn LeaseLock>,
    config: GateConfig,
    state: watch::Sender<GateState>,
}

impl LeaderGate {
    /// Create a gate in `Standby`
    pub fn new(lock: Arc<dyn LeaseLock>, config: GateConfig) -> Self {
        let (state, _) = watch::channel(GateState::Standby);
        Self {
            lock,
            config,
            state,
        }
    }

    /// Current state
    pub fn state(&self) -> GateState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: GateState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(
                identity = %self.lock.identity(),
                from = %current,
                to = %state,
                "Leadership state changed"
            );
            *current = state;
            true
        });
    }

    /// Compete for leadership until `shutdown` fires
    ///
    /// `on_leading` is invoked each time leadership is acquired with a token
    /// that is cancelled when leadership ends. When it returns, the lease is
    /// released and the gate goes back to `Standby` (after one retry period)
    /// or to `Stopped` on shutdown. Configuration errors returned by the
    /// callback are fatal and end the gate with that error; every other
    /// outcome is handled by competing again.
    pub async fn run<F, Fut>(&self, shutdown: CancellationToken, mut on_leading: F) -> Result<()>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let identity = self.lock.identity().to_string();

        loop {
            self.set_state(GateState::Standby);
            if !self.acquire(&shutdown).await {
                self.set_state(GateState::Stopped);
                info!(identity = %identity, "Leader election stopped");
                return Ok(());
            }

            self.set_state(GateState::Leading);
            info!(identity = %identity, "Acquired leadership");

            let leading = shutdown.child_token();
            let renewal = tokio::spawn(renew_until_lost(
                self.lock.clone(),
                self.config,
                leading.clone(),
            ));

            let outcome = tokio::select! {
                biased;
                _ = leading.cancelled() => None,
                result = on_leading(leading.clone()) => Some(result),
            };
            leading.cancel();
            if let Err(e) = renewal.await {
                warn!(identity = %identity, error = %e, "Lease renewal task failed");
            }

            let fatal = match outcome {
                _ if shutdown.is_cancelled() => None,
                None => {
                    let lost = Error::LeadershipLost {
                        identity: identity.clone(),
                    };
                    warn!(error = %lost, "Stopping reconciliation");
                    None
                }
                Some(Ok(())) => {
                    warn!(identity = %identity, "Reconciliation loop exited, abdicating");
                    None
                }
                Some(Err(e)) if e.is_fatal() => Some(e),
                Some(Err(e)) => {
                    error!(
                        identity = %identity,
                        error = %e,
                        "Reconciliation loop failed, abdicating"
                    );
                    None
                }
            };

            self.set_state(GateState::Standby);
            if let Err(e) = self.lock.release().await {
                warn!(identity = %identity, error = %e, "Failed to release lease");
            }

            if let Some(e) = fatal {
                self.set_state(GateState::Stopped);
                return Err(e);
            }
            if shutdown.is_cancelled() {
                self.set_state(GateState::Stopped);
                info!(identity = %identity, "Leader election stopped");
                return Ok(());
            }

            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(self.config.retry_period) => {}
            }
        }
    }

    /// Try to acquire the lease until it is held or `shutdown` fires
    async fn acquire(&self, shutdown: &CancellationToken) -> bool {
        loop {
            if shutdown.is_cancelled() {
                return false;
            }

            let attempt = tokio::select! {
                _ = shutdown.cancelled() => return false,
                result = self.lock.try_acquire_or_renew() => result,
            };
            match attempt {
                Ok(true) => return true,
                Ok(false) => {
                    debug!(identity = %self.lock.identity(), "Lease held by another replica")
                }
                Err(e) => {
                    warn!(identity = %self.lock.identity(), error = %e, "Failed to acquire lease")
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = tokio::time::sleep(jittered(self.config.retry_period, ACQUIRE_JITTER)) => {}
            }
        }
    }
}

/// Renew the lease every retry period until leadership ends
///
/// Cancels `leading` when the lease is lost.
async fn renew_until_lost(
    lock: Arc<dyn LeaseLock>,
    config: GateConfig,
    leading: CancellationToken,
) {
    let mut last_renewal = Instant::now();

    loop {
        tokio::select! {
            _ = leading.cancelled() => return,
            _ = tokio::time::sleep(config.retry_period) => {}
        }

        let remaining = config.renew_deadline.saturating_sub(last_renewal.elapsed());
        let attempt = tokio::select! {
            _ = leading.cancelled() => return,
            result = tokio::time::timeout(remaining, lock.try_acquire_or_renew()) => result,
        };

        match attempt {
            Ok(Ok(true)) => {
                last_renewal = Instant::now();
                continue;
            }
            Ok(Ok(false)) => {
                warn!(identity = %lock.identity(), "Lease taken by another replica");
                leading.cancel();
                return;
            }
            Ok(Err(e)) => warn!(identity = %lock.identity(), error = %e, "Failed to renew lease"),
            Err(_) => warn!(identity = %lock.identity(), "Lease renewal timed out"),
        }

        if last_renewal.elapsed() >= config.renew_deadline {
            warn!(
                identity = %lock.identity(),
                deadline = ?config.renew_deadline,
                "Renew deadline exceeded"
            );
            leading.cancel();
            return;
        }
    }
}
