//! Lease locking using Kubernetes Leases
//!
//! Provides the mutual-exclusion primitive behind controller leader election,
//! using the coordination.k8s.io/v1 Lease API. The controller's leadership
//! gate calls [`LeaseLock::try_acquire_or_renew`] on a fixed cadence and
//! [`LeaseLock::release`] when it abdicates.
//!
//! # Atomicity
//!
//! Uses resourceVersion for compare-and-swap semantics. If the lease changes
//! between read and write, the update fails with 409 Conflict and we report
//! that the lease is not held. Two replicas can never both believe they
//! acquired the same lease version.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{Error, Result};

const FIELD_MANAGER: &str = "fip-controller";

/// Identity and timing of a lease
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseConfig {
    /// Lease object name
    pub name: String,
    /// Namespace the lease lives in
    pub namespace: String,
    /// Holder identity written into the lease (the controller pod name)
    pub identity: String,
    /// How long a lease stays valid without renewal
    pub lease_duration: Duration,
}

/// Cluster-wide mutual exclusion lock
///
/// Implementations must guarantee that at most one identity observes
/// `Ok(true)` from [`try_acquire_or_renew`](LeaseLock::try_acquire_or_renew)
/// for any instant in which the lease is valid.
#[async_trait]
pub trait LeaseLock: Send + Sync {
    /// Identity this lock acquires the lease for
    fn identity(&self) -> &str;

    /// Acquire the lease if free or expired, renew it if already held
    ///
    /// Returns `Ok(false)` when another identity holds a valid lease or won a
    /// concurrent update.
    async fn try_acquire_or_renew(&self) -> Result<bool>;

    /// Release the lease if this identity holds it
    async fn release(&self) -> Result<()>;
}

/// [`LeaseLock`] backed by a Kubernetes Lease object
pub struct KubeLeaseLock {
    client: Client,
    config: LeaseConfig,
}

impl KubeLeaseLock {
    /// Create a lease lock for the given client and lease configuration
    pub fn new(client: Client, config: LeaseConfig) -> Self {
        Self { client, config }
    }

    fn api(&self) -> Api<Lease> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn lease_duration_secs(&self) -> i32 {
        lease_duration_seconds(self.config.lease_duration)
    }

    /// Create a new lease (first leader)
    async fn create_lease(&self, api: &Api<Lease>, now: chrono::DateTime<Utc>) -> Result<bool> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.config.name.clone()),
                namespace: Some(self.config.namespace.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.config.identity.clone()),
                lease_duration_seconds: Some(self.lease_duration_secs()),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(0),
                ..Default::default()
            }),
        };

        match api.create(&PostParams::default(), &lease).await {
            Ok(_) => {
                info!(
                    identity = %self.config.identity,
                    lease = %self.config.name,
                    "Created new lease"
                );
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.config.identity, "Lease creation conflict, will retry");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Renew an existing lease that we hold (atomic with resourceVersion)
    async fn renew_lease(
        &self,
        api: &Api<Lease>,
        existing: &Lease,
        now: chrono::DateTime<Utc>,
    ) -> Result<bool> {
        if existing.metadata.resource_version.is_none() {
            return Err(missing_resource_version());
        }

        let mut updated = existing.clone();
        if let Some(ref mut spec) = updated.spec {
            spec.renew_time = Some(MicroTime(now));
            spec.lease_duration_seconds = Some(self.lease_duration_secs());
        }

        match api
            .replace(&self.config.name, &PostParams::default(), &updated)
            .await
        {
            Ok(_) => {
                debug!(identity = %self.config.identity, "Lease renewed");
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                warn!(identity = %self.config.identity, "Lease renewal conflict");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Take over an expired or released lease (atomic with resourceVersion)
    async fn take_over_lease(
        &self,
        api: &Api<Lease>,
        resource_version: Option<String>,
        now: chrono::DateTime<Utc>,
        transitions: i32,
    ) -> Result<bool> {
        let rv = resource_version.ok_or_else(missing_resource_version)?;

        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.config.name.clone()),
                namespace: Some(self.config.namespace.clone()),
                resource_version: Some(rv),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.config.identity.clone()),
                lease_duration_seconds: Some(self.lease_duration_secs()),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(transitions.saturating_add(1)),
                ..Default::default()
            }),
        };

        match api
            .replace(&self.config.name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => {
                info!(
                    identity = %self.config.identity,
                    transitions = transitions.saturating_add(1),
                    "Took over lease"
                );
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.config.identity, "Lease takeover conflict, will retry");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl LeaseLock for KubeLeaseLock {
    fn identity(&self) -> &str {
        &self.config.identity
    }

    /// Uses resourceVersion for compare-and-swap semantics:
    /// - Read lease and its resourceVersion
    /// - Decide if we can acquire/renew
    /// - Update with resourceVersion - fails if lease changed since read
    async fn try_acquire_or_renew(&self) -> Result<bool> {
        let api = self.api();
        let now = Utc::now();

        let existing = match api.get(&self.config.name).await {
            Ok(lease) => Some(lease),
            Err(kube::Error::Api(e)) if e.code == 404 => None,
            Err(e) => return Err(e.into()),
        };

        match (lease_action(existing.as_ref(), &self.config.identity, now), existing) {
            (LeaseAction::Wait, _) => Ok(false),
            (LeaseAction::Renew, Some(lease)) => self.renew_lease(&api, &lease, now).await,
            (LeaseAction::TakeOver { transitions }, Some(lease)) => {
                self.take_over_lease(&api, lease.metadata.resource_version, now, transitions)
                    .await
            }
            (LeaseAction::Create, _) | (_, None) => self.create_lease(&api, now).await,
        }
    }

    /// Clears the holder identity so a standby replica can take over
    /// immediately instead of waiting for the lease to expire.
    async fn release(&self) -> Result<()> {
        let api = self.api();

        let lease = match api.get(&self.config.name).await {
            Ok(l) => l,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(identity = %self.config.identity, "Lease not found, nothing to release");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let holder = lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref());
        if holder != Some(self.config.identity.as_str()) {
            debug!(identity = %self.config.identity, "Not the lease holder, nothing to release");
            return Ok(());
        }

        // Holder cleared and renew time in the past: immediately acquirable
        let past = Utc::now() - chrono::Duration::seconds(60);
        let patch = json!({
            "metadata": {
                "resourceVersion": lease.metadata.resource_version,
            },
            "spec": {
                "holderIdentity": null,
                "renewTime": MicroTime(past),
            }
        });

        api.patch(
            &self.config.name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;

        info!(identity = %self.config.identity, "Lease released for fast failover");
        Ok(())
    }
}

/// What an acquisition attempt should do with the current lease
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LeaseAction {
    /// No lease exists yet
    Create,
    /// We hold the lease
    Renew,
    /// The lease is free or expired
    TakeOver { transitions: i32 },
    /// Another identity holds a valid lease
    Wait,
}

fn lease_action(
    existing: Option<&Lease>,
    identity: &str,
    now: chrono::DateTime<Utc>,
) -> LeaseAction {
    let Some(lease) = existing else {
        return LeaseAction::Create;
    };
    let spec = lease.spec.as_ref();
    let holder = spec.and_then(|s| s.holder_identity.as_deref());

    if holder == Some(identity) {
        return LeaseAction::Renew;
    }
    if holder.is_some() && !lease_expired(lease, now) {
        return LeaseAction::Wait;
    }
    LeaseAction::TakeOver {
        transitions: spec.and_then(|s| s.lease_transitions).unwrap_or(0),
    }
}

/// Whole seconds written to `leaseDurationSeconds`
///
/// Rounded up so the lease never looks shorter to other replicas than the
/// duration the renew deadline was validated against.
fn lease_duration_seconds(duration: Duration) -> i32 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    i32::try_from(secs).unwrap_or(i32::MAX).max(1)
}

/// Check whether a lease's validity window has passed
pub fn lease_expired(lease: &Lease, now: chrono::DateTime<Utc>) -> bool {
    let spec = lease.spec.as_ref();
    let renew_time = spec.and_then(|s| s.renew_time.as_ref());
    let duration_secs = spec.and_then(|s| s.lease_duration_seconds);
    match (renew_time, duration_secs) {
        (Some(rt), Some(duration)) => now > rt.0 + chrono::Duration::seconds(duration as i64),
        _ => true,
    }
}

fn missing_resource_version() -> Error {
    Error::Kube {
        source: kube::Error::Api(kube::error::ErrorResponse {
            status: "Failed".to_string(),
            message: "Lease missing resourceVersion".to_string(),
            reason: "Invalid".to_string(),
            code: 500,
        }),
    }
}
