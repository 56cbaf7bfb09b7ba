//! Reassignment executor
//!
//! Applies planned moves through the cloud API. Transport failures are
//! retried with backoff. A response that arrives with a status outside
//! [`ACCEPTED_STATUSES`] is a logical rejection and fails immediately.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use fip_common::retry::retry_with_backoff;
use fip_common::{Error, Result};

use crate::context::ControllerContext;
use crate::planner::AssignmentDecision;

/// Status codes meaning the assign request was accepted
pub const ACCEPTED_STATUSES: &[u16] = &[201, 202];

/// Issues floating IP moves for one cycle
pub struct ReassignmentExecutor<'a> {
    ctx: &'a ControllerContext,
    cancel: &'a CancellationToken,
}

impl<'a> ReassignmentExecutor<'a> {
    /// Create an executor for one cycle
    pub fn new(ctx: &'a ControllerContext, cancel: &'a CancellationToken) -> Self {
        Self { ctx, cancel }
    }

    /// Move one floating IP
    pub async fn apply(&self, decision: &AssignmentDecision) -> Result<()> {
        let fip = &decision.floating_ip;
        let target = &decision.target;
        info!(
            floating_ip = %fip,
            from = ?fip.owner,
            instance = %target,
            "Reassigning floating IP"
        );

        let cloud = &self.ctx.cloud;
        let response = retry_with_backoff(
            &self.ctx.settings.backoff,
            "assign_floating_ip",
            self.cancel,
            || cloud.assign_floating_ip(fip.id, target.id),
        )
        .await?;

        if !ACCEPTED_STATUSES.contains(&response.status) {
            return Err(Error::UnexpectedResponse {
                floating_ip: fip.ip,
                instance: target.name.clone(),
                status: response.status,
                expected: ACCEPTED_STATUSES.to_vec(),
            });
        }
        Ok(())
    }

    /// Apply decisions in order, stopping at the first failure
    ///
    /// Returns the number of moves applied.
    pub async fn apply_all(&self, decisions: &[AssignmentDecision]) -> Result<usize> {
        for (applied, decision) in decisions.iter().enumerate() {
            if let Err(e) = self.apply(decision).await {
                if !e.is_cancelled() {
                    error!(
                        floating_ip = %decision.floating_ip,
                        instance = %decision.target,
                        applied,
                        skipped = decisions.len() - applied - 1,
                        error = %e,
                        "Reassignment failed, skipping remaining moves this cycle"
                    );
                }
                return Err(e);
            }
        }
        Ok(decisions.len())
    }
}
