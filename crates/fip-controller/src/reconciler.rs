//! Reconciliation cycle and loop driver
//!
//! One cycle resolves the healthy targets, reads the cloud inventory, maps
//! targets to instances, plans the moves and applies them. The loop runs a
//! cycle immediately and then once per interval until cancelled. A failed
//! cycle ends the loop with its error so the leadership gate abdicates.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use fip_common::{Error, Result};

use crate::context::ControllerContext;
use crate::executor::ReassignmentExecutor;
use crate::inventory::InventoryReader;
use crate::matcher::eligible_instances;
use crate::planner::plan;
use crate::topology::TopologyReader;

/// Summary of one reconciliation cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Healthy target addresses found
    pub targets: usize,
    /// Distinct instances behind those addresses
    pub eligible_instances: usize,
    /// Managed floating IPs
    pub floating_ips: usize,
    /// Floating IPs moved this cycle
    pub reassigned: usize,
}

fn log_failure(phase: &'static str) -> impl Fn(&Error) {
    move |e| {
        if e.is_cancelled() {
            return;
        }
        let status = e.status();
        match e.floating_ip() {
            Some(ip) => error!(
                phase,
                floating_ip = %ip,
                status = ?status,
                error = %e,
                "Reconciliation cycle failed"
            ),
            None => error!(phase, status = ?status, error = %e, "Reconciliation cycle failed"),
        }
    }
}

/// Run a single reconciliation cycle
pub async fn reconcile_once(
    ctx: &ControllerContext,
    cancel: &CancellationToken,
) -> Result<CycleReport> {
    let address_type = ctx.settings.address_type;

    let targets = TopologyReader::new(ctx, cancel)
        .resolve_targets(address_type)
        .await
        .inspect_err(log_failure("topology"))?;

    let inventory = InventoryReader::new(ctx, cancel);
    let instances = inventory
        .list_instances()
        .await
        .inspect_err(log_failure("inventory"))?;

    let eligible = eligible_instances(&targets, &instances).inspect_err(log_failure("match"))?;

    let floating_ips = inventory
        .managed_floating_ips()
        .await
        .inspect_err(log_failure("inventory"))?;

    let decisions = plan(&floating_ips, &eligible);
    debug!(
        floating_ips = floating_ips.len(),
        moves = decisions.len(),
        "Planned reassignments"
    );

    let reassigned = ReassignmentExecutor::new(ctx, cancel)
        .apply_all(&decisions)
        .await?;

    Ok(CycleReport {
        targets: targets.len(),
        eligible_instances: eligible.len(),
        floating_ips: floating_ips.len(),
        reassigned,
    })
}

/// Run reconciliation cycles until `cancel` fires or a cycle fails
///
/// The wait between cycles is the fixed interval, measured from the end of
/// the previous cycle.
pub async fn run(ctx: &ControllerContext, cancel: CancellationToken) -> Result<()> {
    info!(interval = ?ctx.settings.interval, "Starting reconciliation loop");

    loop {
        match reconcile_once(ctx, &cancel).await {
            Ok(report) if report.reassigned > 0 => info!(
                targets = report.targets,
                eligible_instances = report.eligible_instances,
                floating_ips = report.floating_ips,
                reassigned = report.reassigned,
                "Reconciliation cycle complete"
            ),
            Ok(report) => debug!(
                targets = report.targets,
                eligible_instances = report.eligible_instances,
                floating_ips = report.floating_ips,
                "Floating IPs already assigned"
            ),
            Err(e) if e.is_cancelled() => {
                info!("Reconciliation loop cancelled");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Reconciliation loop cancelled");
                return Ok(());
            }
            _ = tokio::time::sleep(ctx.settings.interval) => {}
        }
    }
}
