//! Assignment planner
//!
//! Decides which floating IPs must move and where. A floating IP is
//! mis-assigned when it has no owner or its owner is not in the eligible set.
//! Each mis-assigned IP goes to the eligible instance with the fewest
//! floating IPs, ties going to the instance seen first. The chosen instance's
//! load is bumped in the planner's working view before the next IP is
//! considered, so several moves in one cycle spread across instances.

use std::fmt;

use tracing::{debug, warn};

use fip_hcloud::{FloatingIp, Instance};

/// A planned move of a floating IP to an instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssignmentDecision {
    /// The floating IP to move
    pub floating_ip: FloatingIp,
    /// The instance to move it to
    pub target: Instance,
}

impl fmt::Display for AssignmentDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.floating_ip, self.target)
    }
}

/// Plan the moves that bring every floating IP onto an eligible instance
///
/// Decisions are in input order. Correctly assigned IPs yield nothing. With
/// an empty eligible set nothing can be planned; mis-assigned IPs are left
/// where they are.
pub fn plan(floating_ips: &[FloatingIp], eligible: &[Instance]) -> Vec<AssignmentDecision> {
    let mut loads: Vec<usize> = eligible.iter().map(Instance::load).collect();
    let mut decisions = Vec::new();

    for fip in floating_ips {
        if let Some(owner) = fip.owner {
            if eligible.iter().any(|i| i.id == owner) {
                debug!(floating_ip = %fip, owner, "Floating IP correctly assigned");
                continue;
            }
        }

        let Some(index) = least_loaded(&loads) else {
            warn!(floating_ip = %fip, "No eligible instance to assign floating IP to");
            continue;
        };
        loads[index] += 1;

        decisions.push(AssignmentDecision {
            floating_ip: fip.clone(),
            target: eligible[index].clone(),
        });
    }

    decisions
}

/// Index of the smallest load, first one on ties
fn least_loaded(loads: &[usize]) -> Option<usize> {
    loads
        .iter()
        .enumerate()
        .min_by_key(|(index, load)| (**load, *index))
        .map(|(index, _)| index)
}
