//! Derives the externally visible phase of a namespace

use crate::libs::crds::ScalingPhase;
use crate::libs::errors::Error;
use crate::libs::workloads::Workloads;

/// Derive the phase a namespace sits in relative to a target state
///
/// # Arguments
///
/// * `store` - The workload store to read observed state from
/// * `namespace` - The namespace to tally
/// * `active` - Whether the target state is scaled up
pub async fn compute_phase(
    store: &dyn Workloads,
    namespace: &str,
    active: bool,
) -> Result<ScalingPhase, Error> {
    let workloads = store.list(namespace).await?;
    // tally where this namespaces workloads currently sit
    let total = workloads.len();
    let zeroed = workloads.iter().filter(|w| w.desired == 0).count();
    let running = workloads.iter().filter(|w| w.desired >= 1).count();
    let ready = workloads
        .iter()
        .filter(|w| w.desired >= 1 && w.ready >= w.desired)
        .count();
    // empty namespaces are trivially settled
    if total == 0 {
        return Ok(ScalingPhase::settled(active));
    }
    if zeroed == total {
        return Ok(ScalingPhase::ScaledDown);
    }
    if running == total && ready == total {
        return Ok(ScalingPhase::ScaledUp);
    }
    if active {
        if zeroed > 0 || ready < running {
            return Ok(ScalingPhase::ScalingUp);
        }
        return Ok(ScalingPhase::ScaledUp);
    }
    if running > 0 && zeroed > 0 {
        return Ok(ScalingPhase::ScalingDown);
    }
    if running > 0 {
        return Ok(ScalingPhase::PartlyScaled);
    }
    Ok(ScalingPhase::ScaledDown)
}
