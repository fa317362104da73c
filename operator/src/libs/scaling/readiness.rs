//! Decides whether a priority group has converged

use tracing::{event, Level};

use crate::libs::errors::Error;
use crate::libs::workloads::{Workload, Workloads};

/// Check whether every workload in a group has reached the target state
///
/// Scaled up means every desired replica is ready and scaled down means
/// nothing is left running. Observed state is refetched per workload and
/// a workload that has gone missing counts as not ready.
///
/// # Arguments
///
/// * `store` - The workload store to refetch observed state from
/// * `namespace` - The namespace these workloads live in
/// * `group` - The workloads to check
/// * `active` - Whether the target state is scaled up
pub async fn is_group_ready(
    store: &dyn Workloads,
    namespace: &str,
    group: &[Workload],
    active: bool,
) -> Result<bool, Error> {
    for workload in group {
        // refetch this workloads observed state
        let current = match store.get(namespace, workload.kind, &workload.name).await? {
            Some(current) => current,
            None => {
                event!(
                    Level::WARN,
                    msg = "Workload vanished while scaling",
                    namespace = namespace,
                    workload = %workload.key()
                );
                return Ok(false);
            }
        };
        if active {
            // a still zeroed desired count means nothing was written yet
            if current.desired <= 0 || current.ready < current.desired {
                return Ok(false);
            }
        } else if current.total != 0 || current.ready != 0 {
            return Ok(false);
        }
    }
    Ok(true)
}
