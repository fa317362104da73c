//! Applies desired replica counts to a namespace in priority order

use std::collections::BTreeMap;
use tracing::{event, instrument, Level};

use super::{is_group_ready, priority_groups};
use crate::libs::errors::Error;
use crate::libs::workloads::{Workload, Workloads};

/// What a scaling pass over a namespace produced
#[derive(Debug, Clone)]
pub struct ScaleOutcome {
    /// The updated original replica map keyed by "Kind/Name"
    pub originals: BTreeMap<String, i32>,
    /// Whether every priority group converged
    pub all_ready: bool,
}

/// Drive a namespaces workloads toward a target state in priority order
///
/// Scale downs walk priorities ascending and scale ups walk them in
/// reverse. Each priority group must converge before the next one is
/// touched unless `timeout_passed` bypasses the barrier. Original replica
/// counts are recorded before the first write down to zero and erased once
/// a workload is observed restored and ready. Keys in the original replica
/// map are config space ("Kind/Name"); callers spanning several namespaces
/// own the "Namespace/" prefix on their side of this boundary.
///
/// # Arguments
///
/// * `store` - The workload store to read and write through
/// * `namespace` - The namespace to scale
/// * `active` - Whether the target state is scaled up
/// * `sequence` - The name patterns ordering workloads
/// * `exclusions` - The name patterns for workloads that must never be scaled
/// * `originals` - The recorded original replica counts
/// * `timeout_passed` - Whether the stage barrier may be bypassed
#[instrument(
    name = "scaling::scale_target",
    skip_all,
    fields(namespace = namespace, active = active)
)]
pub async fn scale_target(
    store: &dyn Workloads,
    namespace: &str,
    active: bool,
    sequence: &[String],
    exclusions: &[String],
    mut originals: BTreeMap<String, i32>,
    timeout_passed: bool,
) -> Result<ScaleOutcome, Error> {
    // group this namespaces workloads by sequence priority
    let groups = priority_groups(store.list(namespace).await?, sequence, exclusions);
    // scale downs walk priorities ascending and scale ups mirror that
    let mut ordered: Vec<(&usize, &Vec<Workload>)> = groups.iter().collect();
    if active {
        ordered.reverse();
    }
    for (priority, group) in ordered {
        // converged groups take no writes
        if is_group_ready(store, namespace, group, active).await? {
            // restored workloads no longer need their original counts
            if active {
                for workload in group {
                    originals.remove(&workload.key());
                }
            }
            continue;
        }
        for workload in group {
            // figure out what to scale this workload to
            let target = if active {
                match originals.get(&workload.key()) {
                    Some(original) => *original,
                    None if workload.desired > 0 => workload.desired,
                    None => 1,
                }
            } else {
                0
            };
            // writes are idempotent so matching counts are left alone
            if workload.desired == target {
                continue;
            }
            // remember the original count before the first write down to zero
            if !active && workload.desired > 0 {
                originals.entry(workload.key()).or_insert(workload.desired);
            }
            if let Err(error) = store
                .scale(namespace, workload.kind, &workload.name, target)
                .await
            {
                // failed writes block this group but not the reconcile
                if error.is_not_found() {
                    event!(
                        Level::WARN,
                        msg = "Workload vanished before scaling",
                        namespace = namespace,
                        workload = %workload.key()
                    );
                } else {
                    event!(
                        Level::ERROR,
                        msg = "Failed to scale workload",
                        namespace = namespace,
                        workload = %workload.key(),
                        error = %error
                    );
                }
            }
        }
        // recheck whether this group settled after the writes
        if !is_group_ready(store, namespace, group, active).await? {
            if timeout_passed {
                // the barrier held too long so step past this group
                event!(
                    Level::WARN,
                    msg = "Bypassing unready priority group after timeout",
                    namespace = namespace,
                    priority = *priority
                );
                continue;
            }
            return Ok(ScaleOutcome {
                originals,
                all_ready: false,
            });
        }
        // the group settled so restored workloads drop their entries
        if active {
            for workload in group {
                originals.remove(&workload.key());
            }
        }
    }
    Ok(ScaleOutcome {
        originals,
        all_ready: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::workloads::{DryRun, WorkloadKind};

    /// Turn raw strs into the owned patterns the api hands us
    fn raw(patterns: &[&str]) -> Vec<String> {
        patterns.iter().map(|p| (*p).to_owned()).collect()
    }

    /// Scaling down then up restores the original replica counts
    #[tokio::test]
    async fn round_trip_restores_original_replicas() {
        let store = DryRun::settled();
        store.insert("demo", Workload::new(WorkloadKind::Deployment, "api", 3, 3, 3));
        // scale the namespace down
        let outcome = scale_target(&store, "demo", false, &[], &[], BTreeMap::default(), false)
            .await
            .unwrap();
        assert!(outcome.all_ready);
        assert_eq!(outcome.originals.get("Deployment/api"), Some(&3));
        let down = store
            .workload("demo", WorkloadKind::Deployment, "api")
            .unwrap();
        assert_eq!(down.desired, 0);
        // then bring it back up
        let outcome = scale_target(&store, "demo", true, &[], &[], outcome.originals, false)
            .await
            .unwrap();
        assert!(outcome.all_ready);
        // the entry is erased once the workload is restored and ready
        assert!(outcome.originals.is_empty());
        let restored = store
            .workload("demo", WorkloadKind::Deployment, "api")
            .unwrap();
        assert_eq!(restored.desired, 3);
        assert_eq!(restored.ready, 3);
    }

    /// Workloads that were never recorded come up at their observed count or one
    #[tokio::test]
    async fn unrecorded_workloads_default_up() {
        let store = DryRun::settled();
        store.insert("demo", Workload::new(WorkloadKind::Deployment, "fresh", 0, 0, 0));
        let outcome = scale_target(&store, "demo", true, &[], &[], BTreeMap::default(), false)
            .await
            .unwrap();
        assert!(outcome.all_ready);
        let up = store
            .workload("demo", WorkloadKind::Deployment, "fresh")
            .unwrap();
        assert_eq!(up.desired, 1);
    }

    /// A wildcard exclusion turns scale down into a no op
    #[tokio::test]
    async fn wildcard_exclusion_is_a_no_op() {
        let store = DryRun::settled();
        store.insert("demo", Workload::new(WorkloadKind::Deployment, "api", 3, 3, 3));
        store.insert("demo", Workload::new(WorkloadKind::StatefulSet, "db", 2, 2, 2));
        let outcome = scale_target(
            &store,
            "demo",
            false,
            &[],
            &raw(&["*"]),
            BTreeMap::default(),
            false,
        )
        .await
        .unwrap();
        assert!(outcome.all_ready);
        assert!(outcome.originals.is_empty());
        // nothing was written
        let api = store
            .workload("demo", WorkloadKind::Deployment, "api")
            .unwrap();
        assert_eq!(api.desired, 3);
        let db = store
            .workload("demo", WorkloadKind::StatefulSet, "db")
            .unwrap();
        assert_eq!(db.desired, 2);
    }

    /// A single excluded workload is skipped while the rest scale
    #[tokio::test]
    async fn excluded_workloads_are_untouched() {
        let store = DryRun::settled();
        store.insert("demo", Workload::new(WorkloadKind::Deployment, "api", 3, 3, 3));
        store.insert("demo", Workload::new(WorkloadKind::Deployment, "vault", 1, 1, 1));
        let outcome = scale_target(
            &store,
            "demo",
            false,
            &[],
            &raw(&["vault"]),
            BTreeMap::default(),
            false,
        )
        .await
        .unwrap();
        assert!(outcome.all_ready);
        assert_eq!(outcome.originals.get("Deployment/api"), Some(&3));
        assert!(!outcome.originals.contains_key("Deployment/vault"));
        let vault = store
            .workload("demo", WorkloadKind::Deployment, "vault")
            .unwrap();
        assert_eq!(vault.desired, 1);
    }

    /// The next priority group waits until the current one converges
    #[tokio::test]
    async fn strict_barrier_holds_between_priorities() {
        let store = DryRun::new();
        store.insert("demo", Workload::new(WorkloadKind::StatefulSet, "db-main", 2, 2, 2));
        store.insert("demo", Workload::new(WorkloadKind::Deployment, "web", 2, 2, 2));
        let sequence = raw(&["db-*", "*"]);
        // the first pass writes the db and stops at the barrier
        let outcome = scale_target(
            &store,
            "demo",
            false,
            &sequence,
            &[],
            BTreeMap::default(),
            false,
        )
        .await
        .unwrap();
        assert!(!outcome.all_ready);
        let db = store
            .workload("demo", WorkloadKind::StatefulSet, "db-main")
            .unwrap();
        assert_eq!(db.desired, 0);
        let web = store
            .workload("demo", WorkloadKind::Deployment, "web")
            .unwrap();
        assert_eq!(web.desired, 2);
        // once the db drains the next pass reaches the web group
        store.settle_namespace("demo");
        let outcome = scale_target(&store, "demo", false, &sequence, &[], outcome.originals, false)
            .await
            .unwrap();
        assert!(!outcome.all_ready);
        let web = store
            .workload("demo", WorkloadKind::Deployment, "web")
            .unwrap();
        assert_eq!(web.desired, 0);
        // both originals were recorded along the way
        assert_eq!(outcome.originals.get("StatefulSet/db-main"), Some(&2));
        assert_eq!(outcome.originals.get("Deployment/web"), Some(&2));
        // and the namespace settles on the final pass
        store.settle_namespace("demo");
        let outcome = scale_target(&store, "demo", false, &sequence, &[], outcome.originals, false)
            .await
            .unwrap();
        assert!(outcome.all_ready);
    }

    /// Scale ups walk the priority groups in reverse
    #[tokio::test]
    async fn scale_ups_reverse_the_order() {
        let store = DryRun::new();
        store.insert("demo", Workload::new(WorkloadKind::StatefulSet, "db-main", 0, 0, 0));
        store.insert("demo", Workload::new(WorkloadKind::Deployment, "web", 0, 0, 0));
        let sequence = raw(&["db-*", "*"]);
        let mut originals = BTreeMap::default();
        originals.insert("StatefulSet/db-main".to_owned(), 2);
        originals.insert("Deployment/web".to_owned(), 3);
        // the first pass up touches the web group and holds at the barrier
        let outcome = scale_target(&store, "demo", true, &sequence, &[], originals, false)
            .await
            .unwrap();
        assert!(!outcome.all_ready);
        let web = store
            .workload("demo", WorkloadKind::Deployment, "web")
            .unwrap();
        assert_eq!(web.desired, 3);
        let db = store
            .workload("demo", WorkloadKind::StatefulSet, "db-main")
            .unwrap();
        assert_eq!(db.desired, 0);
    }

    /// A timed out barrier lets later priority groups proceed
    #[tokio::test]
    async fn timeout_bypasses_the_barrier() {
        let store = DryRun::new();
        store.insert("demo", Workload::new(WorkloadKind::StatefulSet, "db-main", 2, 2, 2));
        store.insert("demo", Workload::new(WorkloadKind::Deployment, "web", 2, 2, 2));
        let sequence = raw(&["db-*", "*"]);
        let outcome = scale_target(
            &store,
            "demo",
            false,
            &sequence,
            &[],
            BTreeMap::default(),
            true,
        )
        .await
        .unwrap();
        // both groups were written even though neither converged
        let db = store
            .workload("demo", WorkloadKind::StatefulSet, "db-main")
            .unwrap();
        assert_eq!(db.desired, 0);
        let web = store
            .workload("demo", WorkloadKind::Deployment, "web")
            .unwrap();
        assert_eq!(web.desired, 0);
        assert!(outcome.all_ready);
    }

    /// Writes are skipped when the observed count already matches
    #[tokio::test]
    async fn matching_counts_take_no_writes() {
        let store = DryRun::new();
        // desired is already zero but pods are still draining
        store.insert("demo", Workload::new(WorkloadKind::Deployment, "api", 0, 1, 0));
        let outcome = scale_target(&store, "demo", false, &[], &[], BTreeMap::default(), false)
            .await
            .unwrap();
        assert!(!outcome.all_ready);
        // no original was recorded since nothing was scaled down
        assert!(outcome.originals.is_empty());
    }

    /// Entries survive until the workload is observed ready at its original count
    #[tokio::test]
    async fn entries_survive_until_restored() {
        let store = DryRun::new();
        store.insert("demo", Workload::new(WorkloadKind::Deployment, "api", 0, 0, 0));
        let mut originals = BTreeMap::default();
        originals.insert("Deployment/api".to_owned(), 3);
        // the scale up lands but readiness lags
        let outcome = scale_target(&store, "demo", true, &[], &[], originals, false)
            .await
            .unwrap();
        assert!(!outcome.all_ready);
        assert_eq!(outcome.originals.get("Deployment/api"), Some(&3));
        // once ready the entry is erased
        store.settle_namespace("demo");
        let outcome = scale_target(&store, "demo", true, &[], &[], outcome.originals, false)
            .await
            .unwrap();
        assert!(outcome.all_ready);
        assert!(outcome.originals.is_empty());
    }
}
