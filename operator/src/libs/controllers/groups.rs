//! Reconciles multi namespace scaling groups

use chrono::Utc;
use futures::StreamExt;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::{Event, EventType};
use kube::runtime::watcher;
use kube::{Resource, ResourceExt};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{event, instrument, Level};

use super::{barrier_timeout, status_patch, State};
use crate::libs::crds::{ScalingConfig, ScalingGroup, ScalingGroupStatus, ScalingPhase};
use crate::libs::errors::Error;
use crate::libs::scaling;
use crate::libs::schedules;
use crate::libs::workloads::Workloads;

/// The per namespace sequence and exclusions inherited from a config
#[derive(Debug, Clone, Default)]
pub struct NamespacePolicy {
    /// Name patterns ordering workloads into priority groups
    pub sequence: Vec<String>,
    /// Name patterns for workloads that must never be scaled
    pub exclusions: Vec<String>,
}

/// What a pass over a groups stages produced
#[derive(Debug, Clone)]
pub struct StageRun {
    /// The updated original replica map keyed by "Namespace/Kind/Name"
    pub originals: BTreeMap<String, i32>,
    /// Whether every stage converged
    pub all_ready: bool,
    /// The first stage that blocked this pass
    pub blocked_stage: usize,
    /// The namespaces holding unready stages up
    pub blocking: Vec<String>,
    /// How many namespaces were acted on
    pub managed: i32,
    /// How many namespaces have reached the desired state
    pub ready: i32,
    /// How many namespaces were considered
    pub total: i32,
}

/// Expand a groups sequence into stages of namespaces
///
/// Empty sequences collapse to a single stage holding every namespace.
/// Namespaces not named in any stage are appended as an implicit final
/// stage. Stages come out in scale up order.
///
/// # Arguments
///
/// * `sequence` - The stage elements as whitespace separated namespace lists
/// * `namespaces` - The namespaces this group owns
pub fn build_stages(sequence: &[String], namespaces: &BTreeSet<String>) -> Vec<Vec<String>> {
    // without a sequence everything lands in one stage
    if sequence.is_empty() {
        return vec![namespaces.iter().cloned().collect()];
    }
    let mut stages = Vec::with_capacity(sequence.len() + 1);
    let mut staged: BTreeSet<String> = BTreeSet::default();
    for element in sequence {
        let stage: Vec<String> = element.split_whitespace().map(str::to_owned).collect();
        if stage.is_empty() {
            continue;
        }
        staged.extend(stage.iter().cloned());
        stages.push(stage);
    }
    // anything the sequence missed forms an implicit final stage
    let implicit: Vec<String> = namespaces
        .iter()
        .filter(|namespace| !staged.contains(*namespace))
        .cloned()
        .collect();
    if !implicit.is_empty() {
        stages.push(implicit);
    }
    stages
}

/// Expand a groups sequence into stages in execution order
///
/// The sequence is written in scale up order so tear downs walk the
/// stages mirrored.
///
/// # Arguments
///
/// * `sequence` - The stage elements as whitespace separated namespace lists
/// * `namespaces` - The namespaces this group owns
/// * `active` - Whether the target state is scaled up
pub fn execution_stages(
    sequence: &[String],
    namespaces: &BTreeSet<String>,
    active: bool,
) -> Vec<Vec<String>> {
    let mut stages = build_stages(sequence, namespaces);
    if !active {
        stages.reverse();
    }
    stages
}

/// Drive every stage of a group toward the target state
///
/// Stages run strictly in order: an unready stage stops the pass unless
/// the barrier was already bypassed by the timeout, in which case later
/// stages still proceed while the pass reports unready.
///
/// # Arguments
///
/// * `store` - The workload store to read and write through
/// * `stages` - The stages to walk in execution order
/// * `active` - Whether the target state is scaled up
/// * `policies` - The per namespace policies inherited from configs
/// * `originals` - The groups recorded original replica counts
/// * `timeout_passed` - Whether the stage barrier may be bypassed
pub async fn run_stages(
    store: &dyn Workloads,
    stages: &[Vec<String>],
    active: bool,
    policies: &HashMap<String, NamespacePolicy>,
    mut originals: BTreeMap<String, i32>,
    timeout_passed: bool,
) -> StageRun {
    let mut run = StageRun {
        originals: BTreeMap::default(),
        all_ready: true,
        blocked_stage: 0,
        blocking: Vec::default(),
        managed: 0,
        ready: 0,
        total: 0,
    };
    for (index, stage) in stages.iter().enumerate() {
        let mut stage_ready = true;
        for namespace in stage {
            run.total += 1;
            // inherit this namespaces sequence and exclusions when a config exists
            let policy = policies.get(namespace).cloned().unwrap_or_default();
            // carve this namespaces entries out of the groups map
            let prefix = format!("{}/", namespace);
            let sub: BTreeMap<String, i32> = originals
                .iter()
                .filter(|(key, _)| key.starts_with(&prefix))
                .map(|(key, count)| (key[prefix.len()..].to_owned(), *count))
                .collect();
            match scaling::scale_target(
                store,
                namespace,
                active,
                &policy.sequence,
                &policy.exclusions,
                sub,
                timeout_passed,
            )
            .await
            {
                Ok(outcome) => {
                    run.managed += 1;
                    // fold the updated entries back in under the namespace prefix
                    originals.retain(|key, _| !key.starts_with(&prefix));
                    for (key, count) in outcome.originals {
                        originals.insert(format!("{}{}", prefix, key), count);
                    }
                    // judge readiness off the namespaces derived phase
                    match scaling::compute_phase(store, namespace, active).await {
                        Ok(phase) if phase == ScalingPhase::settled(active) => run.ready += 1,
                        Ok(_) => {
                            stage_ready = false;
                            run.blocking.push(namespace.clone());
                        }
                        Err(error) => {
                            event!(
                                Level::ERROR,
                                msg = "Failed to derive namespace phase",
                                namespace = namespace.as_str(),
                                error = %error
                            );
                            stage_ready = false;
                            run.blocking.push(namespace.clone());
                        }
                    }
                }
                Err(error) => {
                    // a failed namespace blocks its stage but not the reconcile
                    event!(
                        Level::ERROR,
                        msg = "Failed to scale namespace",
                        namespace = namespace.as_str(),
                        error = %error
                    );
                    stage_ready = false;
                    run.blocking.push(namespace.clone());
                }
            }
        }
        if !stage_ready {
            // remember the first stage that blocked for events
            if run.all_ready {
                run.blocked_stage = index;
            }
            run.all_ready = false;
            // never start the next stage unless the barrier timed out
            if !timeout_passed {
                break;
            }
        }
    }
    run.originals = originals;
    run
}

/// Handle errors in the reconcile process
///
/// # Arguments
///
/// * `_group` - The group whose reconcile failed
/// * `error` - The error that was hit
/// * `state` - The shared controller state
pub fn error_policy(_group: Arc<ScalingGroup>, error: &Error, state: Arc<State>) -> Action {
    // conflicts are expected churn under optimistic concurrency
    if error.is_conflict() {
        event!(
            Level::DEBUG,
            msg = "ScalingGroup reconcile hit a write conflict",
            error = %error
        );
    } else {
        event!(
            Level::ERROR,
            msg = "ScalingGroup reconcile failed",
            error = %error
        );
    }
    Action::requeue(Duration::from_secs(state.conf.requeue.converging))
}

/// Reconcile changes to a single scaling group
///
/// # Arguments
///
/// * `group` - The group being reconciled
/// * `state` - The shared controller state
#[instrument(
    name = "controllers::groups::reconcile",
    skip_all,
    fields(group = %group.name_any())
)]
pub async fn reconcile(group: Arc<ScalingGroup>, state: Arc<State>) -> Result<Action, Error> {
    let api: Api<ScalingGroup> = Api::namespaced(state.client.clone(), &state.conf.namespace);
    let name = group.name_any();
    let now = Utc::now();
    let old = group.status.clone().unwrap_or_default();
    // evaluate the schedule for the desired state
    let active = schedules::is_active(&group.spec.schedules, group.spec.active, now);
    // a group stuck converging eventually bypasses the stage barrier
    let timeout_passed = barrier_timeout(
        old.phase.map(|phase| phase.scaling()).unwrap_or(false),
        old.last_action,
        now,
        state.conf.scaling.timeout,
    );
    // expand the sequence into stages and mirror them on the way down
    let stages = execution_stages(&group.spec.sequence, &group.spec.namespaces, active);
    // inherit per namespace policies from any matching configs
    let policies = namespace_policies(&state).await?;
    let run = run_stages(
        state.store.as_ref(),
        &stages,
        active,
        &policies,
        old.original_replicas.clone(),
        timeout_passed,
    )
    .await;
    // fold the pass into an aggregate phase
    let phase = if run.all_ready {
        ScalingPhase::settled(active)
    } else {
        ScalingPhase::converging(active)
    };
    let mut last_action = old.last_action;
    if old.phase != Some(phase) || last_action.is_none() {
        last_action = Some(now);
        emit(
            &state,
            &group,
            EventType::Normal,
            "PhaseTransition",
            format!("{} entered {}", name, phase),
        )
        .await;
    }
    // surface stuck stages and progress to the user
    if !run.all_ready {
        let blockers = run.blocking.join(", ");
        if timeout_passed {
            emit(
                &state,
                &group,
                EventType::Warning,
                "ScalingTimeout",
                format!("Stage {} timed out waiting on {}", run.blocked_stage, blockers),
            )
            .await;
        } else {
            emit(
                &state,
                &group,
                EventType::Normal,
                "ScalingActive",
                format!("Stage {} waiting on {}", run.blocked_stage, blockers),
            )
            .await;
        }
    }
    if run.ready > old.namespaces_ready {
        emit(
            &state,
            &group,
            EventType::Normal,
            "ScalingProgress",
            format!("{}/{} namespaces ready", run.ready, run.total),
        )
        .await;
    }
    let status = ScalingGroupStatus {
        phase: Some(phase),
        last_action,
        original_replicas: run.originals.clone(),
        managed_count: run.managed,
        namespaces_ready: run.ready,
        namespaces_total: run.total,
    };
    let patch = status_patch(&status, &old.original_replicas, &run.originals)?;
    api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    // requeue quickly until every stage settles
    let delay = if run.all_ready {
        state.conf.requeue.steady
    } else {
        state.conf.requeue.converging
    };
    Ok(Action::requeue(Duration::from_secs(delay)))
}

/// Look up the sequence and exclusions configs define for their namespaces
///
/// # Arguments
///
/// * `state` - The shared controller state
async fn namespace_policies(state: &State) -> Result<HashMap<String, NamespacePolicy>, Error> {
    let configs: Api<ScalingConfig> = Api::namespaced(state.client.clone(), &state.conf.namespace);
    let mut policies = HashMap::default();
    for config in configs.list(&ListParams::default()).await?.items {
        let policy = NamespacePolicy {
            sequence: config.spec.sequence.clone(),
            exclusions: config.spec.exclusions.clone(),
        };
        policies.insert(config.spec.target_namespace.clone(), policy);
    }
    Ok(policies)
}

/// Publish an event onto a group ignoring delivery failures
///
/// Events are user facing breadcrumbs so lost ones only get logged.
///
/// # Arguments
///
/// * `state` - The shared controller state
/// * `group` - The group to publish this event onto
/// * `type_` - Whether this is a normal or warning event
/// * `reason` - The reason tag for this event
/// * `note` - The human readable note to attach
async fn emit(state: &State, group: &ScalingGroup, type_: EventType, reason: &str, note: String) {
    let reference = group.object_ref(&());
    let published = Event {
        type_,
        reason: reason.to_owned(),
        note: Some(note),
        action: "Scaling".to_owned(),
        secondary: None,
    };
    if let Err(error) = state.recorder.publish(&published, &reference).await {
        event!(
            Level::DEBUG,
            msg = "Failed to publish event",
            reason = reason,
            error = %error
        );
    }
}

/// Run the scaling group controller until shutdown
///
/// # Arguments
///
/// * `state` - The shared controller state
pub async fn run(state: &State) {
    let api: Api<ScalingGroup> = Api::namespaced(state.client.clone(), &state.conf.namespace);
    // watch for group changes in our own namespace
    Controller::new(api, watcher::Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context())
        .filter_map(|reconciled| async move { reconciled.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::workloads::{DryRun, Workload, WorkloadKind};

    /// Turn raw strs into the owned elements the api hands us
    fn raw(elements: &[&str]) -> Vec<String> {
        elements.iter().map(|e| (*e).to_owned()).collect()
    }

    /// Build the namespace set for a group
    fn namespaces(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| (*n).to_owned()).collect()
    }

    /// Sequences split on whitespace and pick up an implicit final stage
    #[test]
    fn builds_stages_with_an_implicit_tail() {
        let stages = build_stages(&raw(&["a", "b c"]), &namespaces(&["a", "b", "c", "d"]));
        assert_eq!(
            stages,
            vec![
                vec!["a".to_owned()],
                vec!["b".to_owned(), "c".to_owned()],
                vec!["d".to_owned()],
            ]
        );
    }

    /// An empty sequence collapses to a single stage of every namespace
    #[test]
    fn empty_sequences_form_one_stage() {
        let stages = build_stages(&[], &namespaces(&["b", "a"]));
        assert_eq!(stages, vec![vec!["a".to_owned(), "b".to_owned()]]);
    }

    /// Fully staged groups take no implicit tail
    #[test]
    fn fully_staged_groups_take_no_tail() {
        let stages = build_stages(&raw(&["a", "b"]), &namespaces(&["a", "b"]));
        assert_eq!(stages, vec![vec!["a".to_owned()], vec!["b".to_owned()]]);
    }

    /// Tear downs walk the stages in mirrored order
    #[test]
    fn scale_downs_mirror_the_stages() {
        let sequence = raw(&["a", "b c"]);
        let owned = namespaces(&["a", "b", "c", "d"]);
        let up = execution_stages(&sequence, &owned, true);
        assert_eq!(up[0], vec!["a".to_owned()]);
        assert_eq!(up[2], vec!["d".to_owned()]);
        let down = execution_stages(&sequence, &owned, false);
        assert_eq!(down[0], vec!["d".to_owned()]);
        assert_eq!(down[1], vec!["b".to_owned(), "c".to_owned()]);
        assert_eq!(down[2], vec!["a".to_owned()]);
    }

    /// Blank sequence elements are dropped without forming stages
    #[test]
    fn blank_elements_form_no_stage() {
        let stages = build_stages(&raw(&["a", "  ", "b"]), &namespaces(&["a", "b"]));
        assert_eq!(stages, vec![vec!["a".to_owned()], vec!["b".to_owned()]]);
    }

    /// Build a pretend cluster with one deployment per namespace
    fn staged_store(names: &[&str], desired: i32) -> DryRun {
        let store = DryRun::new();
        for name in names {
            let workload = Workload::new(WorkloadKind::Deployment, "app", desired, desired, desired);
            store.insert(name, workload);
        }
        store
    }

    /// Later stages wait until the current stage converges
    #[tokio::test]
    async fn stages_hold_at_the_barrier() {
        let store = staged_store(&["a", "b", "c", "d"], 0);
        let stages = vec![
            vec!["a".to_owned()],
            vec!["b".to_owned(), "c".to_owned()],
            vec!["d".to_owned()],
        ];
        let policies = HashMap::default();
        // the first pass up only touches stage zero
        let run = run_stages(&store, &stages, true, &policies, BTreeMap::default(), false).await;
        assert!(!run.all_ready);
        assert_eq!(run.blocked_stage, 0);
        assert_eq!(run.blocking, vec!["a".to_owned()]);
        assert_eq!(run.total, 1);
        assert_eq!(store.workload("a", WorkloadKind::Deployment, "app").unwrap().desired, 1);
        assert_eq!(store.workload("b", WorkloadKind::Deployment, "app").unwrap().desired, 0);
        assert_eq!(store.workload("d", WorkloadKind::Deployment, "app").unwrap().desired, 0);
        // once stage zero settles the next pass reaches stage one
        store.settle_namespace("a");
        let run = run_stages(&store, &stages, true, &policies, run.originals, false).await;
        assert!(!run.all_ready);
        assert_eq!(run.blocked_stage, 1);
        assert_eq!(run.ready, 1);
        assert_eq!(store.workload("b", WorkloadKind::Deployment, "app").unwrap().desired, 1);
        assert_eq!(store.workload("c", WorkloadKind::Deployment, "app").unwrap().desired, 1);
        assert_eq!(store.workload("d", WorkloadKind::Deployment, "app").unwrap().desired, 0);
        // and the final pass converges once everything settles
        store.settle_namespace("b");
        store.settle_namespace("c");
        let run = run_stages(&store, &stages, true, &policies, run.originals, false).await;
        assert!(!run.all_ready);
        store.settle_namespace("d");
        let run = run_stages(&store, &stages, true, &policies, run.originals, false).await;
        assert!(run.all_ready);
        assert_eq!(run.ready, 4);
        assert_eq!(run.total, 4);
    }

    /// A timed out barrier lets later stages proceed while reporting blockers
    #[tokio::test]
    async fn timeouts_push_past_blocked_stages() {
        let store = staged_store(&["a", "b"], 0);
        let stages = vec![vec!["a".to_owned()], vec!["b".to_owned()]];
        let policies = HashMap::default();
        let run = run_stages(&store, &stages, true, &policies, BTreeMap::default(), true).await;
        assert!(!run.all_ready);
        assert_eq!(run.blocked_stage, 0);
        assert!(run.blocking.contains(&"a".to_owned()));
        assert!(run.blocking.contains(&"b".to_owned()));
        // stage one was written despite stage zero never settling
        assert_eq!(store.workload("b", WorkloadKind::Deployment, "app").unwrap().desired, 1);
    }

    /// Original replica entries come back under their namespace prefix
    #[tokio::test]
    async fn originals_carry_the_namespace_prefix() {
        let store = DryRun::new();
        store.insert("a", Workload::new(WorkloadKind::Deployment, "app", 3, 3, 3));
        let stages = vec![vec!["a".to_owned()]];
        let policies = HashMap::default();
        let run = run_stages(&store, &stages, false, &policies, BTreeMap::default(), false).await;
        assert_eq!(run.originals.get("a/Deployment/app"), Some(&3));
        // the prefixed entry feeds the restore on the way back up
        store.settle_namespace("a");
        let run = run_stages(&store, &stages, true, &policies, run.originals, false).await;
        assert_eq!(store.workload("a", WorkloadKind::Deployment, "app").unwrap().desired, 3);
        assert!(!run.all_ready);
    }

    /// Inherited exclusions keep config protected workloads untouched
    #[tokio::test]
    async fn inherited_exclusions_hold() {
        let store = DryRun::new();
        store.insert("a", Workload::new(WorkloadKind::Deployment, "app", 2, 2, 2));
        store.insert("a", Workload::new(WorkloadKind::Deployment, "vault", 1, 1, 1));
        let stages = vec![vec!["a".to_owned()]];
        let mut policies = HashMap::default();
        policies.insert(
            "a".to_owned(),
            NamespacePolicy {
                sequence: Vec::default(),
                exclusions: raw(&["vault"]),
            },
        );
        let run = run_stages(&store, &stages, false, &policies, BTreeMap::default(), false).await;
        assert_eq!(store.workload("a", WorkloadKind::Deployment, "app").unwrap().desired, 0);
        assert_eq!(store.workload("a", WorkloadKind::Deployment, "vault").unwrap().desired, 1);
        assert!(!run.originals.contains_key("a/Deployment/vault"));
    }

    /// Namespaces without workloads count as settled and never block
    #[tokio::test]
    async fn empty_namespaces_do_not_block() {
        let store = DryRun::new();
        store.insert("b", Workload::new(WorkloadKind::Deployment, "app", 0, 0, 0));
        let stages = vec![vec!["a".to_owned()], vec!["b".to_owned()]];
        let policies = HashMap::default();
        let run = run_stages(&store, &stages, true, &policies, BTreeMap::default(), false).await;
        assert!(!run.all_ready);
        // the empty namespace passed straight through to stage one
        assert_eq!(run.blocked_stage, 1);
        assert_eq!(run.ready, 1);
        let touched = store.workload("b", WorkloadKind::Deployment, "app").unwrap();
        assert_eq!(touched.desired, 1);
    }
}
