//! Reconciles per namespace scaling configs

use chrono::Utc;
use futures::StreamExt;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::ResourceExt;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{event, instrument, Level};

use super::{barrier_timeout, status_patch, State};
use crate::libs::crds::{ConfigPhase, ScalingConfig, ScalingConfigStatus, ScalingGroup};
use crate::libs::errors::Error;
use crate::libs::scaling;
use crate::libs::schedules;

/// Handle errors in the reconcile process
///
/// # Arguments
///
/// * `_config` - The config whose reconcile failed
/// * `error` - The error that was hit
/// * `state` - The shared controller state
pub fn error_policy(_config: Arc<ScalingConfig>, error: &Error, state: Arc<State>) -> Action {
    // conflicts are expected churn under optimistic concurrency
    if error.is_conflict() {
        event!(
            Level::DEBUG,
            msg = "ScalingConfig reconcile hit a write conflict",
            error = %error
        );
    } else {
        event!(
            Level::ERROR,
            msg = "ScalingConfig reconcile failed",
            error = %error
        );
    }
    Action::requeue(Duration::from_secs(state.conf.requeue.converging))
}

/// Reconcile changes to a single scaling config
///
/// Configs whose namespace is owned by a group stand down entirely and
/// only report the override through their phase.
///
/// # Arguments
///
/// * `config` - The config being reconciled
/// * `state` - The shared controller state
#[instrument(
    name = "controllers::configs::reconcile",
    skip_all,
    fields(config = %config.name_any())
)]
pub async fn reconcile(config: Arc<ScalingConfig>, state: Arc<State>) -> Result<Action, Error> {
    let api: Api<ScalingConfig> = Api::namespaced(state.client.clone(), &state.conf.namespace);
    let name = config.name_any();
    let target = &config.spec.target_namespace;
    let now = Utc::now();
    let old = config.status.clone().unwrap_or_default();
    // groups own their namespaces outright so look for one before scaling anything
    let groups: Api<ScalingGroup> = Api::namespaced(state.client.clone(), &state.conf.namespace);
    let owned = groups
        .list(&ListParams::default())
        .await?
        .items
        .iter()
        .any(|group| group.spec.namespaces.contains(target));
    if owned {
        // hand the namespace to the group and check back in later
        let mut status = old.clone();
        if status.phase != Some(ConfigPhase::OverriddenByGroup) || status.last_action.is_none() {
            status.last_action = Some(now);
        }
        status.phase = Some(ConfigPhase::OverriddenByGroup);
        let patch = status_patch(&status, &old.original_replicas, &status.original_replicas)?;
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        return Ok(Action::requeue(Duration::from_secs(
            state.conf.requeue.overridden,
        )));
    }
    // evaluate the schedule for the desired state
    let active = schedules::is_active(&config.spec.schedules, config.spec.active, now);
    // derive the phase this namespace currently sits in
    let phase =
        ConfigPhase::from(scaling::compute_phase(state.store.as_ref(), target, active).await?);
    let mut last_action = old.last_action;
    if old.phase != Some(phase) || last_action.is_none() {
        last_action = Some(now);
    }
    // a target stuck converging eventually bypasses the stage barrier
    let timeout_passed = barrier_timeout(
        phase.scaling(),
        last_action,
        now,
        state.conf.scaling.timeout,
    );
    // drive the namespace toward the desired state
    let outcome = scaling::scale_target(
        state.store.as_ref(),
        target,
        active,
        &config.spec.sequence,
        &config.spec.exclusions,
        old.original_replicas.clone(),
        timeout_passed,
    )
    .await?;
    let status = ScalingConfigStatus {
        phase: Some(phase),
        last_action,
        original_replicas: outcome.originals.clone(),
    };
    let patch = status_patch(&status, &old.original_replicas, &outcome.originals)?;
    api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    // requeue quickly until this namespace settles
    let delay = if outcome.all_ready {
        state.conf.requeue.steady
    } else {
        state.conf.requeue.converging
    };
    Ok(Action::requeue(Duration::from_secs(delay)))
}

/// Run the scaling config controller until shutdown
///
/// # Arguments
///
/// * `state` - The shared controller state
pub async fn run(state: &State) {
    let api: Api<ScalingConfig> = Api::namespaced(state.client.clone(), &state.conf.namespace);
    // watch for config changes in our own namespace
    Controller::new(api, watcher::Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context())
        .filter_map(|reconciled| async move { reconciled.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
}
