//! The controllers reconciling nightshift resources
//!
//! Two independent reconcile loops run side by side: one over per
//! namespace scaling configs and one over multi namespace scaling groups.
//! Both share a client, the operator config, the workload store and an
//! event recorder through [State].

use chrono::{DateTime, Duration, Utc};
use kube::client::Client;
use kube::runtime::events::{Recorder, Reporter};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod configs;
pub mod groups;

use crate::conf::Conf;
use crate::libs::errors::Error;
use crate::libs::workloads::Workloads;

/// Controller state shared by both reconcilers
#[derive(Clone)]
pub struct State {
    /// A client for the k8s api
    pub client: Client,
    /// The operator config
    pub conf: Conf,
    /// The store workload reads and writes go through
    pub store: Arc<dyn Workloads>,
    /// The recorder events get published through
    pub recorder: Recorder,
}

impl State {
    /// Build the shared controller state
    ///
    /// # Arguments
    ///
    /// * `client` - A client for the k8s api
    /// * `conf` - The operator config
    /// * `store` - The store workload reads and writes go through
    pub fn new(client: Client, conf: Conf, store: Arc<dyn Workloads>) -> Self {
        // events name this operator as their source
        let reporter = Reporter {
            controller: "nightshift-operator".into(),
            instance: None,
        };
        let recorder = Recorder::new(client.clone(), reporter);
        State {
            client,
            conf,
            store,
            recorder,
        }
    }

    /// Wrap this state in an Arc for the controller runtime
    pub fn to_context(&self) -> Arc<State> {
        Arc::new(self.clone())
    }
}

/// Check whether a converging target has sat unready past the barrier window
///
/// # Arguments
///
/// * `scaling` - Whether the phase is one of the transitional ones
/// * `last_action` - When the phase last changed
/// * `now` - The current wall clock time
/// * `window` - The barrier window in seconds
pub fn barrier_timeout(
    scaling: bool,
    last_action: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: i64,
) -> bool {
    match last_action {
        Some(last) if scaling => now - last > Duration::seconds(window),
        _ => false,
    }
}

/// Build a status merge patch that also clears dropped original replica keys
///
/// Merge patches leave absent keys untouched so entries removed from the
/// original replica map get tombstoned with explicit nulls.
///
/// # Arguments
///
/// * `status` - The status to persist
/// * `before` - The original replica map the reconcile started from
/// * `after` - The original replica map the reconcile produced
pub fn status_patch<S: Serialize>(
    status: &S,
    before: &BTreeMap<String, i32>,
    after: &BTreeMap<String, i32>,
) -> Result<serde_json::Value, Error> {
    let mut value = serde_json::to_value(status)?;
    if let Some(map) = value
        .get_mut("originalReplicas")
        .and_then(|replicas| replicas.as_object_mut())
    {
        for key in before.keys() {
            if !after.contains_key(key) {
                map.insert(key.clone(), serde_json::Value::Null);
            }
        }
    }
    Ok(serde_json::json!({ "status": value }))
}
