//! The custom resources nightshift reconciles

use chrono::{DateTime, Utc};
use kube_derive::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One recurring window a target should be scaled up in
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScalingSchedule {
    /// The weekdays this window applies to (0 = Sunday through 6 = Saturday)
    #[serde(default)]
    pub days: Vec<u8>,
    /// When this window opens as HH:MM
    pub start: String,
    /// When this window closes as HH:MM (inclusive)
    pub end: String,
    /// The IANA timezone to evaluate this window in (operator local time when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// The externally observable state of a scaling target
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ScalingPhase {
    /// All workloads are at their desired counts and ready
    ScaledUp,
    /// Some workloads are still coming up
    ScalingUp,
    /// All workloads are at zero
    ScaledDown,
    /// Some workloads are still draining to zero
    ScalingDown,
    /// The target should be down but nothing has reached zero yet
    PartlyScaled,
}

impl ScalingPhase {
    /// The phase a target settles in once it matches the desired state
    ///
    /// # Arguments
    ///
    /// * `active` - Whether the target state is scaled up
    pub fn settled(active: bool) -> Self {
        if active {
            ScalingPhase::ScaledUp
        } else {
            ScalingPhase::ScaledDown
        }
    }

    /// The phase a target moves through while converging
    ///
    /// # Arguments
    ///
    /// * `active` - Whether the target state is scaled up
    pub fn converging(active: bool) -> Self {
        if active {
            ScalingPhase::ScalingUp
        } else {
            ScalingPhase::ScalingDown
        }
    }

    /// Whether this is one of the transitional scaling phases
    pub fn scaling(&self) -> bool {
        matches!(self, ScalingPhase::ScalingUp | ScalingPhase::ScalingDown)
    }
}

impl std::fmt::Display for ScalingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            ScalingPhase::ScaledUp => "ScaledUp",
            ScalingPhase::ScalingUp => "ScalingUp",
            ScalingPhase::ScaledDown => "ScaledDown",
            ScalingPhase::ScalingDown => "ScalingDown",
            ScalingPhase::PartlyScaled => "PartlyScaled",
        };
        write!(f, "{}", name)
    }
}

/// The externally observable state of a scaling config
///
/// Configs can additionally be overridden outright by a group that owns
/// their target namespace.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ConfigPhase {
    /// All workloads are at their desired counts and ready
    ScaledUp,
    /// Some workloads are still coming up
    ScalingUp,
    /// All workloads are at zero
    ScaledDown,
    /// Some workloads are still draining to zero
    ScalingDown,
    /// The target should be down but nothing has reached zero yet
    PartlyScaled,
    /// A group owns this configs namespace so the config stands down
    OverriddenByGroup,
}

impl ConfigPhase {
    /// Whether this is one of the transitional scaling phases
    pub fn scaling(&self) -> bool {
        matches!(self, ConfigPhase::ScalingUp | ConfigPhase::ScalingDown)
    }
}

impl From<ScalingPhase> for ConfigPhase {
    fn from(phase: ScalingPhase) -> Self {
        match phase {
            ScalingPhase::ScaledUp => ConfigPhase::ScaledUp,
            ScalingPhase::ScalingUp => ConfigPhase::ScalingUp,
            ScalingPhase::ScaledDown => ConfigPhase::ScaledDown,
            ScalingPhase::ScalingDown => ConfigPhase::ScalingDown,
            ScalingPhase::PartlyScaled => ConfigPhase::PartlyScaled,
        }
    }
}

impl std::fmt::Display for ConfigPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            ConfigPhase::ScaledUp => "ScaledUp",
            ConfigPhase::ScalingUp => "ScalingUp",
            ConfigPhase::ScaledDown => "ScaledDown",
            ConfigPhase::ScalingDown => "ScalingDown",
            ConfigPhase::PartlyScaled => "PartlyScaled",
            ConfigPhase::OverriddenByGroup => "OverriddenByGroup",
        };
        write!(f, "{}", name)
    }
}

/// ScalingConfig CRD definition
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "nightshift.dev",
    version = "v1",
    kind = "ScalingConfig",
    namespaced,
    status = "ScalingConfigStatus",
    doc = "Custom resource scheduling scale downs for a single namespace"
)]
#[serde(rename_all = "camelCase")]
pub struct ScalingConfigSpec {
    /// The namespace this config scales
    pub target_namespace: String,
    /// A manual override that beats every schedule while it is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    /// The windows this namespace should be scaled up in
    #[serde(default)]
    pub schedules: Vec<ScalingSchedule>,
    /// Name patterns ordering workloads into priority groups
    #[serde(default)]
    pub sequence: Vec<String>,
    /// Name patterns for workloads that must never be scaled
    #[serde(default)]
    pub exclusions: Vec<String>,
}

/// The status nightshift maintains on a scaling config
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScalingConfigStatus {
    /// The phase this config currently sits in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ConfigPhase>,
    /// When this config last changed phase or was first observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<DateTime<Utc>>,
    /// The replica counts to restore keyed by "Kind/Name"
    #[serde(default)]
    pub original_replicas: BTreeMap<String, i32>,
}

/// ScalingGroup CRD definition
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "nightshift.dev",
    version = "v1",
    kind = "ScalingGroup",
    namespaced,
    status = "ScalingGroupStatus",
    doc = "Custom resource scheduling staged scale downs across namespaces"
)]
#[serde(rename_all = "camelCase")]
pub struct ScalingGroupSpec {
    /// A free form label used to organize groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// The namespaces this group owns
    pub namespaces: BTreeSet<String>,
    /// A manual override that beats every schedule while it is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    /// The windows these namespaces should be scaled up in
    #[serde(default)]
    pub schedules: Vec<ScalingSchedule>,
    /// Stages as whitespace separated namespace lists in scale up order
    #[serde(default)]
    pub sequence: Vec<String>,
}

/// The status nightshift maintains on a scaling group
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScalingGroupStatus {
    /// The phase this group currently sits in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ScalingPhase>,
    /// When this group last changed phase or was first observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<DateTime<Utc>>,
    /// The replica counts to restore keyed by "Namespace/Kind/Name"
    #[serde(default)]
    pub original_replicas: BTreeMap<String, i32>,
    /// How many namespaces the last reconcile acted on
    #[serde(default)]
    pub managed_count: i32,
    /// How many namespaces have reached the desired state
    #[serde(default)]
    pub namespaces_ready: i32,
    /// How many namespaces the last reconcile considered
    #[serde(default)]
    pub namespaces_total: i32,
}
