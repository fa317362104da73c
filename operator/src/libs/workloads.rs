//! Abstracts the scalable workloads nightshift manages
//!
//! The scaling engine only ever reads replica counts and writes desired
//! counts, so it works against a small store trait. The real store drives
//! the k8s api while the dry run store drives a pretend in memory cluster
//! for `--dry-run` and for tests.

pub mod dry_run;
pub mod k8s;

pub use dry_run::DryRun;
pub use k8s::K8s;

use crate::libs::errors::Error;

/// The workload kinds nightshift can scale
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkloadKind {
    /// A replicated stateless set
    Deployment,
    /// A replicated stateful set
    StatefulSet,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            WorkloadKind::Deployment => write!(f, "Deployment"),
            WorkloadKind::StatefulSet => write!(f, "StatefulSet"),
        }
    }
}

/// A snapshot of one scalable workload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workload {
    /// What kind of workload this is
    pub kind: WorkloadKind,
    /// The name of this workload
    pub name: String,
    /// The replica count this workload wants
    pub desired: i32,
    /// The replica count this workload currently has
    pub total: i32,
    /// The replica count currently passing readiness
    pub ready: i32,
}

impl Workload {
    /// Build a workload snapshot
    ///
    /// # Arguments
    ///
    /// * `kind` - What kind of workload this is
    /// * `name` - The name of this workload
    /// * `desired` - The replica count this workload wants
    /// * `total` - The replica count this workload currently has
    /// * `ready` - The replica count currently passing readiness
    pub fn new<N: Into<String>>(
        kind: WorkloadKind,
        name: N,
        desired: i32,
        total: i32,
        ready: i32,
    ) -> Self {
        Workload {
            kind,
            name: name.into(),
            desired,
            total,
            ready,
        }
    }

    /// The key this workload takes in an original replica map
    pub fn key(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

/// The reads and writes the scaling engine performs on workloads
#[async_trait::async_trait]
pub trait Workloads: Send + Sync {
    /// List the scalable workloads in a namespace
    ///
    /// # Arguments
    ///
    /// * `namespace` - The namespace to list
    async fn list(&self, namespace: &str) -> Result<Vec<Workload>, Error>;

    /// Refetch one workloads observed state
    ///
    /// # Arguments
    ///
    /// * `namespace` - The namespace this workload lives in
    /// * `kind` - What kind of workload to get
    /// * `name` - The name of the workload to get
    async fn get(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
    ) -> Result<Option<Workload>, Error>;

    /// Write a workloads desired replica count
    ///
    /// This is the only field nightshift ever writes on a workload.
    ///
    /// # Arguments
    ///
    /// * `namespace` - The namespace this workload lives in
    /// * `kind` - What kind of workload to scale
    /// * `name` - The name of the workload to scale
    /// * `replicas` - The desired replica count to write
    async fn scale(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
        replicas: i32,
    ) -> Result<(), Error>;
}
