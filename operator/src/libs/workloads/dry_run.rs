//! A pretend cluster for exercising the scaling engine without Kubernetes

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{Workload, WorkloadKind, Workloads};
use crate::libs::errors::Error;

/// An in memory workload store backing dry runs and tests
///
/// In settled mode every scale converges the moment it lands. Otherwise
/// observed state lags behind writes until a namespace is settled by hand,
/// which lets tests hold a namespace unready on purpose.
#[derive(Debug, Default)]
pub struct DryRun {
    /// The workloads in each pretend namespace
    namespaces: Mutex<HashMap<String, Vec<Workload>>>,
    /// Whether scales converge the moment they land
    settle: bool,
}

impl DryRun {
    /// Create a pretend cluster whose scales never converge on their own
    pub fn new() -> Self {
        DryRun::default()
    }

    /// Create a pretend cluster whose scales converge instantly
    pub fn settled() -> Self {
        DryRun {
            namespaces: Mutex::default(),
            settle: true,
        }
    }

    /// Add a workload to a pretend namespace
    ///
    /// # Arguments
    ///
    /// * `namespace` - The namespace to add this workload to
    /// * `workload` - The workload to add
    pub fn insert(&self, namespace: &str, workload: Workload) {
        let mut namespaces = self.lock();
        namespaces
            .entry(namespace.to_owned())
            .or_default()
            .push(workload);
    }

    /// Let a pretend namespaces observed state catch up to its desired state
    ///
    /// # Arguments
    ///
    /// * `namespace` - The namespace to settle
    pub fn settle_namespace(&self, namespace: &str) {
        let mut namespaces = self.lock();
        if let Some(workloads) = namespaces.get_mut(namespace) {
            for workload in workloads {
                workload.total = workload.desired;
                workload.ready = workload.desired;
            }
        }
    }

    /// Get a copy of a pretend workload for assertions
    ///
    /// # Arguments
    ///
    /// * `namespace` - The namespace this workload lives in
    /// * `kind` - What kind of workload to get
    /// * `name` - The name of the workload to get
    pub fn workload(&self, namespace: &str, kind: WorkloadKind, name: &str) -> Option<Workload> {
        let namespaces = self.lock();
        namespaces
            .get(namespace)?
            .iter()
            .find(|workload| workload.kind == kind && workload.name == name)
            .cloned()
    }

    /// Lock the pretend cluster state
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Workload>>> {
        self.namespaces.lock().expect("workload store lock poisoned")
    }
}

#[async_trait::async_trait]
impl Workloads for DryRun {
    /// List the scalable workloads in a pretend namespace
    ///
    /// # Arguments
    ///
    /// * `namespace` - The namespace to list
    async fn list(&self, namespace: &str) -> Result<Vec<Workload>, Error> {
        let namespaces = self.lock();
        Ok(namespaces.get(namespace).cloned().unwrap_or_default())
    }

    /// Refetch one pretend workloads observed state
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
    ) -> Result<Option<Workload>, Error> {
        Ok(self.workload(namespace, kind, name))
    }

    /// Write a pretend workloads desired replica count
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
    ) -> Result<(), Error> {
        let mut namespaces = self.lock();
        let workloads = namespaces
            .get_mut(namespace)
            .ok_or_else(|| Error::new(format!("No namespace {} to scale", namespace)))?;
        let workload = workloads
            .iter_mut()
            .find(|workload| workload.kind == kind && workload.name == name)
            .ok_or_else(|| {
                Error::new(format!(
                    "No {}/{} in namespace {} to scale",
                    kind, name, namespace
                ))
            })?;
        workload.desired = replicas;
        // settled clusters converge as soon as the write lands
        if self.settle {
            workload.total = replicas;
            workload.ready = replicas;
        }
        Ok(())
    }
}
