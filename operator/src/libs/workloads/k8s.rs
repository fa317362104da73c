//! Drives workloads through the k8s api

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::autoscaling::v1::{Scale, ScaleSpec};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::client::Client;

use super::{Workload, WorkloadKind, Workloads};
use crate::libs::errors::Error;

/// A workload store backed by the k8s api
pub struct K8s {
    /// A client for the k8s api
    client: Client,
}

impl K8s {
    /// Build a k8s backed workload store
    ///
    /// # Arguments
    ///
    /// * `client` - A client for the k8s api
    pub fn new(client: &Client) -> Self {
        K8s {
            client: client.clone(),
        }
    }

    /// Snapshot a deployments replica counts
    ///
    /// # Arguments
    ///
    /// * `deploy` - The deployment to snapshot
    fn from_deployment(deploy: Deployment) -> Option<Workload> {
        let name = deploy.metadata.name?;
        // unset desired counts default to a single replica
        let desired = deploy.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(1);
        let total = deploy
            .status
            .as_ref()
            .and_then(|status| status.replicas)
            .unwrap_or(0);
        let ready = deploy
            .status
            .as_ref()
            .and_then(|status| status.ready_replicas)
            .unwrap_or(0);
        Some(Workload::new(
            WorkloadKind::Deployment,
            name,
            desired,
            total,
            ready,
        ))
    }

    /// Snapshot a stateful sets replica counts
    ///
    /// # Arguments
    ///
    /// * `set` - The stateful set to snapshot
    fn from_stateful_set(set: StatefulSet) -> Option<Workload> {
        let name = set.metadata.name?;
        let desired = set.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(1);
        let total = set.status.as_ref().map(|status| status.replicas).unwrap_or(0);
        let ready = set
            .status
            .as_ref()
            .and_then(|status| status.ready_replicas)
            .unwrap_or(0);
        Some(Workload::new(
            WorkloadKind::StatefulSet,
            name,
            desired,
            total,
            ready,
        ))
    }
}

#[async_trait::async_trait]
impl Workloads for K8s {
    /// List the scalable workloads in a namespace
    ///
    /// # Arguments
    ///
    /// * `namespace` - The namespace to list
    async fn list(&self, namespace: &str) -> Result<Vec<Workload>, Error> {
        let params = ListParams::default();
        let deploys: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let sets: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        // list both kinds and merge them into one snapshot
        let mut workloads = Vec::default();
        workloads.extend(
            deploys
                .list(&params)
                .await?
                .items
                .into_iter()
                .filter_map(Self::from_deployment),
        );
        workloads.extend(
            sets.list(&params)
                .await?
                .items
                .into_iter()
                .filter_map(Self::from_stateful_set),
        );
        Ok(workloads)
    }

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
    ) -> Result<Option<Workload>, Error> {
        match kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                Ok(api.get_opt(name).await?.and_then(Self::from_deployment))
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                Ok(api.get_opt(name).await?.and_then(Self::from_stateful_set))
            }
        }
    }

    /// Write a workloads desired replica count
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
        // merge patch the scale subresource with the new count
        let scale = Scale {
            spec: Some(ScaleSpec {
                replicas: Some(replicas),
            }),
            ..Scale::default()
        };
        let patch = Patch::Merge(scale);
        let params = PatchParams::default();
        match kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                api.patch_scale(name, &params, &patch).await?;
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                api.patch_scale(name, &params, &patch).await?;
            }
        }
        Ok(())
    }
}
