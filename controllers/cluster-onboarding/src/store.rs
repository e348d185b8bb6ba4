//! Local object store
//!
//! The reconcilers never touch `kube::Api` directly; every read and write on
//! the management cluster goes through `ClusterStore` so the phase pipeline
//! can be tested against the in-memory store in `test_utils`.

use crds::{ClusterOnboarding, ClusterOnboardingStatus, ManagedCluster, ManagedClusterStatus};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::json;

use crate::error::StoreError;

/// Reads and writes of local objects used by the reconcilers
#[async_trait::async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetches a `ClusterOnboarding`
    async fn get_onboarding(&self, namespace: &str, name: &str) -> Result<ClusterOnboarding, StoreError>;

    /// Merge-patches the status subresource.
    ///
    /// With `resource_version` set the patch only applies to that version and
    /// fails with `StoreError::Conflict` otherwise.
    async fn patch_onboarding_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        status: &ClusterOnboardingStatus,
    ) -> Result<ClusterOnboarding, StoreError>;

    /// Fetches a `ManagedCluster`
    async fn get_managed_cluster(&self, namespace: &str, name: &str) -> Result<ManagedCluster, StoreError>;
    /// Creates a `ManagedCluster`, `StoreError::Conflict` when it exists
    async fn create_managed_cluster(&self, namespace: &str, cluster: &ManagedCluster) -> Result<ManagedCluster, StoreError>;
    /// Merge-patches the `ManagedCluster` status subresource
    async fn patch_managed_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ManagedClusterStatus,
    ) -> Result<(), StoreError>;

    /// Fetches a `Secret`
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError>;
    /// Creates a `Secret`, `StoreError::Conflict` when it exists
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, StoreError>;
}

/// `ClusterStore` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeClusterStore {
    client: Client,
}

impl KubeClusterStore {
    /// Store using `client` for all API calls
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn onboardings(&self, namespace: &str) -> Api<ClusterOnboarding> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn managed_clusters(&self, namespace: &str) -> Api<ManagedCluster> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl ClusterStore for KubeClusterStore {
    async fn get_onboarding(&self, namespace: &str, name: &str) -> Result<ClusterOnboarding, StoreError> {
        self.onboardings(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, format!("ClusterOnboarding {namespace}/{name}")))
    }

    async fn patch_onboarding_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        status: &ClusterOnboardingStatus,
    ) -> Result<ClusterOnboarding, StoreError> {
        let mut patch = json!({ "status": status });
        if let Some(rv) = resource_version {
            patch["metadata"] = json!({ "resourceVersion": rv });
        }
        self.onboardings(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(e, format!("ClusterOnboarding {namespace}/{name}")))
    }

    async fn get_managed_cluster(&self, namespace: &str, name: &str) -> Result<ManagedCluster, StoreError> {
        self.managed_clusters(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, format!("ManagedCluster {namespace}/{name}")))
    }

    async fn create_managed_cluster(&self, namespace: &str, cluster: &ManagedCluster) -> Result<ManagedCluster, StoreError> {
        let name = cluster.metadata.name.as_deref().unwrap_or_default();
        self.managed_clusters(namespace)
            .create(&PostParams::default(), cluster)
            .await
            .map_err(|e| StoreError::from_kube(e, format!("ManagedCluster {namespace}/{name}")))
    }

    async fn patch_managed_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ManagedClusterStatus,
    ) -> Result<(), StoreError> {
        let patch = json!({ "status": status });
        self.managed_clusters(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(e, format!("ManagedCluster {namespace}/{name}")))?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        self.secrets(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, format!("Secret {namespace}/{name}")))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, StoreError> {
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        self.secrets(namespace)
            .create(&PostParams::default(), secret)
            .await
            .map_err(|e| StoreError::from_kube(e, format!("Secret {namespace}/{name}")))
    }
}
