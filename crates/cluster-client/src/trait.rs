//! Remote cluster traits for mocking
//!
//! `RemoteClusterClient` covers the handful of calls the onboarding
//! controller makes against an onboarded cluster, `RemoteClusterGateway`
//! turns a stored kubeconfig into such a client. Concrete implementations
//! live in `client.rs`; tests use the mocks in `mock.rs`.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};

use crate::error::ClusterClientError;

/// Operations against the API server of an onboarded cluster
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait RemoteClusterClient: Send + Sync {
    /// Lists nodes (at most one) to prove the API server answers
    async fn probe(&self) -> Result<(), ClusterClientError>;

    // RBAC
    async fn get_cluster_role(&self, name: &str) -> Result<ClusterRole, ClusterClientError>;
    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<ClusterRole, ClusterClientError>;
    async fn get_cluster_role_binding(&self, name: &str) -> Result<ClusterRoleBinding, ClusterClientError>;
    async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<ClusterRoleBinding, ClusterClientError>;

    // Core
    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount, ClusterClientError>;
    async fn create_service_account(&self, namespace: &str, account: &ServiceAccount) -> Result<ServiceAccount, ClusterClientError>;
}

/// Builds remote clients from kubeconfigs
///
/// Implementations never cache: every call builds a fresh client so a
/// rotated credential takes effect on the next reconcile.
#[async_trait::async_trait]
pub trait RemoteClusterGateway: Send + Sync {
    /// Client for the cluster described by raw (decoded) kubeconfig bytes
    async fn connect(&self, kubeconfig: &[u8]) -> Result<Arc<dyn RemoteClusterClient>, ClusterClientError>;

    /// Client for the cluster whose kubeconfig is stored in `secret`
    async fn connect_secret(
        &self,
        secret: &Secret,
        data_key: &str,
    ) -> Result<Arc<dyn RemoteClusterClient>, ClusterClientError> {
        let raw = secret
            .data
            .as_ref()
            .and_then(|data| data.get(data_key))
            .ok_or_else(|| {
                ClusterClientError::InvalidCredential(format!("secret has no {data_key} key"))
            })?;
        self.connect(&raw.0).await
    }
}
