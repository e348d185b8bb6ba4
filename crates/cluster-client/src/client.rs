//! Kube-backed remote cluster client

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Node, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::api::{ListParams, PostParams};
use kube::config::KubeConfigOptions;
use kube::{Api, Client, Config};
use tracing::debug;

use crate::cluster_trait::{RemoteClusterClient, RemoteClusterGateway};
use crate::error::ClusterClientError;
use crate::kubeconfig::parse_kubeconfig;

/// Remote cluster client backed by a `kube::Client`
#[derive(Clone)]
pub struct KubeRemoteClient {
    client: Client,
}

impl std::fmt::Debug for KubeRemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeRemoteClient")
            .field("default_namespace", &self.client.default_namespace())
            .finish()
    }
}

impl KubeRemoteClient {
    /// Wraps an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn cluster_roles(&self) -> Api<ClusterRole> {
        Api::all(self.client.clone())
    }

    fn cluster_role_bindings(&self) -> Api<ClusterRoleBinding> {
        Api::all(self.client.clone())
    }

    fn service_accounts(&self, namespace: &str) -> Api<ServiceAccount> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl RemoteClusterClient for KubeRemoteClient {
    async fn probe(&self) -> Result<(), ClusterClientError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default().limit(1))
            .await
            .map_err(|e| ClusterClientError::Unreachable(e.to_string()))?;
        debug!("Remote cluster answered node list ({} item(s))", list.items.len());
        Ok(())
    }

    async fn get_cluster_role(&self, name: &str) -> Result<ClusterRole, ClusterClientError> {
        self.cluster_roles()
            .get(name)
            .await
            .map_err(|e| ClusterClientError::from_kube(e, format!("ClusterRole {name}")))
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<ClusterRole, ClusterClientError> {
        let name = role.metadata.name.as_deref().unwrap_or_default();
        self.cluster_roles()
            .create(&PostParams::default(), role)
            .await
            .map_err(|e| ClusterClientError::from_kube(e, format!("ClusterRole {name}")))
    }

    async fn get_cluster_role_binding(&self, name: &str) -> Result<ClusterRoleBinding, ClusterClientError> {
        self.cluster_role_bindings()
            .get(name)
            .await
            .map_err(|e| ClusterClientError::from_kube(e, format!("ClusterRoleBinding {name}")))
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, ClusterClientError> {
        let name = binding.metadata.name.as_deref().unwrap_or_default();
        self.cluster_role_bindings()
            .create(&PostParams::default(), binding)
            .await
            .map_err(|e| ClusterClientError::from_kube(e, format!("ClusterRoleBinding {name}")))
    }

    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount, ClusterClientError> {
        self.service_accounts(namespace)
            .get(name)
            .await
            .map_err(|e| ClusterClientError::from_kube(e, format!("ServiceAccount {namespace}/{name}")))
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount, ClusterClientError> {
        let name = account.metadata.name.as_deref().unwrap_or_default();
        self.service_accounts(namespace)
            .create(&PostParams::default(), account)
            .await
            .map_err(|e| ClusterClientError::from_kube(e, format!("ServiceAccount {namespace}/{name}")))
    }
}

/// Gateway that builds a fresh [`KubeRemoteClient`] from every kubeconfig
#[derive(Debug, Clone, Default)]
pub struct KubeconfigGateway;

impl KubeconfigGateway {
    /// Create a new gateway
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl RemoteClusterGateway for KubeconfigGateway {
    async fn connect(&self, kubeconfig: &[u8]) -> Result<Arc<dyn RemoteClusterClient>, ClusterClientError> {
        let kubeconfig = parse_kubeconfig(kubeconfig)
            .map_err(|e| ClusterClientError::InvalidCredential(e.to_string()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ClusterClientError::InvalidCredential(format!("failed to load kubeconfig: {e}")))?;
        let client = Client::try_from(config)
            .map_err(|e| ClusterClientError::InvalidCredential(format!("failed to build client: {e}")))?;
        Ok(Arc::new(KubeRemoteClient::new(client)))
    }
}
