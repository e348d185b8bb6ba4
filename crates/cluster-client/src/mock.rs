//! Mock remote cluster for unit testing
//!
//! This module provides in-memory implementations of `RemoteClusterClient` and
//! `RemoteClusterGateway` that can be used in unit tests without a reachable
//! API server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};

use crate::cluster_trait::{RemoteClusterClient, RemoteClusterGateway};
use crate::error::ClusterClientError;
use crate::kubeconfig::parse_kubeconfig;

/// In-memory remote cluster
///
/// Clones share state, so a test can keep one handle while the gateway hands
/// out another.
#[derive(Clone, Default)]
pub struct MockRemoteClusterClient {
    cluster_roles: Arc<Mutex<HashMap<String, ClusterRole>>>,
    cluster_role_bindings: Arc<Mutex<HashMap<String, ClusterRoleBinding>>>,
    service_accounts: Arc<Mutex<HashMap<(String, String), ServiceAccount>>>,
    // Kind/name of every successful create, in call order
    created: Arc<Mutex<Vec<String>>>,
    unreachable: Arc<AtomicBool>,
    fail_gets: Arc<AtomicBool>,
}

impl MockRemoteClusterClient {
    /// Create a new reachable, empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `probe` fail
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Make every get fail with `Unreachable`
    pub fn set_fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    /// Add a cluster role to the mock store (for test setup)
    pub fn add_cluster_role(&self, role: ClusterRole) {
        let name = role.metadata.name.clone().unwrap_or_default();
        self.cluster_roles.lock().unwrap().insert(name, role);
    }

    /// Add a cluster role binding to the mock store (for test setup)
    pub fn add_cluster_role_binding(&self, binding: ClusterRoleBinding) {
        let name = binding.metadata.name.clone().unwrap_or_default();
        self.cluster_role_bindings.lock().unwrap().insert(name, binding);
    }

    /// Stored cluster role, if any
    pub fn cluster_role(&self, name: &str) -> Option<ClusterRole> {
        self.cluster_roles.lock().unwrap().get(name).cloned()
    }

    /// Stored cluster role binding, if any
    pub fn cluster_role_binding(&self, name: &str) -> Option<ClusterRoleBinding> {
        self.cluster_role_bindings.lock().unwrap().get(name).cloned()
    }

    /// Stored service account, if any
    pub fn service_account(&self, namespace: &str, name: &str) -> Option<ServiceAccount> {
        self.service_accounts
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Objects created so far, as `Kind/name`
    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    fn check_gets(&self) -> Result<(), ClusterClientError> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(ClusterClientError::Unreachable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RemoteClusterClient for MockRemoteClusterClient {
    async fn probe(&self) -> Result<(), ClusterClientError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ClusterClientError::Unreachable("connection refused".to_string()));
        }
        Ok(())
    }

    async fn get_cluster_role(&self, name: &str) -> Result<ClusterRole, ClusterClientError> {
        self.check_gets()?;
        self.cluster_role(name)
            .ok_or_else(|| ClusterClientError::NotFound(format!("ClusterRole {name}")))
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<ClusterRole, ClusterClientError> {
        let name = role.metadata.name.clone().unwrap_or_default();
        let mut roles = self.cluster_roles.lock().unwrap();
        if roles.contains_key(&name) {
            return Err(ClusterClientError::AlreadyExists(format!("ClusterRole {name}")));
        }
        roles.insert(name.clone(), role.clone());
        self.created.lock().unwrap().push(format!("ClusterRole/{name}"));
        Ok(role.clone())
    }

    async fn get_cluster_role_binding(&self, name: &str) -> Result<ClusterRoleBinding, ClusterClientError> {
        self.check_gets()?;
        self.cluster_role_binding(name)
            .ok_or_else(|| ClusterClientError::NotFound(format!("ClusterRoleBinding {name}")))
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, ClusterClientError> {
        let name = binding.metadata.name.clone().unwrap_or_default();
        let mut bindings = self.cluster_role_bindings.lock().unwrap();
        if bindings.contains_key(&name) {
            return Err(ClusterClientError::AlreadyExists(format!("ClusterRoleBinding {name}")));
        }
        bindings.insert(name.clone(), binding.clone());
        self.created.lock().unwrap().push(format!("ClusterRoleBinding/{name}"));
        Ok(binding.clone())
    }

    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount, ClusterClientError> {
        self.check_gets()?;
        self.service_account(namespace, name)
            .ok_or_else(|| ClusterClientError::NotFound(format!("ServiceAccount {namespace}/{name}")))
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount, ClusterClientError> {
        let name = account.metadata.name.clone().unwrap_or_default();
        let key = (namespace.to_string(), name.clone());
        let mut accounts = self.service_accounts.lock().unwrap();
        if accounts.contains_key(&key) {
            return Err(ClusterClientError::AlreadyExists(format!("ServiceAccount {namespace}/{name}")));
        }
        accounts.insert(key, account.clone());
        self.created.lock().unwrap().push(format!("ServiceAccount/{namespace}/{name}"));
        Ok(account.clone())
    }
}

/// Gateway handing out one shared [`MockRemoteClusterClient`]
///
/// The kubeconfig is still parsed, so malformed bytes fail the same way they
/// do against the real gateway.
#[derive(Clone, Default)]
pub struct MockGateway {
    cluster: MockRemoteClusterClient,
    reject_credentials: Arc<AtomicBool>,
    connections: Arc<AtomicUsize>,
}

impl MockGateway {
    /// Gateway that hands out `cluster` for every accepted kubeconfig
    pub fn new(cluster: MockRemoteClusterClient) -> Self {
        Self {
            cluster,
            ..Default::default()
        }
    }

    /// The cluster every connection resolves to
    pub fn cluster(&self) -> &MockRemoteClusterClient {
        &self.cluster
    }

    /// Make every connect fail with `InvalidCredential`
    pub fn set_reject_credentials(&self, reject: bool) {
        self.reject_credentials.store(reject, Ordering::SeqCst);
    }

    /// Number of successful connects
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RemoteClusterGateway for MockGateway {
    async fn connect(&self, kubeconfig: &[u8]) -> Result<Arc<dyn RemoteClusterClient>, ClusterClientError> {
        parse_kubeconfig(kubeconfig).map_err(|e| ClusterClientError::InvalidCredential(e.to_string()))?;
        if self.reject_credentials.load(Ordering::SeqCst) {
            return Err(ClusterClientError::InvalidCredential("certificate signed by unknown authority".to_string()));
        }
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.cluster.clone()))
    }
}

/// Minimal single-cluster kubeconfig pointing at `server`
pub fn sample_kubeconfig(server: &str) -> String {
    format!(
        r#"apiVersion: v1
kind: Config
current-context: admin@member
clusters:
- name: member
  cluster:
    server: {server}
contexts:
- name: admin@member
  context:
    cluster: member
    user: admin
users:
- name: admin
  user:
    token: test-token
"#
    )
}
