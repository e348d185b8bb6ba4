//! Kubeconfig secret reconciliation.
//!
//! Once the onboarding has stored a cluster's kubeconfig, the secret drives
//! three independent steps: recording the control plane endpoint on the
//! `ManagedCluster`, and creating RBAC objects and the GitOps agent identity
//! on the remote cluster. Remote objects are get-before-create and never
//! updated once they exist.

use std::sync::Arc;

use cluster_client::{ClusterClientError, RemoteClusterClient, parse_kubeconfig, server_uri};
use crds::labels::{KUBECONFIG_DATA_KEY, cluster_name_from_secret};
use crds::ManagedClusterStatus;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use kube::ResourceExt;
use kube::api::ObjectMeta;
use tracing::{Instrument, debug, info, info_span};

use super::Reconciler;
use crate::error::{ControllerError, StoreError};

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Namespace of the GitOps agent service account on remote clusters
pub const GITOPS_NAMESPACE: &str = "kube-system";
/// Service account the GitOps agent authenticates as
pub const GITOPS_SERVICE_ACCOUNT: &str = "argocd-manager";
/// Cluster role granting the GitOps agent full access
pub const GITOPS_CLUSTER_ROLE: &str = "argocd-manager-role";
/// Binds [`GITOPS_CLUSTER_ROLE`] to [`GITOPS_SERVICE_ACCOUNT`]
pub const GITOPS_CLUSTER_ROLE_BINDING: &str = "argocd-manager-role-binding";

/// Full access over the target API groups
pub const DEVELOPER_CLUSTER_ROLE: &str = "developer";
/// Read-only access over the target API groups
pub const GUEST_CLUSTER_ROLE: &str = "guest";

/// API groups the `developer` and `guest` roles cover
const TARGET_API_GROUPS: [&str; 11] = [
    "",
    "apps",
    "autoscaling",
    "batch",
    "extensions",
    "policy",
    "networking.k8s.io",
    "snapshot.storage.k8s.io",
    "storage.k8s.io",
    "apiextensions.k8s.io",
    "metrics.k8s.io",
];

const READ_VERBS: [&str; 3] = ["get", "list", "watch"];

impl Reconciler {
    /// Reconciles a kubeconfig secret.
    ///
    /// Runs endpoint discovery, RBAC bootstrap and GitOps bootstrap; a
    /// failing step does not stop the others and all errors are returned
    /// together.
    pub async fn reconcile_kubeconfig_secret(&self, secret: &Secret) -> Result<(), ControllerError> {
        let span = info_span!(parent: &self.span, "kubeconfig_secret", secret = %secret.name_any());
        self.reconcile_kubeconfig_secret_inner(secret).instrument(span).await
    }

    async fn reconcile_kubeconfig_secret_inner(&self, secret: &Secret) -> Result<(), ControllerError> {
        let secret_name = secret.name_any();
        let Some(cluster_name) = cluster_name_from_secret(&secret_name) else {
            debug!("Secret {} is not a kubeconfig secret", secret_name);
            return Ok(());
        };
        if secret.metadata.deletion_timestamp.is_some() {
            debug!("Kubeconfig secret {} is being deleted", secret_name);
            return Ok(());
        }
        let namespace = secret.namespace().unwrap_or_default();

        let mut errors = Vec::new();
        if let Err(e) = self.discover_endpoint(secret, &namespace, cluster_name).await {
            errors.push(e);
        }
        if let Err(e) = self.bootstrap_rbac(secret, &namespace, cluster_name).await {
            errors.push(e);
        }
        if let Err(e) = self.bootstrap_gitops(secret).await {
            errors.push(e);
        }

        match ControllerError::from_errors(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Records the kubeconfig's server URL as the cluster's control plane endpoint
    pub(crate) async fn discover_endpoint(
        &self,
        secret: &Secret,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<(), ControllerError> {
        let raw = kubeconfig_bytes(secret)?;
        let server = server_uri(&parse_kubeconfig(raw)?)?;

        let cluster = match self.store.get_managed_cluster(namespace, cluster_name).await {
            Ok(cluster) => cluster,
            Err(StoreError::NotFound(_)) => {
                info!("ManagedCluster {}/{} not found, skipping endpoint discovery", namespace, cluster_name);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if cluster.control_plane_endpoint().eq_ignore_ascii_case(&server) {
            debug!("ManagedCluster {}/{} endpoint is up to date", namespace, cluster_name);
            return Ok(());
        }

        info!("Updating ManagedCluster {}/{} control plane endpoint to {}", namespace, cluster_name, server);
        let status = ManagedClusterStatus {
            control_plane_endpoint: server,
        };
        self.store
            .patch_managed_cluster_status(namespace, cluster_name, &status)
            .await?;
        Ok(())
    }

    /// Owner binding plus `developer` and `guest` roles on the remote cluster
    pub(crate) async fn bootstrap_rbac(
        &self,
        secret: &Secret,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<(), ControllerError> {
        let cluster = self.store.get_managed_cluster(namespace, cluster_name).await?;
        let remote = self.gateway.connect_secret(secret, KUBECONFIG_DATA_KEY).await?;

        ensure_cluster_role_binding(&remote, &cluster_owner_binding(cluster.owner())).await?;
        for role in [
            target_cluster_role(DEVELOPER_CLUSTER_ROLE, &["*"]),
            target_cluster_role(GUEST_CLUSTER_ROLE, &READ_VERBS),
        ] {
            ensure_cluster_role(&remote, &role).await?;
        }
        Ok(())
    }

    /// Service account, role and binding used by the GitOps agent
    pub(crate) async fn bootstrap_gitops(&self, secret: &Secret) -> Result<(), ControllerError> {
        let remote = self.gateway.connect_secret(secret, KUBECONFIG_DATA_KEY).await?;

        ensure_service_account(&remote, &gitops_service_account()).await?;
        ensure_cluster_role(&remote, &gitops_cluster_role()).await?;
        ensure_cluster_role_binding(&remote, &gitops_cluster_role_binding()).await?;
        Ok(())
    }
}

fn kubeconfig_bytes(secret: &Secret) -> Result<&[u8], ClusterClientError> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(KUBECONFIG_DATA_KEY))
        .map(|value| value.0.as_slice())
        .ok_or_else(|| {
            ClusterClientError::InvalidKubeconfig(format!(
                "secret {} has no {KUBECONFIG_DATA_KEY} key",
                secret.name_any()
            ))
        })
}

// ============================================================================
// Get-before-create
// ============================================================================

async fn ensure_cluster_role(remote: &Arc<dyn RemoteClusterClient>, role: &ClusterRole) -> Result<bool, ClusterClientError> {
    let name = role.name_any();
    match remote.get_cluster_role(&name).await {
        Ok(_) => Ok(false),
        Err(e) if e.is_not_found() => match remote.create_cluster_role(role).await {
            Ok(_) => {
                info!("Created ClusterRole {} on remote cluster", name);
                Ok(true)
            }
            Err(ClusterClientError::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    }
}

async fn ensure_cluster_role_binding(
    remote: &Arc<dyn RemoteClusterClient>,
    binding: &ClusterRoleBinding,
) -> Result<bool, ClusterClientError> {
    let name = binding.name_any();
    match remote.get_cluster_role_binding(&name).await {
        Ok(_) => Ok(false),
        Err(e) if e.is_not_found() => match remote.create_cluster_role_binding(binding).await {
            Ok(_) => {
                info!("Created ClusterRoleBinding {} on remote cluster", name);
                Ok(true)
            }
            Err(ClusterClientError::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    }
}

async fn ensure_service_account(
    remote: &Arc<dyn RemoteClusterClient>,
    account: &ServiceAccount,
) -> Result<bool, ClusterClientError> {
    let name = account.name_any();
    match remote.get_service_account(GITOPS_NAMESPACE, &name).await {
        Ok(_) => Ok(false),
        Err(e) if e.is_not_found() => match remote.create_service_account(GITOPS_NAMESPACE, account).await {
            Ok(_) => {
                info!("Created ServiceAccount {}/{} on remote cluster", GITOPS_NAMESPACE, name);
                Ok(true)
            }
            Err(ClusterClientError::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    }
}

// ============================================================================
// Remote object builders
// ============================================================================

fn named(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

fn cluster_role_ref(name: &str) -> RoleRef {
    RoleRef {
        api_group: RBAC_API_GROUP.to_string(),
        kind: "ClusterRole".to_string(),
        name: name.to_string(),
    }
}

/// `cluster-admin` for the user that onboarded the cluster
pub(crate) fn cluster_owner_binding(owner: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: named(&format!("cluster-owner-crb-{owner}")),
        role_ref: cluster_role_ref("cluster-admin"),
        subjects: Some(vec![Subject {
            kind: "User".to_string(),
            api_group: Some(RBAC_API_GROUP.to_string()),
            name: owner.to_string(),
            namespace: None,
        }]),
    }
}

/// Role over the target API groups with `verbs`, plus read access to
/// `apiregistration.k8s.io`
pub(crate) fn target_cluster_role(name: &str, verbs: &[&str]) -> ClusterRole {
    ClusterRole {
        metadata: named(name),
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(strings(&TARGET_API_GROUPS)),
                resources: Some(strings(&["*"])),
                verbs: strings(verbs),
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(strings(&["apiregistration.k8s.io"])),
                resources: Some(strings(&["*"])),
                verbs: strings(&READ_VERBS),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

pub(crate) fn gitops_service_account() -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(GITOPS_SERVICE_ACCOUNT.to_string()),
            namespace: Some(GITOPS_NAMESPACE.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub(crate) fn gitops_cluster_role() -> ClusterRole {
    ClusterRole {
        metadata: named(GITOPS_CLUSTER_ROLE),
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(strings(&["*"])),
                resources: Some(strings(&["*"])),
                verbs: strings(&["*"]),
                ..Default::default()
            },
            PolicyRule {
                non_resource_urls: Some(strings(&["*"])),
                verbs: strings(&["*"]),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

pub(crate) fn gitops_cluster_role_binding() -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: named(GITOPS_CLUSTER_ROLE_BINDING),
        role_ref: cluster_role_ref(GITOPS_CLUSTER_ROLE),
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            api_group: None,
            name: GITOPS_SERVICE_ACCOUNT.to_string(),
            namespace: Some(GITOPS_NAMESPACE.to_string()),
        }]),
    }
}

#[cfg(test)]
#[path = "bootstrap_test.rs"]
mod tests;
