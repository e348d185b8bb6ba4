//! Label, annotation and finalizer keys shared by the Fleet controllers.
//!
//! Everything the onboarding controller writes onto secrets and
//! `ManagedCluster` resources is keyed by one of these constants so the
//! secret bootstrap path and the cascade lookup agree on names.

// ============================================================================
// Annotations
// ============================================================================

/// User that owns the onboarded cluster (copied from the creator)
pub const OWNER_ANNOTATION: &str = "fleet.microscaler.io/owner";

/// User that submitted the `ClusterOnboarding`
pub const CREATOR_ANNOTATION: &str = "fleet.microscaler.io/creator";

/// Name of the cluster secret the GitOps agent uses for this cluster
pub const GITOPS_CLUSTER_SECRET_ANNOTATION: &str = "fleet.microscaler.io/gitops-cluster-secret";

/// API server host discovered from the kubeconfig at registration time
pub const APISERVER_ENDPOINT_ANNOTATION: &str = "fleet.microscaler.io/apiserver-endpoint";

/// DNS domain suffix of the management plane
pub const DNS_DOMAIN_ANNOTATION: &str = "fleet.microscaler.io/dns-domain";

// ============================================================================
// Labels
// ============================================================================

/// How the cluster came under management (`registered`, ...)
pub const CLUSTER_TYPE_LABEL: &str = "fleet.microscaler.io/cluster-type";

/// Name of the `ClusterOnboarding` that created a `ManagedCluster`
pub const PARENT_LABEL: &str = "fleet.microscaler.io/parent";

/// Cluster type of externally created clusters brought in by onboarding
pub const CLUSTER_TYPE_REGISTERED: &str = "registered";

// ============================================================================
// Kubeconfig secrets
// ============================================================================

/// Finalizer placed on kubeconfig secrets created by the onboarding controller
pub const KUBECONFIG_SECRET_FINALIZER: &str = "fleet.microscaler.io/kubeconfig-secret";

/// Suffix appended to the cluster name to form the kubeconfig secret name
pub const KUBECONFIG_SUFFIX: &str = "-kubeconfig";

/// Data key holding the raw kubeconfig inside the secret
pub const KUBECONFIG_DATA_KEY: &str = "value";

/// Name of the kubeconfig secret for a cluster
pub fn kubeconfig_secret_name(cluster_name: &str) -> String {
    format!("{cluster_name}{KUBECONFIG_SUFFIX}")
}

/// Cluster name encoded in a kubeconfig secret name.
///
/// Returns `None` for secrets that do not follow the naming convention
/// (including a bare `-kubeconfig`).
pub fn cluster_name_from_secret(secret_name: &str) -> Option<&str> {
    secret_name
        .strip_suffix(KUBECONFIG_SUFFIX)
        .filter(|name| !name.is_empty())
}
