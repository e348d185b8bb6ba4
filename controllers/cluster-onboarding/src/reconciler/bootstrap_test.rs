//! Unit tests for kubeconfig secret reconciliation

use super::*;
use cluster_client::{MockGateway, MockRemoteClusterClient, sample_kubeconfig};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use crate::test_utils::*;

const NS: &str = "fleet";

struct Fixture {
    store: MockClusterStore,
    gateway: MockGateway,
    reconciler: Reconciler,
}

fn fixture() -> Fixture {
    let store = MockClusterStore::new();
    let gateway = MockGateway::new(MockRemoteClusterClient::new());
    let reconciler = test_reconciler(&store, &gateway, &RecordingMembershipIndex::default());
    Fixture {
        store,
        gateway,
        reconciler,
    }
}

fn prod_secret() -> Secret {
    kubeconfig_secret(NS, "prod", &sample_kubeconfig(SERVER))
}

fn expected_creates() -> Vec<String> {
    vec![
        "ClusterRoleBinding/cluster-owner-crb-alice".to_string(),
        "ClusterRole/developer".to_string(),
        "ClusterRole/guest".to_string(),
        "ServiceAccount/kube-system/argocd-manager".to_string(),
        "ClusterRole/argocd-manager-role".to_string(),
        "ClusterRoleBinding/argocd-manager-role-binding".to_string(),
    ]
}

#[tokio::test]
async fn test_bootstrap_creates_rbac_and_gitops_objects() {
    let f = fixture();
    f.store.add_managed_cluster(managed_cluster(NS, "prod", Some("prod-onboarding")));

    f.reconciler.reconcile_kubeconfig_secret(&prod_secret()).await.unwrap();

    assert_eq!(f.gateway.cluster().created(), expected_creates());
    let binding = f.gateway.cluster().cluster_role_binding("cluster-owner-crb-alice").unwrap();
    assert_eq!(binding.role_ref.name, "cluster-admin");
    assert!(f.gateway.cluster().service_account(GITOPS_NAMESPACE, GITOPS_SERVICE_ACCOUNT).is_some());
}

#[tokio::test]
async fn test_bootstrap_is_idempotent() {
    let f = fixture();
    f.store.add_managed_cluster(managed_cluster(NS, "prod", Some("prod-onboarding")));

    f.reconciler.reconcile_kubeconfig_secret(&prod_secret()).await.unwrap();
    f.reconciler.reconcile_kubeconfig_secret(&prod_secret()).await.unwrap();

    assert_eq!(
        f.gateway.cluster().created(),
        expected_creates(),
        "Second pass should find every object and create nothing"
    );
}

#[tokio::test]
async fn test_existing_role_is_not_overwritten() {
    let f = fixture();
    f.store.add_managed_cluster(managed_cluster(NS, "prod", Some("prod-onboarding")));
    f.gateway.cluster().add_cluster_role(ClusterRole {
        metadata: named(DEVELOPER_CLUSTER_ROLE),
        ..Default::default()
    });

    f.reconciler.reconcile_kubeconfig_secret(&prod_secret()).await.unwrap();

    assert!(f.gateway.cluster().cluster_role(DEVELOPER_CLUSTER_ROLE).unwrap().rules.is_none());
    assert!(!f.gateway.cluster().created().contains(&"ClusterRole/developer".to_string()));
}

#[tokio::test]
async fn test_endpoint_is_recorded_on_managed_cluster() {
    let f = fixture();
    f.store.add_managed_cluster(managed_cluster(NS, "prod", Some("prod-onboarding")));

    f.reconciler.reconcile_kubeconfig_secret(&prod_secret()).await.unwrap();

    let cluster = f.store.managed_cluster(NS, "prod").unwrap();
    assert_eq!(cluster.control_plane_endpoint(), SERVER);
}

#[tokio::test]
async fn test_endpoint_comparison_ignores_case() {
    let f = fixture();
    let mut cluster = managed_cluster(NS, "prod", Some("prod-onboarding"));
    cluster.status = Some(ManagedClusterStatus {
        control_plane_endpoint: SERVER.to_uppercase(),
    });
    f.store.add_managed_cluster(cluster);

    f.reconciler.reconcile_kubeconfig_secret(&prod_secret()).await.unwrap();

    let cluster = f.store.managed_cluster(NS, "prod").unwrap();
    assert_eq!(cluster.control_plane_endpoint(), SERVER.to_uppercase());
}

#[tokio::test]
async fn test_missing_managed_cluster_still_bootstraps_gitops() {
    let f = fixture();

    let err = f.reconciler.reconcile_kubeconfig_secret(&prod_secret()).await.unwrap_err();

    assert!(matches!(err, ControllerError::Store(StoreError::NotFound(_))));
    assert_eq!(
        f.gateway.cluster().created(),
        vec![
            "ServiceAccount/kube-system/argocd-manager".to_string(),
            "ClusterRole/argocd-manager-role".to_string(),
            "ClusterRoleBinding/argocd-manager-role-binding".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_remote_failures_are_aggregated() {
    let f = fixture();
    f.store.add_managed_cluster(managed_cluster(NS, "prod", Some("prod-onboarding")));
    f.gateway.cluster().set_fail_gets(true);

    let err = f.reconciler.reconcile_kubeconfig_secret(&prod_secret()).await.unwrap_err();

    let ControllerError::Aggregate(errors) = &err else {
        panic!("expected aggregated error, got {err}");
    };
    assert_eq!(errors.len(), 2, "RBAC and GitOps should both report: {err}");
    assert!(err.is_transient());

    // Endpoint discovery does not touch the remote cluster
    let cluster = f.store.managed_cluster(NS, "prod").unwrap();
    assert_eq!(cluster.control_plane_endpoint(), SERVER);
}

#[tokio::test]
async fn test_secret_without_kubeconfig_fails_permanently() {
    let f = fixture();
    f.store.add_managed_cluster(managed_cluster(NS, "prod", Some("prod-onboarding")));
    let mut secret = prod_secret();
    secret.data = None;

    let err = f.reconciler.reconcile_kubeconfig_secret(&secret).await.unwrap_err();

    assert!(!err.is_transient(), "Missing kubeconfig needs a fix: {err}");
    assert!(f.gateway.cluster().created().is_empty());
    assert_eq!(f.gateway.connections(), 0);
}

#[tokio::test]
async fn test_unrelated_secret_is_ignored() {
    let f = fixture();
    let mut secret = prod_secret();
    secret.metadata.name = Some("default-token-abcde".to_string());

    f.reconciler.reconcile_kubeconfig_secret(&secret).await.unwrap();

    assert_eq!(f.gateway.connections(), 0);
}

#[tokio::test]
async fn test_deleting_secret_is_ignored() {
    let f = fixture();
    f.store.add_managed_cluster(managed_cluster(NS, "prod", Some("prod-onboarding")));
    let mut secret = prod_secret();
    secret.metadata.deletion_timestamp =
        Some(serde_json::from_value::<Time>(serde_json::json!("2026-01-01T00:00:00Z")).unwrap());

    f.reconciler.reconcile_kubeconfig_secret(&secret).await.unwrap();

    assert_eq!(f.gateway.connections(), 0);
    assert_eq!(f.store.managed_cluster(NS, "prod").unwrap().control_plane_endpoint(), "");
}

// ============================================================================
// Builders
// ============================================================================

#[test]
fn test_cluster_owner_binding() {
    let binding = cluster_owner_binding("alice");
    assert_eq!(binding.name_any(), "cluster-owner-crb-alice");
    assert_eq!(binding.role_ref.kind, "ClusterRole");
    assert_eq!(binding.role_ref.name, "cluster-admin");
    let subjects = binding.subjects.unwrap();
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0].kind, "User");
    assert_eq!(subjects[0].name, "alice");
}

#[test]
fn test_guest_role_is_read_only() {
    let role = target_cluster_role(GUEST_CLUSTER_ROLE, &READ_VERBS);
    let rules = role.rules.unwrap();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].verbs, vec!["get", "list", "watch"]);
    assert_eq!(rules[0].api_groups.as_ref().unwrap().len(), TARGET_API_GROUPS.len());
    assert_eq!(rules[1].api_groups.as_deref(), Some(&["apiregistration.k8s.io".to_string()][..]));
}

#[test]
fn test_developer_role_allows_everything_on_target_groups() {
    let role = target_cluster_role(DEVELOPER_CLUSTER_ROLE, &["*"]);
    let rules = role.rules.unwrap();
    assert_eq!(rules[0].verbs, vec!["*"]);
    assert!(rules[0].api_groups.as_ref().unwrap().contains(&"apps".to_string()));
    assert_eq!(rules[1].verbs, vec!["get", "list", "watch"]);
}

#[test]
fn test_gitops_binding_targets_service_account() {
    let binding = gitops_cluster_role_binding();
    assert_eq!(binding.role_ref.name, GITOPS_CLUSTER_ROLE);
    let subject = &binding.subjects.unwrap()[0];
    assert_eq!(subject.kind, "ServiceAccount");
    assert_eq!(subject.name, GITOPS_SERVICE_ACCOUNT);
    assert_eq!(subject.namespace.as_deref(), Some(GITOPS_NAMESPACE));

    let role = gitops_cluster_role();
    let rules = role.rules.unwrap();
    assert_eq!(rules[1].non_resource_urls.as_deref(), Some(&["*".to_string()][..]));
}
