//! Test utilities for unit testing reconcilers
//!
//! This module provides an in-memory `ClusterStore`, a recording membership
//! index and helpers for creating test objects.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cluster_client::{MockGateway, RemoteClusterGateway, sample_kubeconfig};
use crds::labels::{CLUSTER_TYPE_LABEL, CLUSTER_TYPE_REGISTERED, CREATOR_ANNOTATION, KUBECONFIG_DATA_KEY, OWNER_ANNOTATION, PARENT_LABEL};
use crds::{ClusterOnboarding, ClusterOnboardingSpec, ClusterOnboardingStatus, ManagedCluster, ManagedClusterSpec, ManagedClusterStatus};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use kube::ResourceExt;

use crate::backoff::Backoffs;
use crate::error::{ControllerError, StoreError};
use crate::membership::{MembershipEntry, MembershipIndex};
use crate::reconciler::Reconciler;
use crate::store::ClusterStore;

pub const SERVER: &str = "https://api.prod.example.com:6443";

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// In-memory `ClusterStore`
///
/// Every write bumps a global resourceVersion counter, so stale versions
/// conflict the way the API server's do.
#[derive(Clone, Default)]
pub struct MockClusterStore {
    onboardings: Arc<Mutex<HashMap<Key, ClusterOnboarding>>>,
    managed_clusters: Arc<Mutex<HashMap<Key, ManagedCluster>>>,
    secrets: Arc<Mutex<HashMap<Key, Secret>>>,
    next_version: Arc<AtomicUsize>,
    // Number of upcoming onboarding status patches that fail with a conflict
    injected_conflicts: Arc<AtomicUsize>,
    status_patches: Arc<AtomicUsize>,
    secret_creates: Arc<AtomicUsize>,
    cluster_creates: Arc<AtomicUsize>,
    fail_cluster_gets: Arc<AtomicBool>,
    // Number of upcoming onboarding gets that fail with a transient error
    failing_onboarding_gets: Arc<AtomicUsize>,
}

impl MockClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) -> String {
        (self.next_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    pub fn add_onboarding(&self, mut onboarding: ClusterOnboarding) {
        onboarding.metadata.resource_version = Some(self.bump());
        let k = key(&onboarding.namespace().unwrap_or_default(), &onboarding.name_any());
        self.onboardings.lock().unwrap().insert(k, onboarding);
    }

    pub fn add_managed_cluster(&self, mut cluster: ManagedCluster) {
        cluster.metadata.resource_version = Some(self.bump());
        let k = key(&cluster.namespace().unwrap_or_default(), &cluster.name_any());
        self.managed_clusters.lock().unwrap().insert(k, cluster);
    }

    pub fn add_secret(&self, secret: Secret) {
        let k = key(&secret.namespace().unwrap_or_default(), &secret.name_any());
        self.secrets.lock().unwrap().insert(k, secret);
    }

    pub fn remove_managed_cluster(&self, namespace: &str, name: &str) -> Option<ManagedCluster> {
        self.managed_clusters.lock().unwrap().remove(&key(namespace, name))
    }

    pub fn onboarding(&self, namespace: &str, name: &str) -> Option<ClusterOnboarding> {
        self.onboardings.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn status(&self, namespace: &str, name: &str) -> ClusterOnboardingStatus {
        self.onboarding(namespace, name)
            .and_then(|o| o.status)
            .unwrap_or_default()
    }

    pub fn managed_cluster(&self, namespace: &str, name: &str) -> Option<ManagedCluster> {
        self.managed_clusters.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn managed_cluster_count(&self) -> usize {
        self.managed_clusters.lock().unwrap().len()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    /// Make the next `n` onboarding status patches conflict
    pub fn inject_conflicts(&self, n: usize) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// Make every `ManagedCluster` get fail with an error other than not-found
    pub fn set_fail_cluster_gets(&self, fail: bool) {
        self.fail_cluster_gets.store(fail, Ordering::SeqCst);
    }

    /// Make the next `n` onboarding gets fail with an error other than not-found
    pub fn fail_onboarding_gets(&self, n: usize) {
        self.failing_onboarding_gets.store(n, Ordering::SeqCst);
    }

    /// Simulate another actor writing the onboarding status
    pub fn set_status_externally(&self, namespace: &str, name: &str, phase: &str) {
        let version = self.bump();
        if let Some(onboarding) = self.onboardings.lock().unwrap().get_mut(&key(namespace, name)) {
            onboarding.status.get_or_insert_with(Default::default).phase = phase.to_string();
            onboarding.metadata.resource_version = Some(version);
        }
    }

    pub fn status_patches(&self) -> usize {
        self.status_patches.load(Ordering::SeqCst)
    }

    pub fn secret_creates(&self) -> usize {
        self.secret_creates.load(Ordering::SeqCst)
    }

    pub fn cluster_creates(&self) -> usize {
        self.cluster_creates.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ClusterStore for MockClusterStore {
    async fn get_onboarding(&self, namespace: &str, name: &str) -> Result<ClusterOnboarding, StoreError> {
        if self
            .failing_onboarding_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Conflict(format!("ClusterOnboarding {namespace}/{name}")));
        }
        self.onboarding(namespace, name)
            .ok_or_else(|| StoreError::NotFound(format!("ClusterOnboarding {namespace}/{name}")))
    }

    async fn patch_onboarding_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        status: &ClusterOnboardingStatus,
    ) -> Result<ClusterOnboarding, StoreError> {
        let what = format!("ClusterOnboarding {namespace}/{name}");
        if self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Conflict(what));
        }
        let version = self.bump();
        let mut onboardings = self.onboardings.lock().unwrap();
        let onboarding = onboardings
            .get_mut(&key(namespace, name))
            .ok_or_else(|| StoreError::NotFound(what.clone()))?;
        if resource_version.is_some_and(|rv| Some(rv) != onboarding.metadata.resource_version.as_deref()) {
            return Err(StoreError::Conflict(what));
        }
        onboarding.status = Some(status.clone());
        onboarding.metadata.resource_version = Some(version);
        self.status_patches.fetch_add(1, Ordering::SeqCst);
        Ok(onboarding.clone())
    }

    async fn get_managed_cluster(&self, namespace: &str, name: &str) -> Result<ManagedCluster, StoreError> {
        if self.fail_cluster_gets.load(Ordering::SeqCst) {
            return Err(StoreError::Conflict(format!("ManagedCluster {namespace}/{name}")));
        }
        self.managed_cluster(namespace, name)
            .ok_or_else(|| StoreError::NotFound(format!("ManagedCluster {namespace}/{name}")))
    }

    async fn create_managed_cluster(&self, namespace: &str, cluster: &ManagedCluster) -> Result<ManagedCluster, StoreError> {
        let k = key(namespace, &cluster.name_any());
        let mut clusters = self.managed_clusters.lock().unwrap();
        if clusters.contains_key(&k) {
            return Err(StoreError::Conflict(format!("ManagedCluster {namespace}/{}", k.1)));
        }
        let mut created = cluster.clone();
        created.metadata.resource_version = Some(self.bump());
        clusters.insert(k, created.clone());
        self.cluster_creates.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn patch_managed_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ManagedClusterStatus,
    ) -> Result<(), StoreError> {
        let mut clusters = self.managed_clusters.lock().unwrap();
        let cluster = clusters
            .get_mut(&key(namespace, name))
            .ok_or_else(|| StoreError::NotFound(format!("ManagedCluster {namespace}/{name}")))?;
        cluster.status = Some(status.clone());
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        self.secret(namespace, name)
            .ok_or_else(|| StoreError::NotFound(format!("Secret {namespace}/{name}")))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, StoreError> {
        let k = key(namespace, &secret.name_any());
        let mut secrets = self.secrets.lock().unwrap();
        if secrets.contains_key(&k) {
            return Err(StoreError::Conflict(format!("Secret {namespace}/{}", k.1)));
        }
        secrets.insert(k, secret.clone());
        self.secret_creates.fetch_add(1, Ordering::SeqCst);
        Ok(secret.clone())
    }
}

/// Membership index that records registrations
///
/// Registering a known cluster again succeeds without a second entry, like
/// the HTTP index answering 409.
#[derive(Clone, Default)]
pub struct RecordingMembershipIndex {
    pub entries: Arc<Mutex<Vec<MembershipEntry>>>,
    pub fail: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl MembershipIndex for RecordingMembershipIndex {
    async fn register(&self, entry: &MembershipEntry) -> Result<(), ControllerError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ControllerError::Membership("index unavailable".to_string()));
        }
        let mut entries = self.entries.lock().unwrap();
        if !entries.contains(entry) {
            entries.push(entry.clone());
        }
        Ok(())
    }
}

/// Reconciler wired to in-memory collaborators
pub fn test_reconciler(
    store: &MockClusterStore,
    gateway: &MockGateway,
    membership: &RecordingMembershipIndex,
) -> Reconciler {
    Reconciler::new(
        Arc::new(store.clone()),
        Arc::new(gateway.clone()) as Arc<dyn RemoteClusterGateway>,
        Arc::new(membership.clone()),
        "fleet.example.com".to_string(),
        Arc::new(Backoffs::new(1, 10)),
        tracing::Span::none(),
    )
}

/// Base64 encoded kubeconfig pointing at [`SERVER`]
pub fn encoded_kubeconfig() -> String {
    STANDARD.encode(sample_kubeconfig(SERVER))
}

/// Helper to create test ClusterOnboarding (created by `alice`)
pub fn onboarding(namespace: &str, name: &str, cluster_name: &str, kube_config: &str) -> ClusterOnboarding {
    let mut onboarding = ClusterOnboarding::new(
        name,
        ClusterOnboardingSpec {
            cluster_name: cluster_name.to_string(),
            kube_config: kube_config.to_string(),
        },
    );
    onboarding.metadata.namespace = Some(namespace.to_string());
    onboarding.metadata.annotations = Some(BTreeMap::from([(CREATOR_ANNOTATION.to_string(), "alice".to_string())]));
    onboarding
}

/// Sets the stored phase of a test onboarding
pub fn with_phase(mut onboarding: ClusterOnboarding, phase: &str) -> ClusterOnboarding {
    onboarding.status = Some(ClusterOnboardingStatus {
        phase: phase.to_string(),
        ..Default::default()
    });
    onboarding
}

/// Helper to create test ManagedCluster owned by `alice`, registered when a parent is given
pub fn managed_cluster(namespace: &str, name: &str, parent: Option<&str>) -> ManagedCluster {
    let mut cluster = ManagedCluster::new(name, ManagedClusterSpec::default());
    cluster.metadata.namespace = Some(namespace.to_string());
    cluster.metadata.annotations = Some(BTreeMap::from([(OWNER_ANNOTATION.to_string(), "alice".to_string())]));
    let mut labels = BTreeMap::from([(CLUSTER_TYPE_LABEL.to_string(), CLUSTER_TYPE_REGISTERED.to_string())]);
    if let Some(parent) = parent {
        labels.insert(PARENT_LABEL.to_string(), parent.to_string());
    }
    cluster.metadata.labels = Some(labels);
    cluster
}

/// Helper to create test kubeconfig secret holding `kubeconfig`
pub fn kubeconfig_secret(namespace: &str, cluster_name: &str, kubeconfig: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(crds::labels::kubeconfig_secret_name(cluster_name)),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            KUBECONFIG_DATA_KEY.to_string(),
            ByteString(kubeconfig.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}
