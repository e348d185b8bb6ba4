//! Event classification and filtering
//!
//! Raw watcher events are turned into `WatchEvent`s (created, updated,
//! deleted) and `should_reconcile` decides which of them trigger work.
//! Onboardings only react to their own creation and to the deletion of the
//! `ManagedCluster` they registered; everything else is status noise.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crds::labels::cluster_name_from_secret;
use crds::{ClusterOnboarding, ManagedCluster, RegistrationPhase};
use k8s_openapi::api::core::v1::Secret;
use kube::{Resource, ResourceExt};
use kube_runtime::watcher;

/// Change to a single watched object
#[derive(Debug, Clone)]
pub enum WatchEvent<K> {
    /// First sight of the object
    Created(Arc<K>),
    /// Any later change
    Updated(Arc<K>),
    /// Object is gone; carries its last known state
    Deleted(Arc<K>),
}

impl<K> WatchEvent<K> {
    /// Object the event is about
    pub fn object(&self) -> &K {
        match self {
            Self::Created(obj) | Self::Updated(obj) | Self::Deleted(obj) => obj,
        }
    }
}

/// Event on any kind the controller watches
#[derive(Debug, Clone)]
pub enum ResourceEvent {
    /// `ClusterOnboarding` event
    Onboarding(WatchEvent<ClusterOnboarding>),
    /// `ManagedCluster` event
    ManagedCluster(WatchEvent<ManagedCluster>),
    /// `Secret` event
    Secret(WatchEvent<Secret>),
}

/// Whether `event` should trigger a reconcile.
pub fn should_reconcile(event: &ResourceEvent) -> bool {
    match event {
        ResourceEvent::Onboarding(WatchEvent::Created(onboarding)) => is_unfinished(onboarding),
        ResourceEvent::Onboarding(_) => false,
        ResourceEvent::ManagedCluster(WatchEvent::Deleted(cluster)) => cluster.is_registered(),
        ResourceEvent::ManagedCluster(_) => false,
        ResourceEvent::Secret(WatchEvent::Created(secret) | WatchEvent::Updated(secret)) => {
            is_kubeconfig_secret(secret)
        }
        ResourceEvent::Secret(WatchEvent::Deleted(_)) => false,
    }
}

/// Fresh onboardings, plus ones a restart interrupted between phases
fn is_unfinished(onboarding: &ClusterOnboarding) -> bool {
    match onboarding.status_or_default().typed_phase() {
        Some(RegistrationPhase::Pending | RegistrationPhase::Validated | RegistrationPhase::SecretCreated) => true,
        Some(_) | None => false,
    }
}

/// Secrets following the `<cluster>-kubeconfig` naming convention
pub fn is_kubeconfig_secret(secret: &Secret) -> bool {
    cluster_name_from_secret(&secret.name_any()).is_some()
}

type ObjectKey = (Option<String>, String);

/// Turns raw watcher events into created/updated/deleted events.
///
/// An object is "created" the first time this classifier sees it and
/// "updated" on every later apply, including re-lists after a reconnect.
/// Objects missing from a re-list were deleted while the watch was down and
/// are reported as deleted once the list completes.
#[derive(Debug)]
pub struct EventClassifier<K> {
    known: HashMap<ObjectKey, Arc<K>>,
    // Keys seen since the last `Init`, `None` outside a list
    listed: Option<HashSet<ObjectKey>>,
}

impl<K> Default for EventClassifier<K> {
    fn default() -> Self {
        Self {
            known: HashMap::new(),
            listed: None,
        }
    }
}

impl<K: Resource> EventClassifier<K> {
    /// Classifier that has seen nothing yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Events for one raw watcher event, empty for list bookkeeping
    pub fn classify(&mut self, event: watcher::Event<K>) -> Vec<WatchEvent<K>> {
        match event {
            watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
                let key = (obj.namespace(), obj.name_any());
                if let Some(listed) = self.listed.as_mut() {
                    listed.insert(key.clone());
                }
                let obj = Arc::new(obj);
                match self.known.insert(key, Arc::clone(&obj)) {
                    None => vec![WatchEvent::Created(obj)],
                    Some(_) => vec![WatchEvent::Updated(obj)],
                }
            }
            watcher::Event::Delete(obj) => {
                self.known.remove(&(obj.namespace(), obj.name_any()));
                vec![WatchEvent::Deleted(Arc::new(obj))]
            }
            watcher::Event::Init => {
                self.listed = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitDone => {
                let Some(listed) = self.listed.take() else {
                    return Vec::new();
                };
                let gone: Vec<ObjectKey> = self.known.keys().filter(|key| !listed.contains(*key)).cloned().collect();
                gone.into_iter()
                    .filter_map(|key| self.known.remove(&key))
                    .map(WatchEvent::Deleted)
                    .collect()
            }
        }
    }
}
