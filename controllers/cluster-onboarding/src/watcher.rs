//! Kubernetes resource watchers.
//!
//! - `ClusterOnboarding`: raw watch stream, filtered and fed into the
//!   per-key [`WorkQueue`]
//! - `ManagedCluster`: deletions of registered clusters cascade to the
//!   onboarding that created them
//! - kubeconfig `Secret`s: driven by `kube_runtime::Controller` through the
//!   generic `watch_resource()` helper

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crds::{ClusterOnboarding, ManagedCluster};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::controller::{Action, Config as RuntimeConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, WatchStreamExt, watcher};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::ControllerError;
use crate::event_filter::{EventClassifier, ResourceEvent, WatchEvent, should_reconcile};
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;

type ReconcileFuture = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Action, ControllerError>> + Send>>;

fn backoff_key<K: Resource>(resource_name: &str, obj: &K) -> String {
    format!("{resource_name}/{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Generic watcher helper around `kube_runtime::Controller`.
///
/// Failed reconciles are requeued after the per-object Fibonacci backoff;
/// errors that cannot clear up without a change to the object wait for
/// that change instead.
async fn watch_resource<K, F>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        if !error.is_transient() {
            error!("Reconciliation of {} {} failed, waiting for a change: {}", resource_name, obj.name_any(), error);
            return Action::await_change();
        }
        let delay = ctx.backoffs.next_for(&backoff_key(resource_name, &*obj));
        warn!("Reconciliation of {} {} failed, retrying in {:?}: {}", resource_name, obj.name_any(), delay, error);
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            debug!("Reconciling {} {}", resource_name, obj.name_any());
            let key = backoff_key(resource_name, &*obj);
            let action = reconcile_fn(Arc::clone(&ctx), obj).await?;
            ctx.backoffs.reset(&key);
            Ok(action)
        }
    };

    let controller_config = RuntimeConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(3);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                debug!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    Err(ControllerError::Watch(format!("{resource_name} controller stream ended")))
}

/// Watches the controller's resource kinds.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    queue: WorkQueue<ObjectRef<ClusterOnboarding>>,
    onboarding_api: Api<ClusterOnboarding>,
    managed_cluster_api: Api<ManagedCluster>,
    secret_api: Api<Secret>,
    /// Set once the first onboarding list has been delivered
    is_ready: Arc<AtomicBool>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        queue: WorkQueue<ObjectRef<ClusterOnboarding>>,
        onboarding_api: Api<ClusterOnboarding>,
        managed_cluster_api: Api<ManagedCluster>,
        secret_api: Api<Secret>,
        is_ready: Arc<AtomicBool>,
    ) -> Self {
        Self {
            reconciler,
            queue,
            onboarding_api,
            managed_cluster_api,
            secret_api,
            is_ready,
        }
    }

    /// Starts watching ClusterOnboarding resources.
    pub async fn watch_onboardings(&self) -> Result<(), ControllerError> {
        info!("Starting ClusterOnboarding watcher");
        let mut classifier = EventClassifier::new();
        let mut events = watcher(self.onboarding_api.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();

        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!("ClusterOnboarding watch error: {}", e);
                    continue;
                }
            };
            if matches!(event, watcher::Event::InitDone) && !self.is_ready.swap(true, Ordering::Relaxed) {
                info!("ClusterOnboarding watcher synced");
            }
            for event in classifier.classify(event) {
                let key = ObjectRef::from_obj(event.object());
                if should_reconcile(&ResourceEvent::Onboarding(event)) {
                    debug!("Enqueueing {}", key);
                    self.queue.enqueue(key);
                }
            }
        }

        Err(ControllerError::Watch("ClusterOnboarding watch stream ended".to_string()))
    }

    /// Starts watching ManagedCluster resources for deletions.
    pub async fn watch_managed_clusters(&self) -> Result<(), ControllerError> {
        info!("Starting ManagedCluster watcher");
        let mut classifier = EventClassifier::new();
        let mut events = watcher(self.managed_cluster_api.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();

        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!("ManagedCluster watch error: {}", e);
                    continue;
                }
            };
            for event in classifier.classify(event) {
                if !should_reconcile(&ResourceEvent::ManagedCluster(event.clone())) {
                    continue;
                }
                if let WatchEvent::Deleted(cluster) = event {
                    let span = info_span!(parent: &self.reconciler.span, "cascade", cluster = %cluster.name_any());
                    tokio::spawn(
                        cascade(Arc::clone(&self.reconciler), self.queue.clone(), cluster).instrument(span),
                    );
                }
            }
        }

        Err(ControllerError::Watch("ManagedCluster watch stream ended".to_string()))
    }

    /// Starts watching kubeconfig secrets.
    pub async fn watch_kubeconfig_secrets(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.secret_api.clone(),
            Arc::clone(&self.reconciler),
            |reconciler, secret| {
                Box::pin(async move {
                    if !should_reconcile(&ResourceEvent::Secret(WatchEvent::Updated(Arc::clone(&secret)))) {
                        return Ok(Action::await_change());
                    }
                    reconciler.reconcile_kubeconfig_secret(&secret).await?;
                    Ok(Action::await_change())
                })
            },
            "Secret",
        )
        .await
    }
}

/// Marks the parent onboarding of a deleted cluster.
///
/// Transient failures are retried with the cluster's backoff until the
/// cascade goes through; a permanent failure is logged and dropped.
async fn cascade(reconciler: Arc<Reconciler>, queue: WorkQueue<ObjectRef<ClusterOnboarding>>, cluster: Arc<ManagedCluster>) {
    let key = backoff_key("ManagedCluster", &*cluster);
    loop {
        match reconciler.cascade_deletion(&cluster).await {
            Ok(Some(onboarding)) => {
                queue.enqueue(onboarding);
                break;
            }
            Ok(None) => break,
            Err(e) if e.is_transient() => {
                let delay = reconciler.backoffs.next_for(&key);
                warn!("Cascade for ManagedCluster {} failed, retrying in {:?}: {}", cluster.name_any(), delay, e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!("Cascade for ManagedCluster {} failed: {}", cluster.name_any(), e);
                break;
            }
        }
    }
    reconciler.backoffs.reset(&key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::Backoffs;
    use crate::queue::KeyHandler;
    use crate::test_utils::*;
    use cluster_client::{MockGateway, MockRemoteClusterClient};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        keys: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl KeyHandler<ObjectRef<ClusterOnboarding>> for RecordingHandler {
        async fn handle(&self, key: &ObjectRef<ClusterOnboarding>) -> Result<(), ControllerError> {
            self.keys.lock().unwrap().push(format!("{}/{}", key.namespace.as_deref().unwrap_or_default(), key.name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cascade_enqueues_parent_onboarding() {
        let store = MockClusterStore::new();
        store.add_onboarding(with_phase(onboarding("fleet", "prod-onboarding", "prod", ""), "Success"));
        let gateway = MockGateway::new(MockRemoteClusterClient::new());
        let reconciler = Arc::new(test_reconciler(&store, &gateway, &RecordingMembershipIndex::default()));
        let handler = Arc::new(RecordingHandler::default());
        let (queue, _task) = WorkQueue::start(
            Arc::clone(&handler) as Arc<dyn KeyHandler<ObjectRef<ClusterOnboarding>>>,
            Arc::new(Backoffs::new(1, 10)),
            tracing::Span::none(),
        );

        let cluster = Arc::new(managed_cluster("fleet", "prod", Some("prod-onboarding")));
        cascade(reconciler, queue.clone(), cluster).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.status("fleet", "prod-onboarding").phase, "Deleted");
        assert_eq!(*handler.keys.lock().unwrap(), vec!["fleet/prod-onboarding".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cascade_outlasts_repeated_store_failures() {
        let store = MockClusterStore::new();
        store.add_onboarding(with_phase(onboarding("fleet", "prod-onboarding", "prod", ""), "Success"));
        store.fail_onboarding_gets(8);
        let gateway = MockGateway::new(MockRemoteClusterClient::new());
        let reconciler = Arc::new(test_reconciler(&store, &gateway, &RecordingMembershipIndex::default()));
        let handler = Arc::new(RecordingHandler::default());
        let (queue, _task) = WorkQueue::start(
            Arc::clone(&handler) as Arc<dyn KeyHandler<ObjectRef<ClusterOnboarding>>>,
            Arc::new(Backoffs::new(1, 10)),
            tracing::Span::none(),
        );

        let cluster = Arc::new(managed_cluster("fleet", "prod", Some("prod-onboarding")));
        cascade(Arc::clone(&reconciler), queue.clone(), cluster).await;

        assert_eq!(store.status("fleet", "prod-onboarding").phase, "Deleted");
        // Backoff starts over once the cascade went through
        assert_eq!(reconciler.backoffs.next_for("ManagedCluster/fleet/prod"), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_key_includes_namespace() {
        let cluster = managed_cluster("fleet", "prod", None);
        assert_eq!(backoff_key("ManagedCluster", &cluster), "ManagedCluster/fleet/prod");
    }
}
