//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the reconciler,
//! the onboarding work queue, the watchers and the HTTP server together:
//! - ClusterOnboarding: phase pipeline through the work queue
//! - ManagedCluster: deletion cascade to the parent onboarding
//! - Secret: RBAC and GitOps bootstrap on the remote cluster

use std::sync::Arc;

use cluster_client::KubeconfigGateway;
use crds::{ClusterOnboarding, ManagedCluster};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, Resource};
use kube_runtime::reflector::ObjectRef;
use tokio::task::JoinHandle;
use tracing::{info, info_span};

use crate::backoff::Backoffs;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::membership::{HttpMembershipIndex, MembershipIndex, NoopMembershipIndex};
use crate::queue::{KeyHandler, WorkQueue};
use crate::reconciler::Reconciler;
use crate::server::{ServerState, start_server};
use crate::store::KubeClusterStore;
use crate::watcher::Watcher;

/// Main controller for cluster onboarding.
pub struct Controller {
    onboarding_watcher: JoinHandle<Result<(), ControllerError>>,
    managed_cluster_watcher: JoinHandle<Result<(), ControllerError>>,
    secret_watcher: JoinHandle<Result<(), ControllerError>>,
    server: JoinHandle<Result<(), ControllerError>>,
    // Kept so the dispatcher is aborted with the controller
    queue_dispatcher: JoinHandle<()>,
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Cluster Onboarding Controller");

        let client = Client::try_default().await?;
        let span = info_span!("cluster_onboarding");

        let membership: Arc<dyn MembershipIndex> = match &config.membership_index_url {
            Some(url) => Arc::new(HttpMembershipIndex::new(url)?),
            None => {
                info!("No membership index configured, cluster registration is disabled");
                Arc::new(NoopMembershipIndex)
            }
        };
        let backoffs = Arc::new(Backoffs::new(config.backoff_min_minutes, config.backoff_max_minutes));

        let reconciler = Arc::new(Reconciler::new(
            Arc::new(KubeClusterStore::new(client.clone())),
            Arc::new(KubeconfigGateway::new()),
            membership,
            config.cluster_dns_domain.clone(),
            Arc::clone(&backoffs),
            span.clone(),
        ));

        let (queue, queue_dispatcher) = WorkQueue::start(
            Arc::clone(&reconciler) as Arc<dyn KeyHandler<ObjectRef<ClusterOnboarding>>>,
            backoffs,
            span,
        );

        let state = Arc::new(ServerState::default());
        let namespace = config.watch_namespace.as_deref();
        let watcher = Arc::new(Watcher::new(
            reconciler,
            queue,
            api::<ClusterOnboarding>(&client, namespace),
            api::<ManagedCluster>(&client, namespace),
            api::<Secret>(&client, namespace),
            Arc::clone(&state.is_ready),
        ));

        let onboarding_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_onboardings().await })
        };
        let managed_cluster_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_managed_clusters().await })
        };
        let secret_watcher = tokio::spawn(async move { watcher.watch_kubeconfig_secrets().await });
        let server = tokio::spawn(start_server(config.http_addr, state));

        Ok(Self {
            onboarding_watcher,
            managed_cluster_watcher,
            secret_watcher,
            server,
            queue_dispatcher,
        })
    }

    /// Runs until one of the watchers or the server exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Cluster Onboarding Controller running");

        let result = tokio::select! {
            result = &mut self.onboarding_watcher => flatten(result, "ClusterOnboarding watcher"),
            result = &mut self.managed_cluster_watcher => flatten(result, "ManagedCluster watcher"),
            result = &mut self.secret_watcher => flatten(result, "Secret watcher"),
            result = &mut self.server => flatten(result, "HTTP server"),
        };

        for task in [&self.onboarding_watcher, &self.managed_cluster_watcher, &self.secret_watcher, &self.server] {
            task.abort();
        }
        self.queue_dispatcher.abort();
        result
    }
}

fn flatten(
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
    task: &str,
) -> Result<(), ControllerError> {
    match result {
        Ok(inner) => inner,
        Err(e) => Err(ControllerError::Watch(format!("{task} panicked: {e}"))),
    }
}
