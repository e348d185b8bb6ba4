//! Reconciliation logic for cluster onboarding.
//!
//! - `onboarding`: the `ClusterOnboarding` phase pipeline (validate, persist
//!   the kubeconfig secret, create the `ManagedCluster`) and the cascade from
//!   a deleted `ManagedCluster` back to its onboarding
//! - `bootstrap`: work triggered by kubeconfig secrets (control plane
//!   endpoint discovery, RBAC and GitOps identities on the remote cluster)

pub mod bootstrap;
pub mod onboarding;

use std::sync::Arc;

use cluster_client::RemoteClusterGateway;
use crds::ClusterOnboarding;
use kube_runtime::reflector::ObjectRef;

use crate::backoff::Backoffs;
use crate::error::ControllerError;
use crate::membership::MembershipIndex;
use crate::queue::KeyHandler;
use crate::store::ClusterStore;

/// Reconciles onboardings and kubeconfig secrets.
pub struct Reconciler {
    pub(crate) store: Arc<dyn ClusterStore>,
    pub(crate) gateway: Arc<dyn RemoteClusterGateway>,
    pub(crate) membership: Arc<dyn MembershipIndex>,
    /// DNS suffix recorded on registered clusters
    pub(crate) dns_domain: String,
    /// Requeue delays for the secret controller's error policy
    pub(crate) backoffs: Arc<Backoffs>,
    pub(crate) span: tracing::Span,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        store: Arc<dyn ClusterStore>,
        gateway: Arc<dyn RemoteClusterGateway>,
        membership: Arc<dyn MembershipIndex>,
        dns_domain: String,
        backoffs: Arc<Backoffs>,
        span: tracing::Span,
    ) -> Self {
        Self {
            store,
            gateway,
            membership,
            dns_domain,
            backoffs,
            span,
        }
    }
}

#[async_trait::async_trait]
impl KeyHandler<ObjectRef<ClusterOnboarding>> for Reconciler {
    async fn handle(&self, key: &ObjectRef<ClusterOnboarding>) -> Result<(), ControllerError> {
        self.reconcile_onboarding(key).await
    }
}
