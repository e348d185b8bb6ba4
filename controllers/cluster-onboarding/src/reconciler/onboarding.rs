//! `ClusterOnboarding` phase pipeline.
//!
//! Every reconcile runs the three phases in order. A phase only acts when
//! the status is in the phase it expects, so re-running the pipeline on a
//! finished (or failed) onboarding changes nothing. Whatever the phases did,
//! the status is written back once at the end.

use std::collections::BTreeMap;

use cluster_client::{apiserver_host, decode_kubeconfig, external_secret_name, parse_kubeconfig, server_uri};
use crds::labels::{
    APISERVER_ENDPOINT_ANNOTATION, CLUSTER_TYPE_LABEL, CLUSTER_TYPE_REGISTERED, CREATOR_ANNOTATION,
    DNS_DOMAIN_ANNOTATION, GITOPS_CLUSTER_SECRET_ANNOTATION, KUBECONFIG_DATA_KEY, KUBECONFIG_SECRET_FINALIZER,
    OWNER_ANNOTATION, PARENT_LABEL,
};
use crds::{
    CLUSTER_DELETED_REASON, ClusterOnboarding, ClusterOnboardingStatus, ManagedCluster, ManagedClusterSpec,
    RegistrationPhase, RegistrationReason,
};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::api::ObjectMeta;
use kube_runtime::reflector::ObjectRef;
use tracing::{Instrument, debug, info, info_span, warn};

use super::Reconciler;
use crate::error::{ControllerError, StoreError};
use crate::membership::MembershipEntry;

/// Prefix of the GitOps cluster secret name
const GITOPS_SECRET_PREFIX: &str = "cluster";

/// Attempts at writing the status before giving up on conflicts
const MAX_STATUS_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy)]
enum Phase {
    Validate,
    PersistSecret,
    CreateTrackingResource,
}

const PHASES: [Phase; 3] = [Phase::Validate, Phase::PersistSecret, Phase::CreateTrackingResource];

impl Reconciler {
    /// Reconciles a `ClusterOnboarding` resource.
    ///
    /// This method:
    /// 1. Fetches the onboarding (a missing object is not an error)
    /// 2. Skips everything while the object is being deleted
    /// 3. Runs the phases, stopping at the first error
    /// 4. Writes the resulting status with an optimistic patch
    ///
    /// All phase errors and the status write error are returned together.
    pub async fn reconcile_onboarding(&self, key: &ObjectRef<ClusterOnboarding>) -> Result<(), ControllerError> {
        let span = info_span!(parent: &self.span, "onboarding", object = %key.name);
        self.reconcile_onboarding_inner(key).instrument(span).await
    }

    async fn reconcile_onboarding_inner(&self, key: &ObjectRef<ClusterOnboarding>) -> Result<(), ControllerError> {
        let namespace = key.namespace.as_deref().unwrap_or("default");
        let name = key.name.as_str();

        let onboarding = match self.store.get_onboarding(namespace, name).await {
            Ok(onboarding) => onboarding,
            Err(StoreError::NotFound(_)) => {
                info!("ClusterOnboarding {}/{} not found, ignoring since it must be deleted", namespace, name);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if onboarding.is_deleting() {
            debug!("ClusterOnboarding {}/{} is being deleted, skipping phases", namespace, name);
            return Ok(());
        }

        let original = onboarding.status_or_default();
        let mut status = original.clone();
        let mut errors = self.run_phases(&onboarding, &mut status).await;

        status.summarize();
        if status != original {
            if let Err(e) = self
                .persist_status(namespace, name, onboarding.resource_version(), &status)
                .await
            {
                errors.push(e);
            }
        }

        match ControllerError::from_errors(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn run_phases(&self, onboarding: &ClusterOnboarding, status: &mut ClusterOnboardingStatus) -> Vec<ControllerError> {
        let mut errors = Vec::new();
        for phase in PHASES {
            let result = match phase {
                Phase::Validate => self.validate(onboarding, status).await,
                Phase::PersistSecret => self.persist_secret(onboarding, status).await,
                Phase::CreateTrackingResource => self.create_tracking_resource(onboarding, status).await,
            };
            if let Err(e) = result {
                warn!("Phase {:?} failed for ClusterOnboarding {}: {}", phase, onboarding.name_any(), e);
                errors.push(e);
                break;
            }
        }
        errors
    }

    /// `""` -> `Validated`: kubeconfig decodes, the cluster answers, the name is free
    pub(crate) async fn validate(
        &self,
        onboarding: &ClusterOnboarding,
        status: &mut ClusterOnboardingStatus,
    ) -> Result<(), ControllerError> {
        if status.typed_phase() != Some(RegistrationPhase::Pending) {
            return Ok(());
        }
        let namespace = onboarding.namespace().unwrap_or_default();
        let cluster_name = &onboarding.spec.cluster_name;
        info!("Validating ClusterOnboarding {}/{} for cluster {}", namespace, onboarding.name_any(), cluster_name);

        let raw = match decode_kubeconfig(&onboarding.spec.kube_config) {
            Ok(raw) => raw,
            Err(e) => {
                status.fail(RegistrationReason::InvalidKubeconfig, e.to_string());
                return Err(e.into());
            }
        };

        let remote = match self.gateway.connect(&raw).await {
            Ok(remote) => remote,
            Err(e) => {
                status.fail(RegistrationReason::InvalidKubeconfig, e.to_string());
                return Err(e.into());
            }
        };

        if let Err(e) = remote.probe().await {
            info!("Cluster {} did not answer: {}", cluster_name, e);
            status.fail(RegistrationReason::ClusterNotFound, e.to_string());
            return Err(e.into());
        }

        match self.store.get_managed_cluster(&namespace, cluster_name).await {
            Ok(existing) if is_tracking_resource_of(&existing, onboarding) => {
                // Created by an earlier pass whose status write was lost
                info!("ManagedCluster {}/{} was created by this onboarding, resuming", namespace, cluster_name);
            }
            Ok(_) => {
                info!("ManagedCluster {}/{} already exists", namespace, cluster_name);
                let message = format!("ManagedCluster {namespace}/{cluster_name} already exists");
                status.fail(RegistrationReason::ClusterNameDuplicated, message.clone());
                return Err(ControllerError::DuplicateClusterName(message));
            }
            Err(StoreError::NotFound(_)) => {
                debug!("ManagedCluster {}/{} does not exist, name is free", namespace, cluster_name);
            }
            Err(e) => return Err(e.into()),
        }

        status.advance(RegistrationPhase::Validated);
        Ok(())
    }

    /// `Validated` -> `SecretCreated`: kubeconfig stored in `<cluster>-kubeconfig`
    pub(crate) async fn persist_secret(
        &self,
        onboarding: &ClusterOnboarding,
        status: &mut ClusterOnboardingStatus,
    ) -> Result<(), ControllerError> {
        if status.typed_phase() != Some(RegistrationPhase::Validated) {
            return Ok(());
        }
        let namespace = onboarding.namespace().unwrap_or_default();
        let secret_name = onboarding.kubeconfig_secret_name();

        let raw = decode_kubeconfig(&onboarding.spec.kube_config)?;
        let server = server_uri(&parse_kubeconfig(&raw)?)?;
        let gitops_secret = external_secret_name(GITOPS_SECRET_PREFIX, &server)?;

        match self.store.get_secret(&namespace, &secret_name).await {
            Ok(_) => info!("Kubeconfig secret {}/{} already exists", namespace, secret_name),
            Err(StoreError::NotFound(_)) => {
                info!("Creating kubeconfig secret {}/{}", namespace, secret_name);
                let secret = kubeconfig_secret(onboarding, &secret_name, &gitops_secret, raw);
                match self.store.create_secret(&namespace, &secret).await {
                    Ok(_) => {}
                    Err(StoreError::Conflict(_)) => {
                        debug!("Kubeconfig secret {}/{} created concurrently", namespace, secret_name);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        }

        status.advance(RegistrationPhase::SecretCreated);
        Ok(())
    }

    /// `SecretCreated` -> `Success`: `ManagedCluster` created and registered
    pub(crate) async fn create_tracking_resource(
        &self,
        onboarding: &ClusterOnboarding,
        status: &mut ClusterOnboardingStatus,
    ) -> Result<(), ControllerError> {
        if status.typed_phase() != Some(RegistrationPhase::SecretCreated) {
            return Ok(());
        }
        let namespace = onboarding.namespace().unwrap_or_default();
        let cluster_name = &onboarding.spec.cluster_name;

        let raw = decode_kubeconfig(&onboarding.spec.kube_config)?;
        let endpoint = apiserver_host(&server_uri(&parse_kubeconfig(&raw)?)?)?;

        match self.store.get_managed_cluster(&namespace, cluster_name).await {
            Ok(existing) if is_tracking_resource_of(&existing, onboarding) => {
                // Registration may have failed after the create; the index accepts repeats
                info!("ManagedCluster {}/{} already exists, registering again", namespace, cluster_name);
                self.register(onboarding, &namespace, endpoint).await?;
            }
            Ok(_) => info!("ManagedCluster {}/{} already exists", namespace, cluster_name),
            Err(StoreError::NotFound(_)) => {
                info!("Creating ManagedCluster {}/{}", namespace, cluster_name);
                let cluster = tracking_resource(onboarding, &endpoint, &self.dns_domain);
                match self.store.create_managed_cluster(&namespace, &cluster).await {
                    Ok(_) => self.register(onboarding, &namespace, endpoint).await?,
                    Err(StoreError::Conflict(_)) => {
                        debug!("ManagedCluster {}/{} created concurrently", namespace, cluster_name);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        }

        status.advance(RegistrationPhase::Success);
        Ok(())
    }

    async fn register(&self, onboarding: &ClusterOnboarding, namespace: &str, endpoint: String) -> Result<(), ControllerError> {
        let entry = MembershipEntry {
            namespace: namespace.to_string(),
            name: onboarding.spec.cluster_name.clone(),
            owner: onboarding.creator().to_string(),
            endpoint,
            cluster_type: CLUSTER_TYPE_REGISTERED.to_string(),
        };
        self.membership.register(&entry).await
    }

    /// Writes `status` guarded by `resource_version`.
    ///
    /// On a conflict the object is read again and the write retried, unless
    /// the stored phase has moved somewhere `status` may not follow.
    async fn persist_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &ClusterOnboardingStatus,
    ) -> Result<(), ControllerError> {
        let mut resource_version = resource_version;
        for attempt in 1..=MAX_STATUS_ATTEMPTS {
            match self
                .store
                .patch_onboarding_status(namespace, name, resource_version.as_deref(), status)
                .await
            {
                Ok(_) => {
                    info!("Updated ClusterOnboarding {}/{} status: phase {:?}", namespace, name, status.phase);
                    return Ok(());
                }
                Err(StoreError::NotFound(_)) => {
                    debug!("ClusterOnboarding {}/{} is gone, dropping status", namespace, name);
                    return Ok(());
                }
                Err(StoreError::Conflict(what)) if attempt < MAX_STATUS_ATTEMPTS => {
                    debug!("Conflict writing {} status (attempt {}), re-reading", what, attempt);
                    let fresh = match self.store.get_onboarding(namespace, name).await {
                        Ok(fresh) => fresh,
                        Err(StoreError::NotFound(_)) => return Ok(()),
                        Err(e) => return Err(e.into()),
                    };
                    let stored = fresh.status_or_default();
                    let follows = match (stored.typed_phase(), status.typed_phase()) {
                        (Some(stored), Some(ours)) => stored.can_advance_to(ours),
                        _ => false,
                    };
                    if !follows {
                        info!(
                            "ClusterOnboarding {}/{} moved to phase {:?} meanwhile, keeping it",
                            namespace, name, stored.phase
                        );
                        return Ok(());
                    }
                    resource_version = fresh.resource_version();
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Marks the onboarding that created `cluster` as `Deleted`.
    ///
    /// Only onboardings in `Success` are touched. Returns the onboarding to
    /// requeue, or `None` when there was nothing to update.
    pub async fn cascade_deletion(
        &self,
        cluster: &ManagedCluster,
    ) -> Result<Option<ObjectRef<ClusterOnboarding>>, ControllerError> {
        if !cluster.is_registered() {
            return Ok(None);
        }
        let Some(parent) = cluster.parent_name() else {
            debug!("ManagedCluster {} has no parent label", cluster.name_any());
            return Ok(None);
        };
        let namespace = cluster.namespace().unwrap_or_default();

        let onboarding = match self.store.get_onboarding(&namespace, parent).await {
            Ok(onboarding) => onboarding,
            Err(StoreError::NotFound(_)) => {
                info!("ClusterOnboarding {}/{} not found, nothing to mark deleted", namespace, parent);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut status = onboarding.status_or_default();
        if status.typed_phase() != Some(RegistrationPhase::Success) {
            info!(
                "ClusterOnboarding {}/{} is in phase {:?}, not marking deleted",
                namespace, parent, status.phase
            );
            return Ok(None);
        }

        status.advance(RegistrationPhase::Deleted);
        status.reason = CLUSTER_DELETED_REASON.to_string();
        status.summarize();
        self.persist_status(&namespace, parent, onboarding.resource_version(), &status)
            .await?;

        info!("ManagedCluster {}/{} deleted, onboarding {} marked Deleted", namespace, cluster.name_any(), parent);
        Ok(Some(ObjectRef::new(parent).within(&namespace)))
    }
}

/// `cluster` is the registered tracking resource `onboarding` created
fn is_tracking_resource_of(cluster: &ManagedCluster, onboarding: &ClusterOnboarding) -> bool {
    cluster.is_registered()
        && cluster.namespace() == onboarding.namespace()
        && cluster.parent_name() == Some(onboarding.name_any().as_str())
}

fn kubeconfig_secret(onboarding: &ClusterOnboarding, secret_name: &str, gitops_secret: &str, raw: Vec<u8>) -> Secret {
    let creator = onboarding.creator().to_string();
    Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.to_string()),
            namespace: onboarding.namespace(),
            annotations: Some(BTreeMap::from([
                (OWNER_ANNOTATION.to_string(), creator.clone()),
                (CREATOR_ANNOTATION.to_string(), creator),
                (GITOPS_CLUSTER_SECRET_ANNOTATION.to_string(), gitops_secret.to_string()),
            ])),
            finalizers: Some(vec![KUBECONFIG_SECRET_FINALIZER.to_string()]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(KUBECONFIG_DATA_KEY.to_string(), ByteString(raw))])),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

fn tracking_resource(onboarding: &ClusterOnboarding, endpoint: &str, dns_domain: &str) -> ManagedCluster {
    let creator = onboarding.creator().to_string();
    let mut cluster = ManagedCluster::new(&onboarding.spec.cluster_name, ManagedClusterSpec::default());
    cluster.metadata.namespace = onboarding.namespace();
    cluster.metadata.annotations = Some(BTreeMap::from([
        (OWNER_ANNOTATION.to_string(), creator.clone()),
        (CREATOR_ANNOTATION.to_string(), creator),
        (APISERVER_ENDPOINT_ANNOTATION.to_string(), endpoint.to_string()),
        (DNS_DOMAIN_ANNOTATION.to_string(), dns_domain.to_string()),
    ]));
    cluster.metadata.labels = Some(BTreeMap::from([
        (CLUSTER_TYPE_LABEL.to_string(), CLUSTER_TYPE_REGISTERED.to_string()),
        (PARENT_LABEL.to_string(), onboarding.name_any()),
    ]));
    cluster
}

#[cfg(test)]
#[path = "onboarding_test.rs"]
mod tests;
