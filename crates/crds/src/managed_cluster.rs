//! ManagedCluster CRD
//!
//! Durable record of a cluster under management. Registered clusters are
//! created by the onboarding controller; the control plane endpoint in the
//! status is filled in later from the cluster's kubeconfig secret.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::labels::{CLUSTER_TYPE_LABEL, CLUSTER_TYPE_REGISTERED, OWNER_ANNOTATION, PARENT_LABEL};

/// Cluster under fleet management, tracked on the management cluster
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[kube(
    group = "fleet.microscaler.io",
    version = "v1alpha1",
    kind = "ManagedCluster",
    namespaced,
    status = "ManagedClusterStatus",
    shortname = "mcl",
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".status.controlPlaneEndpoint"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    /// Kubernetes version reported by the cluster, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Status of a `ManagedCluster`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterStatus {
    /// API server URL of the cluster (from its kubeconfig)
    #[serde(default)]
    pub control_plane_endpoint: String,
}

impl ManagedCluster {
    /// Owner annotation (empty when missing)
    pub fn owner(&self) -> &str {
        self.annotations()
            .get(OWNER_ANNOTATION)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// True for clusters created through onboarding
    pub fn is_registered(&self) -> bool {
        self.labels().get(CLUSTER_TYPE_LABEL).map(String::as_str) == Some(CLUSTER_TYPE_REGISTERED)
    }

    /// Name of the `ClusterOnboarding` that created this cluster
    pub fn parent_name(&self) -> Option<&str> {
        self.labels().get(PARENT_LABEL).map(String::as_str)
    }

    /// Endpoint recorded in the status (empty when not yet discovered)
    pub fn control_plane_endpoint(&self) -> &str {
        self.status
            .as_ref()
            .map(|s| s.control_plane_endpoint.as_str())
            .unwrap_or_default()
    }
}
