//! ClusterOnboarding CRD
//!
//! Requests that an existing Kubernetes cluster be brought under management.
//! The controller walks the resource through a fixed sequence of phases and
//! the phase string is the only durable record of how far onboarding got.

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::labels::{kubeconfig_secret_name, CREATOR_ANNOTATION};

/// Reason recorded when the cluster created by an onboarding is deleted
pub const CLUSTER_DELETED_REASON: &str = "cluster is deleted";

/// Request to bring an existing cluster under management
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "fleet.microscaler.io",
    version = "v1alpha1",
    kind = "ClusterOnboarding",
    namespaced,
    status = "ClusterOnboardingStatus",
    shortname = "clo",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterName"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOnboardingSpec {
    /// Name of the `ManagedCluster` to create (unique within the namespace)
    pub cluster_name: String,

    /// Base64 encoded admin kubeconfig of the cluster
    pub kube_config: String,
}

/// Status of a `ClusterOnboarding`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOnboardingStatus {
    /// Onboarding phase (see [`RegistrationPhase`])
    #[serde(default)]
    pub phase: String,

    /// Machine readable reason for `Failed`/`Deleted`
    #[serde(default)]
    pub reason: String,

    /// Human readable detail of the last failure
    #[serde(default)]
    pub message: Option<String>,

    /// True once onboarding finished successfully
    #[serde(default)]
    pub ready: bool,

    /// Time of the last phase change
    #[serde(default)]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Onboarding phase
///
/// Stored as a plain string on the resource so values written by other
/// actors (e.g. `Approved`) survive a round-trip through the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum RegistrationPhase {
    /// Nothing done yet (empty string on the wire)
    #[default]
    Pending,

    /// Kubeconfig decoded, cluster reachable, name free
    Validated,

    /// Kubeconfig secret persisted
    SecretCreated,

    /// `ManagedCluster` created and registered
    Success,

    /// Onboarding failed, see `reason`
    Failed,

    /// The created `ManagedCluster` was deleted
    Deleted,
}

impl RegistrationPhase {
    /// Wire representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "",
            Self::Validated => "Validated",
            Self::SecretCreated => "SecretCreated",
            Self::Success => "Success",
            Self::Failed => "Failed",
            Self::Deleted => "Deleted",
        }
    }

    /// Parses a phase string.
    ///
    /// Matching is case-insensitive so lowercase values written by older
    /// releases are still understood. Unknown values return `None`.
    pub fn parse(value: &str) -> Option<Self> {
        [
            Self::Pending,
            Self::Validated,
            Self::SecretCreated,
            Self::Success,
            Self::Failed,
            Self::Deleted,
        ]
        .into_iter()
        .find(|phase| phase.as_str().eq_ignore_ascii_case(value))
    }

    /// `Failed` and `Deleted` absorb every later transition
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Deleted)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Validated => 1,
            Self::SecretCreated => 2,
            Self::Success => 3,
            Self::Failed | Self::Deleted => 4,
        }
    }

    /// Whether moving from `self` to `next` keeps the phase monotonic.
    pub fn can_advance_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next.is_terminal() || next.rank() > self.rank()
    }
}

impl std::fmt::Display for RegistrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("Pending"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Reason attached to a failed onboarding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationReason {
    /// Kubeconfig could not be decoded or turned into a client
    InvalidKubeconfig,

    /// Remote API server did not answer
    ClusterNotFound,

    /// A `ManagedCluster` with the requested name already exists
    ClusterNameDuplicated,
}

impl RegistrationReason {
    /// Wire representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidKubeconfig => "InvalidKubeconfig",
            Self::ClusterNotFound => "ClusterNotFound",
            Self::ClusterNameDuplicated => "ClusterNameDuplicated",
        }
    }

    /// Parses a reason string, `None` for free-form reasons
    pub fn parse(value: &str) -> Option<Self> {
        [
            Self::InvalidKubeconfig,
            Self::ClusterNotFound,
            Self::ClusterNameDuplicated,
        ]
        .into_iter()
        .find(|reason| reason.as_str() == value)
    }
}

impl ClusterOnboardingStatus {
    /// Typed view of `phase`, `None` when another actor wrote an unknown value
    pub fn typed_phase(&self) -> Option<RegistrationPhase> {
        RegistrationPhase::parse(&self.phase)
    }

    /// Typed view of `reason`
    pub fn typed_reason(&self) -> Option<RegistrationReason> {
        RegistrationReason::parse(&self.reason)
    }

    /// Moves to `next` if that keeps the phase monotonic.
    ///
    /// Returns false (and leaves the status untouched) for regressions and
    /// for unknown current phases.
    pub fn advance(&mut self, next: RegistrationPhase) -> bool {
        let Some(current) = self.typed_phase() else {
            return false;
        };
        if !current.can_advance_to(next) {
            return false;
        }
        if self.phase != next.as_str() {
            self.phase = next.as_str().to_string();
            self.last_transition_time = Some(Utc::now());
        }
        true
    }

    /// Moves to `Failed` with a typed reason
    pub fn fail(&mut self, reason: RegistrationReason, message: impl Into<String>) -> bool {
        if !self.advance(RegistrationPhase::Failed) {
            return false;
        }
        self.reason = reason.as_str().to_string();
        self.message = Some(message.into());
        true
    }

    /// Re-derives the coarse summary fields from `phase`.
    ///
    /// Rewrites legacy lowercase phase values in their canonical form and
    /// sets `ready`.
    pub fn summarize(&mut self) {
        if let Some(phase) = self.typed_phase() {
            if self.phase != phase.as_str() {
                self.phase = phase.as_str().to_string();
            }
        }
        self.ready = self.typed_phase() == Some(RegistrationPhase::Success);
    }
}

impl ClusterOnboarding {
    /// Current status, default (empty phase) when the status was never written
    pub fn status_or_default(&self) -> ClusterOnboardingStatus {
        self.status.clone().unwrap_or_default()
    }

    /// User recorded in the creator annotation (empty when missing)
    pub fn creator(&self) -> &str {
        self.annotations()
            .get(CREATOR_ANNOTATION)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// True once deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Name of the kubeconfig secret this onboarding persists
    pub fn kubeconfig_secret_name(&self) -> String {
        kubeconfig_secret_name(&self.spec.cluster_name)
    }
}
