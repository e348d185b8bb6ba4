//! Controller-specific error types.
//!
//! `StoreError` covers local (management cluster) object access,
//! `ControllerError` everything a reconcile can report back to the work queue.

use cluster_client::ClusterClientError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors from the local object store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist (the create branch of get-before-create)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stale resourceVersion or concurrent create
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Any other Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Api(#[from] KubeError),
}

impl StoreError {
    /// Maps a kube error for `what`, splitting out 404 and 409
    pub fn from_kube(err: KubeError, what: impl Into<String>) -> Self {
        match err {
            KubeError::Api(api_err) if api_err.code == 404 => Self::NotFound(what.into()),
            KubeError::Api(api_err) if api_err.code == 409 => Self::Conflict(what.into()),
            other => Self::Api(other),
        }
    }
}

/// Errors that can occur in the Cluster Onboarding Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Local object store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Remote cluster error (decode, credential, reachability, remote API)
    #[error("Remote cluster error: {0}")]
    Cluster(#[from] ClusterClientError),

    /// A `ManagedCluster` with the requested name already exists
    #[error("Cluster name already in use: {0}")]
    DuplicateClusterName(String),

    /// Membership index rejected a registration
    #[error("Membership index error: {0}")]
    Membership(String),

    /// Membership index could not be reached
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// HTTP server failed
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),

    /// Several phases or bootstrap steps failed in one reconcile
    #[error("{}", join_errors(.0))]
    Aggregate(Vec<ControllerError>),
}

fn join_errors(errors: &[ControllerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ControllerError {
    /// Folds a list of errors into one: `None` when empty, the error itself
    /// when there is exactly one, `Aggregate` otherwise.
    pub fn from_errors(mut errors: Vec<ControllerError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(errors)),
        }
    }

    /// Whether retrying without any change can succeed.
    ///
    /// Decode and credential failures and duplicate names only clear up
    /// after the user edits something.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Cluster(
                ClusterClientError::InvalidKubeconfig(_) | ClusterClientError::InvalidCredential(_),
            )
            | Self::DuplicateClusterName(_)
            | Self::InvalidConfig(_)
            | Self::Serialization(_) => false,
            Self::Aggregate(errors) => errors.iter().any(Self::is_transient),
            _ => true,
        }
    }
}
