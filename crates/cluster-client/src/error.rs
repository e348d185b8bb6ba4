//! Remote cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to an onboarded cluster
#[derive(Debug, Error)]
pub enum ClusterClientError {
    /// Kubeconfig is not valid base64/UTF-8/YAML or has no usable server
    #[error("Invalid kubeconfig: {0}")]
    InvalidKubeconfig(String),

    /// Kubeconfig parsed but no client could be built from it
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Remote API server did not answer
    #[error("Cluster unreachable: {0}")]
    Unreachable(String),

    /// Object does not exist on the remote cluster
    #[error("Not found: {0}")]
    NotFound(String),

    /// Object was created concurrently
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Any other Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),
}

impl ClusterClientError {
    /// Maps a kube error for `what`, splitting out 404 and 409
    pub fn from_kube(err: kube::Error, what: impl Into<String>) -> Self {
        match err {
            kube::Error::Api(api_err) if api_err.code == 404 => Self::NotFound(what.into()),
            kube::Error::Api(api_err) if api_err.code == 409 => Self::AlreadyExists(what.into()),
            other => Self::Api(other),
        }
    }

    /// True for the "does not exist yet" branch of get-before-create
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
