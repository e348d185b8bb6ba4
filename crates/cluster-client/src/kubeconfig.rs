//! Kubeconfig helpers
//!
//! Decoding of the base64 blob users submit, resolution of the API server
//! the kubeconfig points at, and the deterministic GitOps secret name
//! derived from that server.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kube::config::Kubeconfig;
use url::Url;

use crate::error::ClusterClientError;

/// Decodes a base64 (standard alphabet) kubeconfig.
///
/// Surrounding whitespace is ignored; anything else that is not valid base64
/// is rejected.
pub fn decode_kubeconfig(encoded: &str) -> Result<Vec<u8>, ClusterClientError> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| ClusterClientError::InvalidKubeconfig(format!("base64 decode failed: {e}")))
}

/// Parses raw kubeconfig bytes.
pub fn parse_kubeconfig(raw: &[u8]) -> Result<Kubeconfig, ClusterClientError> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| ClusterClientError::InvalidKubeconfig(format!("not UTF-8: {e}")))?;
    Kubeconfig::from_yaml(text)
        .map_err(|e| ClusterClientError::InvalidKubeconfig(format!("not a kubeconfig: {e}")))
}

/// Server URL of the cluster the current context points at.
///
/// Without a `current-context` the kubeconfig must hold exactly one cluster,
/// which is used instead.
pub fn server_uri(kubeconfig: &Kubeconfig) -> Result<String, ClusterClientError> {
    let cluster_name = match kubeconfig.current_context.as_deref() {
        Some(current) if !current.is_empty() => {
            let context = kubeconfig
                .contexts
                .iter()
                .find(|c| c.name == current)
                .and_then(|c| c.context.as_ref())
                .ok_or_else(|| {
                    ClusterClientError::InvalidKubeconfig(format!("context {current} not found"))
                })?;
            context.cluster.clone()
        }
        _ => match kubeconfig.clusters.as_slice() {
            [only] => only.name.clone(),
            _ => {
                return Err(ClusterClientError::InvalidKubeconfig(
                    "no current-context and more than one cluster".to_string(),
                ));
            }
        },
    };

    kubeconfig
        .clusters
        .iter()
        .find(|c| c.name == cluster_name)
        .and_then(|c| c.cluster.as_ref())
        .and_then(|c| c.server.clone())
        .filter(|server| !server.is_empty())
        .ok_or_else(|| {
            ClusterClientError::InvalidKubeconfig(format!("cluster {cluster_name} has no server"))
        })
}

/// Host part of an API server URL, without scheme, port or path.
pub fn apiserver_host(server_uri: &str) -> Result<String, ClusterClientError> {
    let url = Url::parse(server_uri)
        .map_err(|e| ClusterClientError::InvalidKubeconfig(format!("invalid server {server_uri}: {e}")))?;
    url.host_str()
        .map(str::to_string)
        .ok_or_else(|| ClusterClientError::InvalidKubeconfig(format!("server {server_uri} has no host")))
}

/// Name of the GitOps cluster secret for `server_uri`.
///
/// `<prefix>-<lowercased host>-<fnv1a32(server_uri)>`, the naming the GitOps
/// agent uses for declaratively managed cluster secrets.
pub fn external_secret_name(prefix: &str, server_uri: &str) -> Result<String, ClusterClientError> {
    let host = apiserver_host(server_uri)?.to_lowercase();
    Ok(format!("{prefix}-{host}-{}", fnv1a_32(server_uri.as_bytes())))
}

fn fnv1a_32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    bytes.iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(PRIME)
    })
}
