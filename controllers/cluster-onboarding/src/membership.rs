//! Cluster membership index
//!
//! Newly registered clusters are announced to an external index so other
//! services can find them. The index is optional; without a URL the
//! registration is a no-op.

use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::error::ControllerError;

/// One registered cluster as sent to the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipEntry {
    /// Namespace of the `ManagedCluster`
    pub namespace: String,
    /// Name of the `ManagedCluster`
    pub name: String,
    /// User that onboarded the cluster
    pub owner: String,
    /// API server host
    pub endpoint: String,
    /// Value of the cluster type label (`registered`)
    pub cluster_type: String,
}

/// Sink for cluster registrations
#[async_trait::async_trait]
pub trait MembershipIndex: Send + Sync {
    /// Records `entry`; registering an already known cluster succeeds.
    async fn register(&self, entry: &MembershipEntry) -> Result<(), ControllerError>;
}

/// Index reached over HTTP (`POST <base>/clusters`)
#[derive(Debug, Clone)]
pub struct HttpMembershipIndex {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMembershipIndex {
    /// Index posting to `<base_url>/clusters`
    pub fn new(base_url: &Url) -> Result<Self, ControllerError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/clusters", base_url.as_str().trim_end_matches('/')),
        })
    }
}

#[async_trait::async_trait]
impl MembershipIndex for HttpMembershipIndex {
    async fn register(&self, entry: &MembershipEntry) -> Result<(), ControllerError> {
        let response = self.client.post(&self.endpoint).json(entry).send().await?;
        match response.status() {
            status if status.is_success() => {
                info!("Registered cluster {}/{} in membership index", entry.namespace, entry.name);
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!("Cluster {}/{} already in membership index", entry.namespace, entry.name);
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ControllerError::Membership(format!(
                    "registering {}/{} returned {status}: {body}",
                    entry.namespace, entry.name
                )))
            }
        }
    }
}

/// Index used when no URL is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMembershipIndex;

#[async_trait::async_trait]
impl MembershipIndex for NoopMembershipIndex {
    async fn register(&self, entry: &MembershipEntry) -> Result<(), ControllerError> {
        debug!(
            "Membership index disabled, not registering {}/{}",
            entry.namespace, entry.name
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::State, http::StatusCode as AxumStatus, routing::post};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct IndexState {
        received: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    async fn clusters_handler(
        State(state): State<IndexState>,
        Json(body): Json<serde_json::Value>,
    ) -> AxumStatus {
        let mut received = state.received.lock().unwrap();
        let duplicate = received.iter().any(|seen| seen["name"] == body["name"]);
        received.push(body);
        if body_is_rejected(&received) {
            AxumStatus::INTERNAL_SERVER_ERROR
        } else if duplicate {
            AxumStatus::CONFLICT
        } else {
            AxumStatus::CREATED
        }
    }

    fn body_is_rejected(received: &[serde_json::Value]) -> bool {
        received.last().is_some_and(|body| body["name"] == "broken")
    }

    async fn start_index() -> (Url, IndexState) {
        let state = IndexState::default();
        let app = Router::new()
            .route("/api/clusters", post(clusters_handler))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (Url::parse(&format!("http://{addr}/api/")).unwrap(), state)
    }

    fn entry(name: &str) -> MembershipEntry {
        MembershipEntry {
            namespace: "fleet".to_string(),
            name: name.to_string(),
            owner: "alice".to_string(),
            endpoint: "10.0.0.1".to_string(),
            cluster_type: "registered".to_string(),
        }
    }

    #[tokio::test]
    async fn test_http_index_posts_entry() {
        let (url, state) = start_index().await;
        let index = HttpMembershipIndex::new(&url).unwrap();

        index.register(&entry("prod")).await.unwrap();

        let received = state.received.lock().unwrap().clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["clusterType"], "registered");
        assert_eq!(received[0]["owner"], "alice");
    }

    #[tokio::test]
    async fn test_http_index_treats_conflict_as_registered() {
        let (url, _state) = start_index().await;
        let index = HttpMembershipIndex::new(&url).unwrap();

        index.register(&entry("prod")).await.unwrap();
        index.register(&entry("prod")).await.unwrap();
    }

    #[tokio::test]
    async fn test_http_index_surfaces_server_errors() {
        let (url, _state) = start_index().await;
        let index = HttpMembershipIndex::new(&url).unwrap();

        let err = index.register(&entry("broken")).await.unwrap_err();
        assert!(matches!(err, ControllerError::Membership(_)));
    }

    #[tokio::test]
    async fn test_noop_index_accepts_everything() {
        NoopMembershipIndex.register(&entry("prod")).await.unwrap();
    }
}
