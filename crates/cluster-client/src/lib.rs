//! Remote cluster access
//!
//! Builds Kubernetes clients for onboarded (member) clusters from the
//! kubeconfigs users submit, and exposes the few operations the onboarding
//! controller needs against them behind a trait so reconcilers can be tested
//! without a live cluster.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{KubeconfigGateway, RemoteClusterGateway, decode_kubeconfig};
//!
//! # async fn example(encoded: &str) -> Result<(), cluster_client::ClusterClientError> {
//! let raw = decode_kubeconfig(encoded)?;
//! let remote = KubeconfigGateway::new().connect(&raw).await?;
//! remote.probe().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
#[path = "trait.rs"]
pub mod cluster_trait;
pub mod error;
pub mod kubeconfig;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{KubeRemoteClient, KubeconfigGateway};
pub use cluster_trait::{RemoteClusterClient, RemoteClusterGateway};
pub use error::ClusterClientError;
pub use kubeconfig::{apiserver_host, decode_kubeconfig, external_secret_name, parse_kubeconfig, server_uri};
#[cfg(feature = "test-util")]
pub use mock::{MockGateway, MockRemoteClusterClient, sample_kubeconfig};
