//! Cluster Onboarding Controller
//!
//! Brings existing Kubernetes clusters under management:
//! - ClusterOnboarding: validates the submitted kubeconfig, stores it in a
//!   secret and creates the `ManagedCluster` tracking resource
//! - kubeconfig Secret: records the control plane endpoint and creates the
//!   owner, developer, guest and GitOps identities on the remote cluster
//! - ManagedCluster: deletion marks the originating onboarding `Deleted`

mod admission;
mod backoff;
mod config;
mod controller;
mod error;
mod event_filter;
mod membership;
mod queue;
mod reconciler;
mod server;
mod store;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // Already installed when another component got there first
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Cluster Onboarding Controller");

    let config = ControllerConfig::from_env()?;
    config.log();

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
