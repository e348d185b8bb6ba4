//! Controller configuration from environment variables.

use std::net::SocketAddr;

use tracing::info;
use url::Url;

use crate::error::ControllerError;

const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_BACKOFF_MIN_MINUTES: u64 = 1;
const DEFAULT_BACKOFF_MAX_MINUTES: u64 = 10;

/// Runtime configuration of the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch, all namespaces when `None`
    pub watch_namespace: Option<String>,
    /// DNS suffix recorded on every registered `ManagedCluster`
    pub cluster_dns_domain: String,
    /// Base URL of the membership index, registration is skipped when `None`
    pub membership_index_url: Option<Url>,
    /// Listen address of the probe/admission server
    pub http_addr: SocketAddr,
    /// First retry delay of a failing key
    pub backoff_min_minutes: u64,
    /// Upper bound of the retry delay
    pub backoff_max_minutes: u64,
}

impl ControllerConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup` (empty values count as unset).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let membership_index_url = var("MEMBERSHIP_INDEX_URL")
            .map(|raw| {
                Url::parse(&raw).map_err(|e| {
                    ControllerError::InvalidConfig(format!("MEMBERSHIP_INDEX_URL {raw:?}: {e}"))
                })
            })
            .transpose()?;

        let http_addr = var("HTTP_ADDR")
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ControllerError::InvalidConfig(format!("HTTP_ADDR: {e}")))?;

        let backoff_min_minutes = parse_minutes(var("BACKOFF_MIN_MINUTES"), "BACKOFF_MIN_MINUTES", DEFAULT_BACKOFF_MIN_MINUTES)?;
        let backoff_max_minutes = parse_minutes(var("BACKOFF_MAX_MINUTES"), "BACKOFF_MAX_MINUTES", DEFAULT_BACKOFF_MAX_MINUTES)?;
        if backoff_max_minutes < backoff_min_minutes {
            return Err(ControllerError::InvalidConfig(format!(
                "BACKOFF_MAX_MINUTES ({backoff_max_minutes}) is below BACKOFF_MIN_MINUTES ({backoff_min_minutes})"
            )));
        }

        Ok(Self {
            watch_namespace: var("WATCH_NAMESPACE"),
            cluster_dns_domain: var("CLUSTER_DNS_DOMAIN").unwrap_or_default(),
            membership_index_url,
            http_addr,
            backoff_min_minutes,
            backoff_max_minutes,
        })
    }

    /// Logs the effective configuration
    pub fn log(&self) {
        info!("Configuration:");
        info!("  Namespace: {}", self.watch_namespace.as_deref().unwrap_or("all namespaces"));
        info!("  Cluster DNS domain: {}", self.cluster_dns_domain);
        info!(
            "  Membership index: {}",
            self.membership_index_url.as_ref().map_or("disabled", Url::as_str)
        );
        info!("  HTTP address: {}", self.http_addr);
        info!("  Backoff: {}m..{}m", self.backoff_min_minutes, self.backoff_max_minutes);
    }
}

fn parse_minutes(raw: Option<String>, key: &str, default: u64) -> Result<u64, ControllerError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(minutes) if minutes > 0 => Ok(minutes),
        Ok(_) => Err(ControllerError::InvalidConfig(format!("{key} must be at least 1"))),
        Err(e) => Err(ControllerError::InvalidConfig(format!("{key} {raw:?}: {e}"))),
    }
}
