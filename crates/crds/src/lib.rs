//! Fleet CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the Fleet controllers.

pub mod cluster_onboarding;
pub mod labels;
pub mod managed_cluster;

pub use cluster_onboarding::*;
pub use managed_cluster::*;
