//! ClusterOnboarding validating webhook
//!
//! Once another actor has approved, rejected or retired an onboarding its
//! spec is frozen. Metadata-only updates, updates of objects being deleted,
//! creates and deletes are always admitted.

use axum::Json;
use crds::ClusterOnboarding;
use kube::ResourceExt;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use tracing::{debug, error, info};

use crate::error::ControllerError;

/// Phases after which the spec can no longer change
pub const LOCKED_PHASES: [&str; 3] = ["Approved", "Rejected", "ClusterDeleted"];

/// Checks an update of `old` into `new`; the error is the denial reason.
pub fn validate_update(old: &ClusterOnboarding, new: &ClusterOnboarding) -> Result<(), String> {
    if new.is_deleting() {
        return Ok(());
    }
    let phase = old.status.as_ref().map(|s| s.phase.as_str()).unwrap_or_default();
    if LOCKED_PHASES.contains(&phase) && old.spec != new.spec {
        return Err(format!(
            "ClusterOnboarding {} is {phase}, its spec can no longer be changed",
            new.name_any()
        ));
    }
    Ok(())
}

/// Admission decision for one request
pub fn review(request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);
    if !matches!(request.operation, Operation::Update) {
        return response;
    }
    let (Some(old), Some(new)) = (&request.old_object, &request.object) else {
        debug!(uid = %request.uid, "Update without both objects, allowing");
        return response;
    };

    let (old, new) = match (parse(old), parse(new)) {
        (Ok(old), Ok(new)) => (old, new),
        (Err(e), _) | (_, Err(e)) => {
            error!(uid = %request.uid, error = %e, "Failed to parse ClusterOnboarding");
            return response.deny(format!("invalid ClusterOnboarding: {e}"));
        }
    };

    match validate_update(&old, &new) {
        Ok(()) => response,
        Err(reason) => {
            info!(uid = %request.uid, name = %new.name_any(), "Denying ClusterOnboarding update: {}", reason);
            response.deny(reason)
        }
    }
}

fn parse(object: &DynamicObject) -> Result<ClusterOnboarding, ControllerError> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// `POST /validate-clusteronboarding`
pub async fn validate_handler(Json(body): Json<AdmissionReview<DynamicObject>>) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(review(&request).into_review())
}
