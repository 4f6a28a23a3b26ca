pub mod users;

use axum::{http::StatusCode, response::Json};
use medcore_store::StoreError;
use serde_json::{json, Value};

use crate::provision::ProvisionError;

/// Error half of every handler result
pub type ApiError = (StatusCode, Json<Value>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

pub fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::Conflict { field } => api_error(
            StatusCode::CONFLICT,
            format!("Conflict: {} already exists", field),
        ),
        other => {
            tracing::error!(error = %other, "Store failure");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

pub fn provision_error(err: &ProvisionError) -> ApiError {
    let status = match err {
        ProvisionError::Conflict { .. } => StatusCode::CONFLICT,
        ProvisionError::SpecialtyNotFound(_) | ProvisionError::DepartmentNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        ProvisionError::Hashing(_)
        | ProvisionError::EmailDelivery(_)
        | ProvisionError::EmailTimeout(_)
        | ProvisionError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, err.to_string())
}

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "medcore-users",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
