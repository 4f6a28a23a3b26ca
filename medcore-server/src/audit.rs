use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use medcore_core::BatchSummary;
use std::convert::Infallible;
use std::net::SocketAddr;

use crate::auth::AuthUser;

/// Audit context extracted from HTTP request
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub user_id: Option<String>,
    pub client_ip: String,
}

impl AuditContext {
    pub fn new(user_id: Option<String>, client_ip: String) -> Self {
        Self { user_id, client_ip }
    }

    pub fn from_parts(parts: &Parts) -> Self {
        let client_ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let user_id = parts.extensions.get::<AuthUser>().map(|u| u.id.clone());

        Self { user_id, client_ip }
    }

    fn user(&self) -> &str {
        self.user_id.as_deref().unwrap_or("anonymous")
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AuditContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}

/// Log a successful mutation
pub fn log_operation_success(context: &AuditContext, operation: &str, user_id: &str) {
    tracing::info!(
        actor = context.user(),
        client_ip = %context.client_ip,
        operation = operation,
        target_user = user_id,
        status = "success",
        "Audit: {} users/{}",
        operation,
        user_id
    );
}

/// Log a failed mutation
pub fn log_operation_error(
    context: &AuditContext,
    operation: &str,
    user_id: Option<&str>,
    error: &str,
) {
    tracing::warn!(
        actor = context.user(),
        client_ip = %context.client_ip,
        operation = operation,
        target_user = user_id.unwrap_or("N/A"),
        status = "error",
        error = error,
        "Audit: {} failed: {}",
        operation,
        error
    );
}

/// Log the outcome of a bulk import
pub fn log_import(context: &AuditContext, filename: &str, summary: &BatchSummary) {
    tracing::info!(
        actor = context.user(),
        client_ip = %context.client_ip,
        operation = "import",
        filename = filename,
        total = summary.total,
        successful = summary.successful,
        failed = summary.failed,
        skipped = summary.skipped,
        "Audit: import {}",
        filename
    );
}

/// Log an authentication attempt
pub fn log_auth_attempt(client_ip: &str, user_id: Option<&str>, success: bool) {
    if success {
        tracing::info!(
            user_id = user_id.unwrap_or("unknown"),
            client_ip = %client_ip,
            status = "success",
            "Audit: Authentication successful"
        );
    } else {
        tracing::warn!(
            client_ip = %client_ip,
            status = "failed",
            "Audit: Authentication failed"
        );
    }
}
