//! Role gate delegated to the auth service
//!
//! The caller's `Authorization` header is handed to
//! `{auth.service_url}/api/v1/auth/verify-token?allowedRoles=...`. A non-2xx
//! answer is relayed as-is; an unreachable auth service yields 503.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use medcore_core::Role;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::{audit, AppState};

pub const ADMIN_ROLES: &[Role] = &[Role::Administrador];
pub const STAFF_ROLES: &[Role] = &[Role::Administrador, Role::Medico, Role::Enfermera];

/// Caller identity as reported by the auth service.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    user: Option<AuthUser>,
}

pub fn allowed_roles_param(roles: &[Role]) -> String {
    roles.iter().map(Role::as_str).collect::<Vec<_>>().join(",")
}

/// Administrators only.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    authorize(&state, ADMIN_ROLES, request, next).await
}

/// Administrators, doctors and nurses.
pub async fn require_staff(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    authorize(&state, STAFF_ROLES, request, next).await
}

fn unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "error": "Service unavailable",
            "message": "The authentication service is not available right now. Please try again later."
        })),
    )
        .into_response()
}

async fn authorize(
    state: &AppState,
    roles: &[Role],
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    if !state.config.auth.enabled {
        return Ok(next.run(request).await);
    }

    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let Some(auth_header) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
    else {
        audit::log_auth_attempt(&client_ip, None, false);
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "No token provided" })),
        )
            .into_response());
    };

    let url = format!(
        "{}/api/v1/auth/verify-token",
        state.config.auth.service_url.trim_end_matches('/')
    );
    let response = state
        .http
        .get(url)
        .query(&[("allowedRoles", allowed_roles_param(roles))])
        .header(header::AUTHORIZATION, auth_header)
        .timeout(Duration::from_secs(state.config.auth.timeout_secs))
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Auth service unreachable");
            unavailable()
        })?;

    let status = response.status();
    if !status.is_success() {
        let body: Value = response
            .json()
            .await
            .unwrap_or_else(|_| json!({ "error": "Unauthorized" }));
        audit::log_auth_attempt(&client_ip, None, false);
        return Err((status, Json(body)).into_response());
    }

    let verified: VerifyResponse = response.json().await.map_err(|e| {
        tracing::error!(error = %e, "Invalid response from auth service");
        unavailable()
    })?;

    let user_id = verified.user.as_ref().map(|u| u.id.clone());
    audit::log_auth_attempt(&client_ip, user_id.as_deref(), true);
    if let Some(user) = verified.user {
        request.extensions_mut().insert(user);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_roles_param() {
        assert_eq!(allowed_roles_param(ADMIN_ROLES), "ADMINISTRADOR");
        assert_eq!(
            allowed_roles_param(STAFF_ROLES),
            "ADMINISTRADOR,MEDICO,ENFERMERA"
        );
    }

    #[test]
    fn test_auth_user_from_verify_response() {
        let body = r#"{"user":{"id":"u1","fullname":"Ana","role":"ADMINISTRADOR","status":"ACTIVE"}}"#;
        let parsed: VerifyResponse = serde_json::from_str(body).unwrap();
        let user = parsed.user.unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.role.as_deref(), Some("ADMINISTRADOR"));

        let parsed: VerifyResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.user.is_none());
    }
}
