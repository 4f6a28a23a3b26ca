//! medcore-server - Users service
//!
//! Account management and bulk user import for the MedCore platform.

pub mod audit;
pub mod auth;
pub mod bulk;
pub mod config;
pub mod forwarder;
pub mod handlers;
pub mod import;
pub mod mailer;
pub mod provision;

use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    middleware::from_fn_with_state,
    routing::{get, patch, post},
    Router,
};
use medcore_store::SqliteStore;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::config::{SeedSettings, ServerConfig};
use crate::forwarder::PatientForwarder;
use crate::handlers::users;
use crate::mailer::VerificationMailer;
use crate::provision::{AccountProvisioner, ProvisionPolicy};

/// Application state
pub struct AppState {
    pub store: SqliteStore,
    pub config: ServerConfig,
    pub mailer: Arc<dyn VerificationMailer>,
    pub forwarder: Arc<dyn PatientForwarder>,
    /// Shared client for calls to the auth service
    pub http: reqwest::Client,
}

impl AppState {
    /// Accounts created one at a time through the API
    pub fn single_create_policy(&self) -> ProvisionPolicy {
        ProvisionPolicy {
            verification_ttl: self.config.single_create_ttl(),
            email_timeout: self.config.email_timeout(),
            bcrypt_cost: self.config.bulk.bcrypt_cost,
        }
    }

    /// Accounts created from an uploaded file
    pub fn bulk_policy(&self) -> ProvisionPolicy {
        ProvisionPolicy {
            verification_ttl: self.config.bulk_create_ttl(),
            email_timeout: self.config.email_timeout(),
            bcrypt_cost: self.config.bulk.bcrypt_cost,
        }
    }

    pub fn provisioner(&self, policy: ProvisionPolicy) -> AccountProvisioner<'_> {
        AccountProvisioner::new(&self.store, self.mailer.as_ref(), policy)
    }
}

/// Insert configured specialties and departments that are not stored yet.
pub fn seed_catalogs(store: &SqliteStore, seed: &SeedSettings) -> medcore_store::Result<()> {
    for name in &seed.specialties {
        if store.find_specialty_by_name(name)?.is_none() {
            store.insert_specialty(&uuid::Uuid::new_v4().to_string(), name)?;
            tracing::info!(name = %name, "Seeded specialty");
        }
    }
    for name in &seed.departments {
        if store.find_department_by_name(name)?.is_none() {
            store.insert_department(&uuid::Uuid::new_v4().to_string(), name)?;
            tracing::info!(name = %name, "Seeded department");
        }
    }
    Ok(())
}

/// Build the application router with all routes and middleware
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let max_body = state.config.server.max_upload_bytes;

    let admin_routes = Router::new()
        .route("/api/v1/users", get(users::list_users).post(users::create_user))
        .route("/api/v1/users/stats", get(users::stats))
        .route("/api/v1/users/bulk-import", post(bulk::bulk_import))
        .route("/api/v1/users/doctors", post(users::create_doctor))
        .route("/api/v1/users/nurses", post(users::create_nurse))
        .route("/api/v1/users/patients", post(users::create_patient))
        .route(
            "/api/v1/users/{id}",
            axum::routing::put(users::update_user).delete(users::deactivate_user),
        )
        .route("/api/v1/users/{id}/status", patch(users::set_status))
        .route_layer(from_fn_with_state(state.clone(), auth::require_admin));

    let staff_routes = Router::new()
        .route("/api/v1/users/doctors", get(users::list_doctors))
        .route("/api/v1/users/nurses", get(users::list_nurses))
        .route("/api/v1/users/patients", get(users::list_patients))
        .route("/api/v1/users/{id}", get(users::get_user))
        .route_layer(from_fn_with_state(state.clone(), auth::require_staff));

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .merge(admin_routes)
        .merge(staff_routes)
        // Middleware
        .layer(DefaultBodyLimit::max(max_body))
        .layer(RequestBodyLimitLayer::new(max_body))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
