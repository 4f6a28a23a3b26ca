//! Account endpoints under `/api/v1/users`

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use medcore_core::{
    age::{age_on, is_valid_age, parse_date, MAX_AGE, MIN_AGE},
    normalize::{canonical_role, canonical_status},
    normalize_row, validate_row,
    validation::is_valid_name,
    Role, UserStatus,
};
use medcore_store::{Page, UserFilter, DEFAULT_PAGE_LIMIT};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{api_error, provision_error, store_error, ApiError};
use crate::audit::{self, AuditContext};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub role: Option<String>,
    pub status: Option<String>,
    pub q: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListQuery {
    fn filter(&self) -> Result<UserFilter, ApiError> {
        let mut filter = UserFilter::new();
        if let Some(raw) = self.role.as_deref().filter(|r| !r.trim().is_empty()) {
            let role = Role::parse(&canonical_role(raw)).ok_or_else(|| {
                api_error(StatusCode::BAD_REQUEST, format!("Invalid role: {}", raw))
            })?;
            filter = filter.role(role);
        }
        if let Some(raw) = self.status.as_deref().filter(|s| !s.trim().is_empty()) {
            let status = UserStatus::parse(&canonical_status(raw)).ok_or_else(|| {
                api_error(StatusCode::BAD_REQUEST, format!("Invalid status: {}", raw))
            })?;
            filter = filter.status(status);
        }
        if let Some(q) = &self.q {
            filter = filter.search(q.as_str());
        }
        Ok(filter)
    }

    fn page(&self) -> Page {
        Page::new(self.page.unwrap_or(1), self.limit.unwrap_or(DEFAULT_PAGE_LIMIT))
    }
}

fn list(state: &AppState, filter: &UserFilter, page: Page) -> Result<Response, ApiError> {
    let users = state.store.list_users(filter, page).map_err(store_error)?;
    let total = state.store.count_users(filter).map_err(store_error)?;

    Ok(Json(json!({
        "users": users,
        "pagination": {
            "total": total,
            "page": page.page,
            "limit": page.limit,
            "totalPages": page.total_pages(total),
        }
    }))
    .into_response())
}

/// List accounts (GET /api/v1/users)
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    list(&state, &query.filter()?, query.page())
}

async fn list_role(state: &AppState, query: ListQuery, role: Role) -> Result<Response, ApiError> {
    let page = query.page();
    let filter = ListQuery { role: None, ..query }.filter()?.role(role);
    list(state, &filter, page)
}

pub async fn list_doctors(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    list_role(&state, query, Role::Medico).await
}

pub async fn list_nurses(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    list_role(&state, query, Role::Enfermera).await
}

pub async fn list_patients(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    list_role(&state, query, Role::Paciente).await
}

/// Account statistics (GET /api/v1/users/stats)
pub async fn stats(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let (by_status, by_role) = tokio::join!(
        async { state.store.count_by_status() },
        async { state.store.count_by_role() }
    );
    let by_status = by_status.map_err(store_error)?;
    let by_role = by_role.map_err(store_error)?;

    let count_of = |status: UserStatus| {
        by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    };
    let total: u64 = by_status.iter().map(|(_, n)| n).sum();

    Ok(Json(json!({
        "total": total,
        "byStatus": {
            "active": count_of(UserStatus::Active),
            "pending": count_of(UserStatus::Pending),
            "inactive": count_of(UserStatus::Inactive),
        },
        "byRole": by_role
            .iter()
            .map(|(role, count)| json!({ "role": role, "count": count }))
            .collect::<Vec<_>>(),
    }))
    .into_response())
}

/// Shared single-create path: normalize, validate, provision with the
/// single-create verification window.
async fn create_with_role(
    state: &AppState,
    audit_ctx: &AuditContext,
    body: Value,
    forced_role: Option<Role>,
) -> Result<Response, ApiError> {
    let Value::Object(mut raw) = body else {
        return Err(api_error(StatusCode::BAD_REQUEST, "Request body must be a JSON object"));
    };
    match forced_role {
        Some(role) => {
            raw.retain(|key, _| key != "rol");
            raw.insert("role".into(), Value::String(role.as_str().into()));
        }
        None => {
            if !raw.contains_key("role") && !raw.contains_key("rol") {
                raw.insert("role".into(), Value::String(Role::Paciente.as_str().into()));
            }
        }
    }

    let row = normalize_row(&raw);
    let record = validate_row(&row, Utc::now().date_naive()).map_err(|e| {
        audit::log_operation_error(audit_ctx, "create", None, &e.to_string());
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Validation failed", "details": e.to_string(), "issues": e.issues })),
        )
    })?;

    let account = state
        .provisioner(state.single_create_policy())
        .provision(&record)
        .await
        .map_err(|e| {
            audit::log_operation_error(audit_ctx, "create", None, &e.to_string());
            provision_error(&e)
        })?;

    audit::log_operation_success(audit_ctx, "create", &account.id);
    Ok((StatusCode::CREATED, Json(account)).into_response())
}

/// Create one account (POST /api/v1/users); role defaults to PACIENTE
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    audit_ctx: AuditContext,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    create_with_role(&state, &audit_ctx, body, None).await
}

pub async fn create_doctor(
    State(state): State<Arc<AppState>>,
    audit_ctx: AuditContext,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    create_with_role(&state, &audit_ctx, body, Some(Role::Medico)).await
}

pub async fn create_nurse(
    State(state): State<Arc<AppState>>,
    audit_ctx: AuditContext,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    create_with_role(&state, &audit_ctx, body, Some(Role::Enfermera)).await
}

pub async fn create_patient(
    State(state): State<Arc<AppState>>,
    audit_ctx: AuditContext,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    create_with_role(&state, &audit_ctx, body, Some(Role::Paciente)).await
}

/// Read one account (GET /api/v1/users/{id})
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.store.find_user(&id).map_err(store_error)? {
        Some(account) => Ok(Json(account).into_response()),
        None => Err(api_error(StatusCode::NOT_FOUND, "User not found")),
    }
}

/// Mutable fields of an account. Absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUser {
    #[serde(alias = "fullName")]
    pub fullname: Option<String>,
    #[serde(alias = "telefono")]
    pub phone: Option<String>,
    #[serde(alias = "genero")]
    pub gender: Option<String>,
    #[serde(alias = "documentNumber")]
    pub document_number: Option<String>,
    #[serde(alias = "dateOfBirth")]
    pub date_of_birth: Option<String>,
}

fn blank_to_none(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Update an account (PUT /api/v1/users/{id})
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    audit_ctx: AuditContext,
    Path(id): Path<String>,
    Json(update): Json<UpdateUser>,
) -> Result<Response, ApiError> {
    let mut account = state
        .store
        .find_user(&id)
        .map_err(store_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "User not found"))?;

    if let Some(fullname) = update.fullname {
        let fullname = fullname.trim().to_string();
        if fullname.is_empty() || !is_valid_name(&fullname) {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "fullname: invalid name (letters and spaces only)",
            ));
        }
        account.fullname = fullname;
    }
    if let Some(phone) = update.phone {
        account.phone = blank_to_none(phone);
    }
    if let Some(gender) = update.gender {
        account.gender = blank_to_none(gender);
    }
    if let Some(document_number) = update.document_number {
        account.document_number = blank_to_none(document_number);
    }
    if let Some(raw) = update.date_of_birth {
        let date_of_birth = parse_date(&raw).ok_or_else(|| {
            api_error(StatusCode::BAD_REQUEST, "date_of_birth: invalid date")
        })?;
        let age = age_on(date_of_birth, Utc::now().date_naive());
        if !is_valid_age(age) {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                format!("date_of_birth: age must be between {} and {} (got {})", MIN_AGE, MAX_AGE, age),
            ));
        }
        account.date_of_birth = date_of_birth;
        account.age = age as u32;
    }

    state.store.update_user(&account).map_err(|e| {
        audit::log_operation_error(&audit_ctx, "update", Some(&id), &e.to_string());
        store_error(e)
    })?;

    audit::log_operation_success(&audit_ctx, "update", &id);
    Ok(Json(account).into_response())
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

/// Change the status of an account (PATCH /api/v1/users/{id}/status)
pub async fn set_status(
    State(state): State<Arc<AppState>>,
    audit_ctx: AuditContext,
    Path(id): Path<String>,
    Json(body): Json<StatusUpdate>,
) -> Result<Response, ApiError> {
    let status = UserStatus::parse(&canonical_status(&body.status)).ok_or_else(|| {
        api_error(StatusCode::BAD_REQUEST, format!("Invalid status: {}", body.status))
    })?;
    change_status(&state, &audit_ctx, &id, status, "status").await
}

/// Soft delete (DELETE /api/v1/users/{id})
pub async fn deactivate_user(
    State(state): State<Arc<AppState>>,
    audit_ctx: AuditContext,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    change_status(&state, &audit_ctx, &id, UserStatus::Inactive, "deactivate").await
}

async fn change_status(
    state: &AppState,
    audit_ctx: &AuditContext,
    id: &str,
    status: UserStatus,
    operation: &str,
) -> Result<Response, ApiError> {
    if !state.store.set_status(id, status).map_err(store_error)? {
        audit::log_operation_error(audit_ctx, operation, Some(id), "User not found");
        return Err(api_error(StatusCode::NOT_FOUND, "User not found"));
    }
    let account = state
        .store
        .find_user(id)
        .map_err(store_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "User not found"))?;

    audit::log_operation_success(audit_ctx, operation, id);
    Ok(Json(json!({ "message": format!("User status set to {}", status), "user": account })).into_response())
}

