//! Bulk import endpoint (POST /api/v1/users/bulk-import)

use axum::{
    extract::{Multipart, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use medcore_core::tabular::FileFormat;
use std::sync::Arc;

use crate::audit::{self, AuditContext};
use crate::handlers::{api_error, ApiError};
use crate::import::BulkImporter;
use crate::AppState;

/// Multipart field names that carry the upload, in order of preference.
const FILE_FIELDS: &[&str] = &["file", "document"];

struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

/// Pick the upload out of the multipart body: a field named `file` or
/// `document`, otherwise the first part that carries a filename.
async fn read_upload(multipart: &mut Multipart) -> Result<Option<Upload>, ApiError> {
    let mut fallback: Option<Upload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(e.status(), e.body_text()))?
    {
        let preferred = field.name().is_some_and(|n| FILE_FIELDS.contains(&n));
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        if !preferred && fallback.is_some() {
            continue;
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| api_error(e.status(), e.body_text()))?
            .to_vec();
        let upload = Upload { filename, bytes };

        if preferred {
            return Ok(Some(upload));
        }
        fallback = Some(upload);
    }

    Ok(fallback)
}

pub async fn bulk_import(
    State(state): State<Arc<AppState>>,
    audit_ctx: AuditContext,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let Some(upload) = read_upload(&mut multipart).await? else {
        return Err(api_error(StatusCode::BAD_REQUEST, "File required"));
    };

    if let Err(e) = FileFormat::from_filename(&upload.filename) {
        audit::log_operation_error(&audit_ctx, "import", None, &e.to_string());
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("{} (allowed: .csv, .xlsx, .xls, .json)", e),
        ));
    }

    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let importer = BulkImporter::new(
        state.provisioner(state.bulk_policy()),
        state.forwarder.as_ref(),
    );
    let outcome = importer
        .import(&upload.bytes, &upload.filename, authorization)
        .await
        .map_err(|e| {
            audit::log_operation_error(&audit_ctx, "import", None, &e.to_string());
            api_error(StatusCode::BAD_REQUEST, format!("Could not read file: {}", e))
        })?;

    audit::log_import(&audit_ctx, &upload.filename, &outcome.summary);
    Ok((StatusCode::OK, Json(outcome)).into_response())
}
