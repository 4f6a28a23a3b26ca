//! Forwarding of patient rows to the patients service

use async_trait::async_trait;
use medcore_core::ValidatedRecord;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("Patient service unreachable: {0}")]
    Transport(String),

    #[error("Patient service answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response from patient service: {0}")]
    InvalidResponse(String),
}

/// A patient in the shape the patients service expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardedPatient {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub birth_date: String,
    #[serde(rename = "genero", skip_serializing_if = "Option::is_none")]
    pub genero: Option<String>,
}

impl ForwardedPatient {
    pub fn from_record(record: &ValidatedRecord) -> Self {
        let (first_name, last_name) = split_name(&record.fullname);
        Self {
            first_name,
            last_name,
            email: record.email.clone(),
            phone: record.phone.clone(),
            birth_date: record.date_of_birth.format("%Y-%m-%d").to_string(),
            genero: record.gender.clone(),
        }
    }
}

/// All tokens but the last form the first name; the last token is the last name.
pub fn split_name(fullname: &str) -> (String, String) {
    let mut tokens: Vec<&str> = fullname.split_whitespace().collect();
    let last = tokens.pop().unwrap_or_default().to_string();
    (tokens.join(" "), last)
}

/// Aggregate counts reported back by the patients service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardSummary {
    pub accepted: usize,
    pub rejected: usize,
}

#[async_trait]
pub trait PatientForwarder: Send + Sync {
    /// Send one batch. `authorization` is the caller's header, passed through.
    async fn forward(
        &self,
        patients: &[ForwardedPatient],
        authorization: Option<&str>,
    ) -> Result<ForwardSummary, ForwardError>;
}

#[derive(Debug, Default, Deserialize)]
struct RemoteResponse {
    #[serde(default)]
    summary: RemoteSummary,
}

#[derive(Debug, Default, Deserialize)]
struct RemoteSummary {
    #[serde(default)]
    successful: usize,
    #[serde(default)]
    failed: usize,
}

/// Forwarder backed by the patients service HTTP API.
pub struct HttpPatientForwarder {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpPatientForwarder {
    pub fn new(client: reqwest::Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: format!("{}/api/v1/patients/bulk", base_url.trim_end_matches('/')),
            timeout,
        }
    }
}

#[async_trait]
impl PatientForwarder for HttpPatientForwarder {
    async fn forward(
        &self,
        patients: &[ForwardedPatient],
        authorization: Option<&str>,
    ) -> Result<ForwardSummary, ForwardError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&serde_json::json!({ "patients": patients }));
        if let Some(auth) = authorization {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ForwardError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ForwardError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(ForwardError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: RemoteResponse = if body.trim().is_empty() {
            RemoteResponse::default()
        } else {
            serde_json::from_str(&body).map_err(|e| ForwardError::InvalidResponse(e.to_string()))?
        };

        Ok(ForwardSummary {
            accepted: parsed.summary.successful,
            rejected: parsed.summary.failed,
        })
    }
}
