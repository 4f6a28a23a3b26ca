use serde::Serialize;
use thiserror::Error;

/// Errors that prevent any row from being extracted out of an upload.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Workbook has no sheets")]
    EmptyWorkbook,

    #[error("Unreadable workbook: {0}")]
    Workbook(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ImportError>;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IssueCode {
    Required,
    Format,
    InvalidAge,
    Value,
    /// Constraint spanning several fields of the record
    Invariant,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Canonical field name, `None` for whole-record constraints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub code: IssueCode,
    pub message: String,
}

/// All field-level and record-level problems found in one row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn push(&mut self, field: Option<&str>, code: IssueCode, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            field: field.map(str::to_string),
            code,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_code(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .issues
            .iter()
            .map(|i| match &i.field {
                Some(field) => format!("{}: {}", field, i.message),
                None => i.message.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

impl std::error::Error for ValidationError {}
