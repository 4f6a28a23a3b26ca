use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A unique constraint rejected the write
    #[error("Conflict: {field} already exists")]
    Conflict { field: String },

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Classify a SQLite error, turning unique-constraint violations into `Conflict`.
    pub(crate) fn from_write(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, Some(message)) = &err
            && failure.code == rusqlite::ErrorCode::ConstraintViolation
            && let Some(field) = message
                .strip_prefix("UNIQUE constraint failed: ")
                .and_then(|columns| columns.split(',').next())
                .and_then(|column| column.trim().split_once('.'))
                .map(|(_, field)| field.to_string())
        {
            return StoreError::Conflict { field };
        }
        StoreError::Sqlite(err)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
