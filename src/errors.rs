//! Typed error hierarchy for Kartavya.
//!
//! `TrackerError` covers every failure a tracker operation can report. The
//! HTTP layer maps each variant to a status code in `tracker::api`.

use thiserror::Error;

/// Errors from tracker storage, auth and workflow operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Transition from '{from}' to '{to}' is not allowed")]
    InvalidTransition { from: String, to: String },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrackerError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<rusqlite::Error> for TrackerError {
    fn from(err: rusqlite::Error) -> Self {
        // UNIQUE violations surface as conflicts; everything else is a storage fault.
        if let rusqlite::Error::SqliteFailure(ref code, ref msg) = err {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                let detail = msg.clone().unwrap_or_else(|| err.to_string());
                if detail.contains("UNIQUE") {
                    return Self::Conflict(detail);
                }
                if detail.contains("FOREIGN KEY") {
                    return Self::Validation("Referenced record does not exist".into());
                }
            }
        }
        Self::Database(anyhow::Error::new(err))
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
