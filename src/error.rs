//! Error taxonomy for the ingestion and sync core.
//!
//! Record-level problems (`ParseError` per record, `ValidationError`) are
//! recovered where they happen and only show up in a [`DropReport`]. The
//! variants of [`SyncError`] abort a sync cycle and put the playlist into the
//! `error` state without touching previously persisted data.
//!
//! [`DropReport`]: crate::models::DropReport

use thiserror::Error;
use uuid::Uuid;

/// Malformed input at the format level
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Non-empty input produced no usable channel record
    #[error("no usable channel records in input")]
    Empty,
    /// XMLTV document could not be read at all
    #[error("invalid XMLTV document: {0}")]
    Xml(String),
}

/// A single record failed required-field checks
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record `{record}` is missing required field `{field}`")]
pub struct ValidationError {
    pub record: String,
    pub field: &'static str,
}

/// Errors that abort a sync cycle
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Credentials rejected by the provider; never retried
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Portal session expired again after one refresh in the same cycle
    #[error("session expired repeatedly: {0}")]
    Session(String),

    /// Network failure or 5xx/429 that outlived the retry budget
    #[error("network error after {attempts} attempt(s): {message}")]
    TransientNetwork { attempts: u32, message: String },

    /// Unexpected status or payload from the provider
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("sync cancelled")]
    Cancelled,

    #[error("playlist {0} not found")]
    NotFound(Uuid),
}

impl SyncError {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Parse(_) => "parse",
            SyncError::Auth(_) => "auth",
            SyncError::Session(_) => "session",
            SyncError::TransientNetwork { .. } => "network",
            SyncError::Protocol(_) => "protocol",
            SyncError::Persistence(_) => "persistence",
            SyncError::Cancelled => "cancelled",
            SyncError::NotFound(_) => "not_found",
        }
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::Persistence(format!("{:#}", err))
    }
}
