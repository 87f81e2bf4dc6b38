//! Error taxonomy shared by the store, the ingest/query handlers and the mirror.
//!
//! Each variant maps to one failure class on the wire; the HTTP mapping lives in
//! `http::error` so this module stays framework-agnostic.

use thiserror::Error;

/// Bad or missing input. Always a client error, never retried by the server.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("{field} must be a number")]
    NotANumber { field: &'static str },
    #[error("{field} is out of range")]
    OutOfRange { field: &'static str },
    #[error("busId must be at most {max} characters")]
    BusIdTooLong { max: usize },
    #[error("limit must be a positive integer")]
    NonPositiveLimit,
    #[error("limit must be an integer between 1 and {max}")]
    InvalidLimit { max: i64 },
    #[error("malformed request")]
    MalformedRequest,
    #[error("request body exceeds {max} bytes")]
    BodyTooLarge { max: usize },
}

/// Persistence failure. Surfaces as a 5xx; the caller may retry.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("in-memory store lock poisoned")]
    Poisoned,
}

/// Failure talking to the external mirror sink. Logged and absorbed.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("mirror transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("mirror responded with status {0}")]
    Status(u16),
    #[error("mirror payload could not be decoded: {0}")]
    Decode(String),
    #[error("mirror configuration is invalid: {0}")]
    InvalidConfig(String),
    #[error("mirror request timed out")]
    Timeout,
    #[error("mirror stream was closed by the sink: {0}")]
    StreamClosed(String),
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("mirror is not configured")]
    NotConfigured,
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

pub type TrackerResult<T> = Result<T, TrackerError>;
