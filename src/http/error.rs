//! HTTP mapping for [`TrackerError`].
//!
//! Every failure leaves as `{"error": "..."}`. Validation messages are shown to
//! the caller; storage and mirror failures are logged here and answered with a
//! generic class message.

use actix_web::{http::StatusCode, HttpRequest, HttpResponse, ResponseError};
use serde::Serialize;
use tracing::{error, warn};

use crate::error::{TrackerError, ValidationError};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self { error: message.into() }
    }
}

impl ResponseError for TrackerError {
    fn status_code(&self) -> StatusCode {
        match self {
            TrackerError::Validation(ValidationError::BodyTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            TrackerError::Validation(_) | TrackerError::NotConfigured => StatusCode::BAD_REQUEST,
            TrackerError::Storage(_) | TrackerError::Adapter(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            TrackerError::Validation(e) => e.to_string(),
            TrackerError::NotConfigured => "not configured".to_string(),
            TrackerError::Storage(e) => {
                error!("Storage failure while handling request: {}", e);
                "storage failure".to_string()
            }
            TrackerError::Adapter(e) => {
                error!("Mirror failure while handling request: {}", e);
                "mirror failure".to_string()
            }
        };
        HttpResponse::build(self.status_code()).json(ErrorBody::new(message))
    }
}

pub async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().json(ErrorBody::new("method not allowed"))
}

pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(ErrorBody::new("not found"))
}

pub fn query_error_handler(err: actix_web::error::QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    warn!("Rejected query string: {}", err);
    TrackerError::from(ValidationError::MalformedRequest).into()
}
