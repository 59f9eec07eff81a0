use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use std::fmt;

use crate::core::InvoiceError;

#[derive(Debug)]
pub struct ApiError {
    message: String,
    status_code: StatusCode,
}

impl ApiError {
    pub fn new(message: impl Into<String>, status_code: StatusCode) -> Self {
        ApiError {
            message: message.into(),
            status_code,
        }
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::BAD_REQUEST)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::NOT_FOUND)
    }

    pub fn too_many_requests() -> Self {
        Self::new("Rate limit exceeded", StatusCode::TOO_MANY_REQUESTS)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code)
            .json(serde_json::json!({
                "error": self.message,
                "status": self.status_code.as_u16()
            }))
    }

    fn status_code(&self) -> StatusCode {
        self.status_code
    }
}

impl From<InvoiceError> for ApiError {
    fn from(err: InvoiceError) -> Self {
        let status_code = match &err {
            InvoiceError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            InvoiceError::UnsupportedFileType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            InvoiceError::MissingSession => StatusCode::UNAUTHORIZED,
            InvoiceError::NotFound(_) | InvoiceError::TemplateNotFound(_) => StatusCode::NOT_FOUND,
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            e if e.is_precondition() => StatusCode::CONFLICT,
            InvoiceError::Storage(_) | InvoiceError::Extraction(_) | InvoiceError::Export(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status_code.is_server_error() {
            tracing::error!(error = %err, "Request failed");
        }
        ApiError::new(err.to_string(), status_code)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::internal_server_error(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
