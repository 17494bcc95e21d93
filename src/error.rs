//! Error kinds and their mapping to HTTP responses.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// The caller's request is malformed. Always a 400.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid CNPJ")]
    InvalidTaxId,

    #[error("invalid user id")]
    InvalidRequester,

    #[error("no file received")]
    MissingFile,

    #[error("request is missing required fields")]
    MissingField,

    #[error("request contains invalid fields")]
    InvalidField,

    #[error("file exceeds the maximum upload size of {limit} bytes")]
    FileTooLarge { limit: usize },

    #[error("document could not be read")]
    UnreadableDocument,

    #[error("malformed multipart request")]
    MalformedRequest,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::InvalidCredentials => "invalid_credentials",
            ValidationError::InvalidTaxId => "invalid_tax_id",
            ValidationError::InvalidRequester => "invalid_requester",
            ValidationError::MissingFile => "missing_file",
            ValidationError::MissingField => "missing_field",
            ValidationError::InvalidField => "invalid_field",
            ValidationError::FileTooLarge { .. } => "file_too_large",
            ValidationError::UnreadableDocument => "unreadable_document",
            ValidationError::MalformedRequest => "malformed_request",
        }
    }
}

/// A remote OCR call failed or the job did not succeed.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("job {job_id} did not reach a terminal state within {waited:?}")]
    TimedOut { job_id: String, waited: Duration },

    #[error("provider reported success but returned no result for job {0}")]
    ResultUnavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProviderError {
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::Unavailable(_) => "provider_unavailable",
            ProviderError::SubmissionRejected(_) => "submission_rejected",
            ProviderError::JobFailed { .. } => "job_failed",
            ProviderError::TimedOut { .. } => "job_timed_out",
            ProviderError::ResultUnavailable(_) => "result_unavailable",
            ProviderError::Other(_) => "provider_error",
        }
    }

    /// Message safe to show the caller. Only the provider's own job failure
    /// reason is passed through; everything else stays in the logs.
    fn public_message(&self) -> String {
        match self {
            ProviderError::JobFailed { message, .. } => {
                format!("document analysis failed: {}", message)
            }
            ProviderError::SubmissionRejected(_) => {
                "the provider rejected the document".to_string()
            }
            ProviderError::TimedOut { .. } => {
                "document analysis did not finish in time".to_string()
            }
            _ => "an error occurred while processing the document".to_string(),
        }
    }
}

/// Everything a handler can fail with.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The extraction ran but its record could not be written.
    #[error("failed to record extraction {extraction_id}: {source}")]
    Persistence {
        extraction_id: uuid::Uuid,
        #[source]
        source: anyhow::Error,
    },

    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Validation(e) => {
                warn!("Rejected request: {}", e);
                (StatusCode::BAD_REQUEST, e.code(), e.to_string())
            }
            ApiError::Provider(e) => {
                error!("Provider error: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.code(), e.public_message())
            }
            ApiError::Persistence { extraction_id, source } => {
                error!("Persistence error for {}: {:#}", extraction_id, source);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "persistence_failed",
                    format!(
                        "the document was processed but extraction {} could not be saved",
                        extraction_id
                    ),
                )
            }
            ApiError::Unauthorized(reason) => {
                warn!("Unauthorized request: {}", reason);
                (
                    StatusCode::UNAUTHORIZED,
                    "unauthorized",
                    "missing or invalid bearer token".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { error: code, message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_validation_maps_to_bad_request() {
        let response = ApiError::from(ValidationError::InvalidCredentials).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid_credentials");
        assert_eq!(body["message"], "invalid credentials");
    }

    #[tokio::test]
    async fn test_job_failure_carries_provider_message() {
        let err = ProviderError::JobFailed {
            job_id: "job-1".to_string(),
            message: "unsupported format".to_string(),
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "job_failed");
        assert!(body["message"].as_str().unwrap().contains("unsupported format"));
    }

    #[tokio::test]
    async fn test_internal_detail_is_not_leaked() {
        let err = ProviderError::Other(anyhow::anyhow!("secret-endpoint.internal refused"));
        let response = ApiError::from(err).into_response();
        let body = body_json(response).await;
        assert_eq!(body["error"], "provider_error");
        assert!(!body["message"].as_str().unwrap().contains("secret-endpoint"));
    }
}
