use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum RelayResponseCode {
    Ok = 1,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RelayResponse {
    pub status: RelayResponseCode,
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("failed to decode request: {0}")]
    RequestDecodingError(String),
    #[error("failed to parse request: {0}")]
    RequestParsingError(#[from] serde_json::Error),

    #[error("request holds no record")]
    EmptyBatch,

    #[error("failed to decode record payload: {0}")]
    RecordDecodingError(String),
    #[error("failed to serialize record for fingerprinting: {0}")]
    FingerprintError(String),

    #[error("dedup store request failed: {0}")]
    StoreError(String),

    #[error("transient queue error, submission dropped")]
    RetryableSinkError,
    #[error("invalid message could not be submitted")]
    NonRetryableSinkError,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        match self {
            RelayError::RequestDecodingError(_)
            | RelayError::RequestParsingError(_)
            | RelayError::EmptyBatch
            | RelayError::RecordDecodingError(_)
            | RelayError::FingerprintError(_)
            | RelayError::NonRetryableSinkError => (StatusCode::BAD_REQUEST, self.to_string()),

            RelayError::StoreError(_) | RelayError::RetryableSinkError => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
        }
        .into_response()
    }
}
