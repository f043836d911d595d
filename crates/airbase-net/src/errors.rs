use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use thiserror::Error;

use airbase_errors::prelude::{codes, ErrorBuilder, ErrorCode, ErrorObj};

/// Outcome classification for one downstream call. The router maps these onto
/// gateway-level statuses; `UpstreamError` keeps the downstream body so the
/// caller retains diagnostic detail.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("downstream `{service}` timed out after {timeout_ms}ms")]
    Timeout { service: String, timeout_ms: u64 },

    #[error("downstream `{service}` unreachable: {detail}")]
    ConnectionRefused { service: String, detail: String },

    #[error("downstream `{service}` returned {status}")]
    UpstreamError {
        service: String,
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },

    #[error("invalid request: {0}")]
    Invalid(String),
}

impl ClientError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ClientError::Timeout { .. } => codes::UPSTREAM_TIMEOUT,
            ClientError::ConnectionRefused { .. } => codes::UPSTREAM_UNAVAILABLE,
            ClientError::UpstreamError { .. } => codes::UPSTREAM_ERROR,
            ClientError::Invalid(_) => codes::SCHEMA_VALIDATION,
        }
    }

    pub fn to_obj(&self) -> ErrorObj {
        let user_msg = match self {
            ClientError::Timeout { service, .. } => {
                format!("Service `{service}` did not respond in time.")
            }
            ClientError::ConnectionRefused { service, .. } => {
                format!("Service `{service}` is unavailable.")
            }
            ClientError::UpstreamError { service, status, .. } => {
                format!("Service `{service}` failed with status {status}.")
            }
            ClientError::Invalid(_) => "Request could not be constructed.".to_string(),
        };
        ErrorBuilder::new(self.code())
            .user_msg(user_msg)
            .dev_msg(self.to_string())
            .build()
    }
}
