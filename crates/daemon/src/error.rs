// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain error type and the wire-facing error code it maps to.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the supervision engine's internal components.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("capture timed out after {0:?}")]
    CaptureTimeout(std::time::Duration),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("not connected")]
    NotConnected,
    #[error("store error: {0}")]
    StoreError(String),
    #[error("notifier error: {0}")]
    NotifierError(String),
    #[error("queue error: {0}")]
    QueueError(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Map this error onto the wire-facing [`ErrorCode`].
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SessionNotFound(_) => ErrorCode::NotFound,
            Self::CaptureTimeout(_) => ErrorCode::Internal,
            Self::CaptureFailed(_) => ErrorCode::Internal,
            Self::SendFailed(_) => ErrorCode::Internal,
            Self::NotConnected => ErrorCode::NotFound,
            Self::StoreError(_) => ErrorCode::Internal,
            Self::NotifierError(_) => ErrorCode::Internal,
            Self::QueueError(_) => ErrorCode::Internal,
            Self::InvalidRequest(_) => ErrorCode::BadRequest,
            Self::Serialization(_) => ErrorCode::Internal,
        }
    }
}

/// Unified error codes used across the Control Surface's JSON error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    NotFound,
    Conflict,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_not_found_maps_to_404() {
        let err = AppError::SessionNotFound("demo".into());
        assert_eq!(err.code().http_status(), 404);
    }

    #[test]
    fn invalid_request_maps_to_400() {
        let err = AppError::InvalidRequest("empty command".into());
        assert_eq!(err.code().http_status(), 400);
    }
}
