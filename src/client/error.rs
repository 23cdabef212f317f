//! Caller-facing errors.
//!
//! Retries, rotations and skew corrections never surface here; a caller
//! sees either a value or one terminal `ApiError`.

use serde_json::Value;
use thiserror::Error;

use crate::codec::DecodeError;

/// Application error codes carried in JSON error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplicationErrorCode {
    ServerError,
    AccessTokenRevoked,
    ActiveUserError,
    DataNotFound,
    RequestLimitExceeded,
    SessionTimeoutResendOtp,
    InvalidOtp,
    Unknown,
}

impl ApplicationErrorCode {
    pub fn parse(code: &str) -> Self {
        match code.trim() {
            "15002" => Self::ServerError,
            "14001" => Self::AccessTokenRevoked,
            "14409" => Self::ActiveUserError,
            "15000" => Self::DataNotFound,
            "14290" => Self::RequestLimitExceeded,
            "14011" => Self::SessionTimeoutResendOtp,
            "14013" => Self::InvalidOtp,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServerError => "15002",
            Self::AccessTokenRevoked => "14001",
            Self::ActiveUserError => "14409",
            Self::DataNotFound => "15000",
            Self::RequestLimitExceeded => "14290",
            Self::SessionTimeoutResendOtp => "14011",
            Self::InvalidOtp => "14013",
            Self::Unknown => "unknown",
        }
    }
}

/// A parsed error response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationError {
    pub status: u16,
    pub code: ApplicationErrorCode,
    /// `errorCode` exactly as sent, string or number.
    pub raw_code: Option<String>,
    pub message: Option<String>,
}

impl ApplicationError {
    /// Parse `{"errorCode": "14011" | 14011, "message": "..."}`. Bodies that
    /// are not a JSON object yield an `Unknown` code.
    pub fn from_body(status: u16, body: &[u8]) -> Self {
        let object = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            });

        let raw_code = object.as_ref().and_then(|map| match map.get("errorCode") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        });
        let message = object
            .as_ref()
            .and_then(|map| map.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Self {
            status,
            code: raw_code
                .as_deref()
                .map(ApplicationErrorCode::parse)
                .unwrap_or(ApplicationErrorCode::Unknown),
            raw_code,
            message,
        }
    }
}

/// Terminal outcome of a failed logical request.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The device is offline. Never retried.
    #[error("no network connectivity")]
    Connectivity,

    /// Server or transport failure that outlived the retry policy.
    #[error("request failed{}: {detail}", .status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    TransientServer { status: Option<u16>, detail: String },

    /// Failure the retry policy refused to retry.
    #[error("request rejected with status {}: {}", .0.status, .0.message.as_deref().unwrap_or("no message"))]
    NonRetryable(ApplicationError),

    /// No configuration could be loaded, so the module has no URL.
    #[error("no endpoint configuration for module '{module}'")]
    ConfigUnavailable { module: String },

    /// A 2xx body did not decode.
    #[error("response decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// The request could not be turned into a URL.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request cancelled")]
    Cancelled,
}

impl ApiError {
    /// Stable machine-readable code.
    pub fn code(&self) -> String {
        match self {
            ApiError::Connectivity => "connectivity".into(),
            ApiError::TransientServer { .. } => "transient_server".into(),
            ApiError::NonRetryable(app) => app
                .raw_code
                .clone()
                .unwrap_or_else(|| format!("http_{}", app.status)),
            ApiError::ConfigUnavailable { .. } => "config_unavailable".into(),
            ApiError::Decode(_) => "decode".into(),
            ApiError::InvalidRequest(_) => "invalid_request".into(),
            ApiError::Cancelled => "cancelled".into(),
        }
    }

    /// Human-readable message; the server's own message when it sent one.
    pub fn message(&self) -> String {
        match self {
            ApiError::NonRetryable(ApplicationError {
                message: Some(message),
                ..
            }) => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_error_string_and_number_codes() {
        let e = ApplicationError::from_body(429, br#"{"errorCode":"14290","message":"slow down"}"#);
        assert_eq!(e.code, ApplicationErrorCode::RequestLimitExceeded);
        assert_eq!(e.message.as_deref(), Some("slow down"));

        let e = ApplicationError::from_body(400, br#"{"errorCode":14013}"#);
        assert_eq!(e.code, ApplicationErrorCode::InvalidOtp);
        assert_eq!(e.raw_code.as_deref(), Some("14013"));

        let e = ApplicationError::from_body(500, b"<html>");
        assert_eq!(e.code, ApplicationErrorCode::Unknown);
        assert_eq!(e.raw_code, None);
    }

    #[test]
    fn test_api_error_code_and_message() {
        let app = ApplicationError::from_body(404, br#"{"errorCode":"15000","message":"gone"}"#);
        let err = ApiError::NonRetryable(app);
        assert_eq!(err.code(), "15000");
        assert_eq!(err.message(), "gone");

        let bare = ApiError::NonRetryable(ApplicationError::from_body(304, b""));
        assert_eq!(bare.code(), "http_304");

        let transient = ApiError::TransientServer {
            status: Some(503),
            detail: "unavailable".into(),
        };
        assert_eq!(transient.code(), "transient_server");
        assert_eq!(transient.message(), "request failed with status 503: unavailable");
        assert_eq!(ApiError::Connectivity.code(), "connectivity");
    }
}
