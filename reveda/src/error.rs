use crate::models::{ApiResponse, FieldError};
use serde_json::Value;
use thiserror::Error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Everything that can go wrong talking to the backend.
///
/// Only `Unauthenticated` is tied to session state: it is returned after the single
/// refresh-and-replay attempt has been used up, or when there was nothing to refresh with.
#[derive(Error, Debug)]
pub enum ApiError {
    /// No response at all: DNS, refused connection, timeout, broken body.
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// Rejected input, either by local checks or by the server (4xx or `success: false`).
    #[error("{message}")]
    Validation {
        message: String,
        errors: Vec<FieldError>,
    },

    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    /// 5xx, or a response that doesn't fit the envelope.
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Local session persistence failed.
    #[error("session storage: {0:#}")]
    Storage(anyhow::Error),
}

impl ApiError {
    pub fn validation(message: &str) -> Self {
        ApiError::Validation {
            message: message.to_string(),
            errors: vec![],
        }
    }

    pub fn invalid_field(field: &str, message: &str) -> Self {
        ApiError::Validation {
            message: message.to_string(),
            errors: vec![FieldError::new(field, message)],
        }
    }

    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, ApiError::Unauthenticated(_))
    }

    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }

    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ApiError::Validation { errors, .. } => errors,
            _ => &[],
        }
    }
}

fn envelope_message(env: &ApiResponse<Value>) -> Option<String> {
    env.error
        .clone()
        .filter(|e| !e.is_empty())
        .or_else(|| Some(env.message.clone()).filter(|m| !m.is_empty()))
}

/// Maps a raw HTTP status and body to either the decoded envelope or an error.
///
/// 401 is reported as `Unauthenticated` here; the refresh-and-replay logic in the client sits in
/// front of this and only lets a 401 through once it is final.
pub fn parse_reply(status: u16, body: &[u8]) -> ApiResult<ApiResponse<Value>> {
    let env: Option<ApiResponse<Value>> = serde_json::from_slice(body).ok();
    match status {
        200..=299 => {
            let env = env.ok_or(ApiError::Server {
                status,
                message: "malformed response envelope".to_string(),
            })?;
            if env.success {
                Ok(env)
            } else {
                Err(ApiError::Validation {
                    message: envelope_message(&env)
                        .unwrap_or_else(|| "request rejected".to_string()),
                    errors: env.errors.unwrap_or_default(),
                })
            }
        }
        401 => Err(ApiError::Unauthenticated(
            env.as_ref()
                .and_then(envelope_message)
                .unwrap_or_else(|| "unauthorized".to_string()),
        )),
        400..=499 => {
            let message = env
                .as_ref()
                .and_then(envelope_message)
                .unwrap_or_else(|| format!("request rejected ({status})"));
            Err(ApiError::Validation {
                message,
                errors: env.and_then(|e| e.errors).unwrap_or_default(),
            })
        }
        _ => Err(ApiError::Server {
            status,
            message: env
                .as_ref()
                .and_then(envelope_message)
                .unwrap_or_else(|| "unexpected response".to_string()),
        }),
    }
}

#[test]
fn test_parse_reply() {
    let ok = parse_reply(200, br#"{"success": true, "message": "ok", "data": [1, 2]}"#).unwrap();
    assert_eq!(ok.data, Some(serde_json::json!([1, 2])));

    match parse_reply(200, b"<html>gateway</html>") {
        Err(ApiError::Server { status: 200, .. }) => {}
        other => panic!("unexpected: {:?}", other),
    }

    match parse_reply(200, br#"{"success": false, "message": "Invalid OTP"}"#) {
        Err(ApiError::Validation { message, errors }) => {
            assert_eq!(message, "Invalid OTP");
            assert!(errors.is_empty());
        }
        other => panic!("unexpected: {:?}", other),
    }

    match parse_reply(
        400,
        br#"{"success": false, "message": "Validation failed",
             "errors": [{"field": "email", "message": "Email is required"}]}"#,
    ) {
        Err(err @ ApiError::Validation { .. }) => {
            assert_eq!(err.field_errors().len(), 1);
            assert_eq!(err.field_errors()[0].field, "email");
        }
        other => panic!("unexpected: {:?}", other),
    }

    // prefers the specific error over the generic message
    match parse_reply(
        404,
        br#"{"success": false, "message": "Failed", "error": "User not found"}"#,
    ) {
        Err(ApiError::Validation { message, .. }) => assert_eq!(message, "User not found"),
        other => panic!("unexpected: {:?}", other),
    }

    assert!(parse_reply(401, b"").unwrap_err().is_unauthenticated());

    match parse_reply(503, b"") {
        Err(ApiError::Server { status: 503, message }) => {
            assert_eq!(message, "unexpected response")
        }
        other => panic!("unexpected: {:?}", other),
    }
}
