//! HTTP error contract.
//!
//! Every failure reaching a route handler becomes an [`ApiError`], rendered
//! as:
//!
//! ```json
//! { "error": "Failed to get response from AI service", "details": "Invalid API key" }
//! ```
//!
//! `details` is omitted when there is nothing useful to add.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::chat::ChatError;
use crate::knowledge::ContributionError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// A required credential or setting is missing (500).
    #[error("{0}")]
    Config(String),
    /// The request itself is unacceptable (400).
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<String>,
    },
    /// An external collaborator failed or answered badly.
    #[error("{error}")]
    Upstream {
        status: StatusCode,
        error: String,
        details: Option<String>,
    },
    /// Anything else (500).
    #[error("Internal server error")]
    Internal { details: String },
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        ApiError::Internal {
            details: err.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Config(_) | ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Upstream { status, .. } => *status,
        }
    }

    fn details(&self) -> Option<&str> {
        match self {
            ApiError::Config(_) => None,
            ApiError::Validation { details, .. } | ApiError::Upstream { details, .. } => {
                details.as_deref()
            }
            ApiError::Internal { details } => Some(details),
        }
    }
}

/// JSON error body.
#[derive(Serialize)]
struct ErrorBody<'a> {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.to_string(),
            details: self.details(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::MissingApiKey => {
                ApiError::Config("OpenRouter API key not configured".to_string())
            }
            ChatError::NoMessages => ApiError::validation("Messages array is required"),
            ChatError::Upstream { status, body } => {
                tracing::error!(status, body = %body, "chat API error");
                let status = StatusCode::from_u16(status)
                    .ok()
                    .filter(|s| s.is_client_error() || s.is_server_error())
                    .unwrap_or(StatusCode::BAD_GATEWAY);
                let details = if status == StatusCode::UNAUTHORIZED {
                    "Invalid API key"
                } else {
                    "Service temporarily unavailable"
                };
                ApiError::Upstream {
                    status,
                    error: "Failed to get response from AI service".to_string(),
                    details: Some(details.to_string()),
                }
            }
            ChatError::EmptyChoices => ApiError::Upstream {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                error: "No response generated".to_string(),
                details: None,
            },
            ChatError::Internal(e) => {
                tracing::error!(error = %format!("{:#}", e), "chat request failed");
                ApiError::internal(format!("{:#}", e))
            }
        }
    }
}

impl From<ContributionError> for ApiError {
    fn from(err: ContributionError) -> Self {
        match err {
            ContributionError::MissingFields => {
                ApiError::validation("Question and answer are required.")
            }
            ContributionError::Embedding(e) => {
                tracing::error!(error = %format!("{:#}", e), "contribution embedding failed");
                ApiError::Upstream {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    error: "Failed to generate embedding".to_string(),
                    details: Some(format!("{:#}", e)),
                }
            }
            ContributionError::Storage(e) => {
                tracing::error!(error = %format!("{:#}", e), "contribution storage failed");
                ApiError::internal(format!("{:#}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_of(err: ApiError) -> (StatusCode, serde_json::Value) {
        let status = err.status();
        let body = ErrorBody {
            error: err.to_string(),
            details: err.details(),
        };
        (status, serde_json::to_value(&body).unwrap())
    }

    #[test]
    fn test_missing_key_maps_to_500_without_details() {
        let (status, body) = body_of(ChatError::MissingApiKey.into());
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            serde_json::json!({"error": "OpenRouter API key not configured"})
        );
    }

    #[test]
    fn test_upstream_401_passes_through() {
        let (status, body) = body_of(
            ChatError::Upstream {
                status: 401,
                body: "bad key".into(),
            }
            .into(),
        );
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["details"], "Invalid API key");
    }

    #[test]
    fn test_upstream_odd_status_becomes_bad_gateway() {
        let err: ApiError = ChatError::Upstream {
            status: 204,
            body: String::new(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_contribution_errors() {
        let (status, body) = body_of(ContributionError::MissingFields.into());
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Question and answer are required.");

        let (status, body) =
            body_of(ContributionError::Embedding(anyhow::anyhow!("python3 missing")).into());
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to generate embedding");
        assert_eq!(body["details"], "python3 missing");
    }

    #[test]
    fn test_internal_carries_details() {
        let (_, body) = body_of(ApiError::internal("db locked"));
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(body["details"], "db locked");
    }
}
