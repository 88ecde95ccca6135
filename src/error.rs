//! Per-request failures and their wire format.

use crate::auth::Scheme;
use crate::dispatch::allow_header;
use crate::model::HttpMethod;
use axum::http::header::{ALLOW, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

pub use crate::registry::RegistryError as ConfigurationError;

/// Terminal outcome of a request that was not served.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServeError {
    #[error("No mock endpoint configured for path '/{path}'")]
    NotFound { path: String },

    #[error("Authentication required")]
    Unauthorized { scheme: Scheme },

    #[error("Credentials not accepted")]
    Forbidden,

    #[error("Method {method} not allowed")]
    MethodNotAllowed {
        method: String,
        allowed: Vec<HttpMethod>,
    },

    #[error("Configuration store unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl ServeError {
    /// HTTP status for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            ServeError::NotFound { .. } => StatusCode::NOT_FOUND,
            ServeError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ServeError::Forbidden => StatusCode::FORBIDDEN,
            ServeError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ServeError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Machine-readable kind, used as the `error` field of the body.
    pub fn kind(&self) -> &'static str {
        match self {
            ServeError::NotFound { .. } => "not_found",
            ServeError::Unauthorized { .. } => "unauthorized",
            ServeError::Forbidden => "forbidden",
            ServeError::MethodNotAllowed { .. } => "method_not_allowed",
            ServeError::UpstreamUnavailable(_) => "upstream_unavailable",
        }
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });

        let mut extra = Vec::new();
        match &self {
            ServeError::MethodNotAllowed { allowed, .. } => {
                body["allowed"] = serde_json::json!(allowed);
                if let Ok(value) = HeaderValue::from_str(&allow_header(allowed)) {
                    extra.push((ALLOW, value));
                }
            }
            ServeError::Unauthorized { scheme } => {
                if let Some(challenge) = scheme.challenge() {
                    extra.push((WWW_AUTHENTICATE, HeaderValue::from_static(challenge)));
                }
            }
            _ => {}
        }

        let mut response = (status, Json(body)).into_response();
        response.headers_mut().extend(extra);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::BASIC_CHALLENGE;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServeError::NotFound {
                path: "x".to_string()
            }
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ServeError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ServeError::UpstreamUnavailable("down".to_string()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_method_not_allowed_sets_allow() {
        let response = ServeError::MethodNotAllowed {
            method: "DELETE".to_string(),
            allowed: vec![HttpMethod::Get, HttpMethod::Post],
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], "GET, POST");
    }

    #[test]
    fn test_unauthorized_challenge_only_for_basic() {
        let basic = ServeError::Unauthorized {
            scheme: Scheme::Basic,
        }
        .into_response();
        assert_eq!(basic.headers()[WWW_AUTHENTICATE], BASIC_CHALLENGE);

        let api_key = ServeError::Unauthorized {
            scheme: Scheme::ApiKey,
        }
        .into_response();
        assert!(api_key.headers().get(WWW_AUTHENTICATE).is_none());
    }
}
