//! Error types for the gateway

use std::io;

use axum::{
    Json,
    extract::rejection::BytesRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Client-visible message for every server-side failure.
pub const INTERNAL_ERROR_MESSAGE: &str = "An internal error occurred on the proxy server.";

/// Client-visible message for a rejected quota check.
pub const QUOTA_EXCEEDED_MESSAGE: &str =
    "Daily AI call limit exceeded. Please try again tomorrow.";

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// The inbound request used a method other than POST
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// A required secret or setting is missing or unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or malformed `Authorization` header
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The identity token was rejected by the lookup endpoint
    #[error("Invalid identity token: {0}")]
    InvalidToken(String),

    /// The caller has used up today's calls
    #[error("Daily quota exceeded for {uid} ({call_count}/{ceiling})")]
    QuotaExceeded {
        /// User id the quota belongs to
        uid: String,
        /// Calls already recorded today
        call_count: u32,
        /// Daily ceiling
        ceiling: u32,
    },

    /// PEM text is not a usable PKCS#8 RSA key
    #[error("Key import error: {0}")]
    KeyImport(String),

    /// Signing the service-account assertion failed
    #[error("Signing error: {0}")]
    Signing(String),

    /// The OAuth2 token endpoint did not return an access token
    #[error("Token exchange error: {0}")]
    TokenExchange(String),

    /// The identity lookup endpoint failed (not a rejection of the token)
    #[error("Identity lookup error: {0}")]
    IdentityLookup(String),

    /// Reading or writing the quota document failed
    #[error("Quota store error: {0}")]
    Store(String),

    /// The upstream AI API answered with a non-success status
    #[error("Upstream error {status}: {status_text}")]
    Upstream {
        /// Upstream HTTP status code
        status: u16,
        /// Canonical reason phrase for the status
        status_text: String,
    },

    /// The inbound body is not JSON
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The inbound body is JSON but not a shape the upstream adapter accepts
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The inbound body exceeds `server.max_body_size`
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// The request did not finish within the configured deadline
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status returned to the caller for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Unauthorized(_) | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::BadRequest(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message placed in the `error` field of the response body.
    ///
    /// Policy rejections are specific; server-side failures are generic so
    /// nothing about credentials or upstream internals leaks to the caller.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::MethodNotAllowed(_) => "Method Not Allowed".to_string(),
            Self::Unauthorized(_) => "Unauthorized".to_string(),
            Self::InvalidToken(_) => "Invalid token".to_string(),
            Self::QuotaExceeded { .. } => QUOTA_EXCEEDED_MESSAGE.to_string(),
            Self::BadRequest(_) => "Invalid JSON body".to_string(),
            Self::InvalidRequest(_) => "Invalid request body".to_string(),
            Self::PayloadTooLarge(_) => "Request body too large".to_string(),
            Self::Upstream { status_text, .. } => format!("API Error: {status_text}"),
            Self::Config(_) => "The gateway is not configured.".to_string(),
            _ => INTERNAL_ERROR_MESSAGE.to_string(),
        }
    }

    /// Whether this is a policy rejection rather than a server-side failure
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::MethodNotAllowed(_)
                | Self::Unauthorized(_)
                | Self::InvalidToken(_)
                | Self::QuotaExceeded { .. }
                | Self::BadRequest(_)
                | Self::InvalidRequest(_)
                | Self::PayloadTooLarge(_)
        )
    }
}

impl From<BytesRejection> for Error {
    fn from(rejection: BytesRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge(rejection.body_text())
        } else {
            Self::BadRequest(rejection.body_text())
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_rejection() {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
        } else {
            error!(status = status.as_u16(), error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.client_message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_errors_map_to_specific_statuses() {
        assert_eq!(
            Error::MethodNotAllowed("GET".into()).status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            Error::Unauthorized("missing header".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            Error::InvalidToken("no user".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            Error::QuotaExceeded {
                uid: "u1".into(),
                call_count: 20,
                ceiling: 20
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn server_errors_are_generic_for_the_client() {
        for err in [
            Error::Config("GEMINI_API_KEY missing".into()),
            Error::TokenExchange("HTTP 400".into()),
            Error::Store("HTTP 403".into()),
            Error::Signing("bad key".into()),
        ] {
            assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
            assert!(!err.client_message().contains("HTTP"));
            assert!(!err.client_message().contains("GEMINI"));
        }
    }

    #[test]
    fn upstream_status_is_relayed_with_summary() {
        let err = Error::Upstream {
            status: 503,
            status_text: "Service Unavailable".into(),
        };
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.client_message(), "API Error: Service Unavailable");
    }

    #[test]
    fn unauthorized_and_invalid_token_have_distinct_messages() {
        assert_eq!(Error::Unauthorized(String::new()).client_message(), "Unauthorized");
        assert_eq!(Error::InvalidToken(String::new()).client_message(), "Invalid token");
    }

    #[test]
    fn body_errors_have_distinct_client_messages() {
        let not_json = Error::BadRequest("expected value".into());
        let wrong_shape = Error::InvalidRequest("contents[0] has no text part".into());
        let too_large = Error::PayloadTooLarge("length limit exceeded".into());

        assert_eq!(not_json.client_message(), "Invalid JSON body");
        assert_eq!(wrong_shape.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(wrong_shape.client_message(), "Invalid request body");
        assert_eq!(too_large.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(too_large.client_message(), "Request body too large");
        assert!(too_large.is_rejection());
    }
}
