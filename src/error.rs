use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::db::models::OAuthError;
use crate::security::{EnvelopeError, PasswordError, TokenError};

pub type AuthResult<T> = Result<T, AuthError>;

// [business] Caller-facing error taxonomy for every core operation.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unknown or inactive client")]
    InvalidClient,
    #[error("redirect_uri is not registered for this client")]
    InvalidRedirectUri,
    #[error("invalid PKCE parameters: {0}")]
    InvalidPkce(String),
    #[error("invalid grant: {0}")]
    InvalidGrant(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    // [business] Fatal: nothing can be signed until an operator activates a key.
    #[error("no active signing key")]
    NoActiveKey,
    #[error("unknown signing key: {0}")]
    UnknownKey(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidRequest(_) => "invalid_request",
            AuthError::InvalidClient => "invalid_client",
            AuthError::InvalidRedirectUri => "invalid_redirect_uri",
            AuthError::InvalidPkce(_) => "invalid_pkce",
            AuthError::InvalidGrant(_) => "invalid_grant",
            AuthError::Unauthorized(_) => "unauthorized",
            AuthError::NoActiveKey => "no_active_key",
            AuthError::UnknownKey(_) => "unknown_key",
            AuthError::Internal(_) => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidRequest(_)
            | AuthError::InvalidRedirectUri
            | AuthError::InvalidPkce(_)
            | AuthError::InvalidGrant(_) => StatusCode::BAD_REQUEST,
            AuthError::InvalidClient | AuthError::Unauthorized(_) | AuthError::UnknownKey(_) => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::NoActiveKey => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        AuthError::InvalidRequest(msg.into())
    }

    pub fn invalid_grant(msg: impl Into<String>) -> Self {
        AuthError::InvalidGrant(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AuthError::Unauthorized(msg.into())
    }
}

// Client-facing verification failures. Call sites that need InvalidGrant map explicitly.
impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        AuthError::Unauthorized(err.to_string())
    }
}

impl From<PasswordError> for AuthError {
    fn from(err: PasswordError) -> Self {
        AuthError::Internal(anyhow::anyhow!(err))
    }
}

// Auth-tag mismatch on key material surfaces as a hard Unauthorized, never as a 500.
impl From<EnvelopeError> for AuthError {
    fn from(err: EnvelopeError) -> Self {
        tracing::error!("signing key envelope could not be opened: {}", err);
        AuthError::Unauthorized("signing key material could not be decrypted".into())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let description = match &self {
            AuthError::Internal(err) => {
                tracing::error!("internal error: {:#}", err);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = OAuthError::new(self.code()).with_description(&description);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_codes_and_statuses() {
        let cases = [
            (AuthError::invalid_request("x"), "invalid_request", 400),
            (AuthError::InvalidClient, "invalid_client", 401),
            (AuthError::InvalidRedirectUri, "invalid_redirect_uri", 400),
            (AuthError::InvalidPkce("x".into()), "invalid_pkce", 400),
            (AuthError::invalid_grant("x"), "invalid_grant", 400),
            (AuthError::unauthorized("x"), "unauthorized", 401),
            (AuthError::NoActiveKey, "no_active_key", 503),
            (AuthError::UnknownKey("k".into()), "unknown_key", 401),
            (AuthError::Internal(anyhow::anyhow!("db down")), "server_error", 500),
        ];

        for (err, code, status) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(err.status().as_u16(), status);
        }
    }

    #[test]
    fn test_bad_signature_is_not_a_server_error() {
        let err: AuthError = TokenError::InvalidSignature("bad".into()).into();
        assert_eq!(err.code(), "unauthorized");
    }

    #[test]
    fn test_envelope_failure_is_not_a_server_error() {
        let err: AuthError = EnvelopeError::Decrypt.into();
        assert_eq!(err.code(), "unauthorized");
    }

    #[test]
    fn test_internal_details_are_not_rendered() {
        let response = AuthError::Internal(anyhow::anyhow!("password=hunter2")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
