use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Form};
use serde::Deserialize;

use crate::{
    error::{AuthError, AuthResult},
    oauth::service::OidcService,
};

// [business] RFC 7009 revocation request; only refresh tokens are tracked
#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    #[serde(default)]
    pub token: String,
    pub token_type_hint: Option<String>,
}

/// POST /oauth2/revoke - unknown or already revoked tokens still answer 200
pub async fn revoke_handler(
    State(oidc): State<Arc<OidcService>>,
    Form(request): Form<RevokeRequest>,
) -> AuthResult<StatusCode> {
    if request.token.is_empty() {
        return Err(AuthError::invalid_request("token is required"));
    }
    oidc.revoke_token(&request.token).await?;
    Ok(StatusCode::OK)
}
