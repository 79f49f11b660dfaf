use std::sync::Arc;

use axum::{
    extract::State,
    http::header::{CACHE_CONTROL, PRAGMA},
    response::{IntoResponse, Json},
    Form,
};
use tracing::info;

use crate::{
    error::AuthResult,
    oauth::service::{OidcService, TokenRequest},
};

/// POST /oauth2/token - authorization_code and refresh_token grants
pub async fn token_handler(
    State(oidc): State<Arc<OidcService>>,
    Form(request): Form<TokenRequest>,
) -> AuthResult<impl IntoResponse> {
    info!("Token request with grant_type: {}", request.grant_type);

    let tokens = oidc.exchange_token(&request).await?;

    // [security] RFC 6749 5.1: token responses must not be cached
    Ok((
        [(CACHE_CONTROL, "no-store"), (PRAGMA, "no-cache")],
        Json(tokens),
    ))
}
