use std::sync::Arc;

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap},
    response::Json,
};
use tracing::warn;

use crate::{
    db::models::UserInfo,
    error::{AuthError, AuthResult},
    oauth::service::OidcService,
};

/// GET /oauth2/userinfo - OIDC UserInfo endpoint
pub async fn userinfo_handler(
    State(oidc): State<Arc<OidcService>>,
    headers: HeaderMap,
) -> AuthResult<Json<UserInfo>> {
    let access_token = extract_bearer_token(&headers)?;
    Ok(Json(oidc.userinfo(access_token).await?))
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> AuthResult<&str> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            warn!("UserInfo request without Authorization header");
            AuthError::unauthorized("missing bearer token")
        })?;

    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim())
        }
        _ => Err(AuthError::unauthorized("malformed Authorization header")),
    }
}
