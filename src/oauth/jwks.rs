use std::sync::Arc;

use axum::{extract::State, response::Json};
use tracing::debug;

use crate::{db::models::JwksResponse, error::AuthResult, oauth::service::OidcService};

/// GET /.well-known/jwks.json
/// Active and retired public keys; compromised keys are never published
pub async fn jwks_handler(State(oidc): State<Arc<OidcService>>) -> AuthResult<Json<JwksResponse>> {
    let jwks = oidc.jwks().await?;
    debug!("Returning JWKS with {} keys", jwks.keys.len());
    Ok(Json(jwks))
}
