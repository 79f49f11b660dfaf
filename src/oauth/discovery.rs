use std::sync::Arc;

use axum::{extract::State, response::Json};

use crate::{db::models::OidcDiscoveryResponse, oauth::service::OidcService};

/// GET /.well-known/openid-configuration
/// Returns OpenID Connect discovery metadata
pub async fn discovery_handler(State(oidc): State<Arc<OidcService>>) -> Json<OidcDiscoveryResponse> {
    Json(oidc.configuration())
}
