use std::sync::Arc;

use axum::{extract::State, response::Json, Form};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AuthError, AuthResult},
    oauth::service::OidcService,
};

#[derive(Debug, Deserialize)]
pub struct BackchannelLogoutRequest {
    #[serde(default)]
    pub logout_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackchannelLogoutResponse {
    pub revoked: u64,
}

/// POST /oauth2/backchannel-logout - ends every refresh-token session of the token's subject
pub async fn backchannel_logout_handler(
    State(oidc): State<Arc<OidcService>>,
    Form(request): Form<BackchannelLogoutRequest>,
) -> AuthResult<Json<BackchannelLogoutResponse>> {
    if request.logout_token.is_empty() {
        return Err(AuthError::invalid_request("logout_token is required"));
    }
    let revoked = oidc.backchannel_logout(&request.logout_token).await?;
    Ok(Json(BackchannelLogoutResponse { revoked }))
}
