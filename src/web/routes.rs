// [library] Axum web framework routing components
use axum::{
    extract::FromRef,     // [library] State extraction trait
    routing::{get, post}, // [library] HTTP method routing builders
    Router,               // [library] HTTP request router for URL pattern matching
};
use std::sync::Arc;

// [library] Cookie management middleware for session handling
use tower_cookies::CookieManagerLayer;

use crate::{
    auth::AuthenticationFlow,
    config::Config,
    oauth::{self, OidcService},
    web::{enter_handler, login_handler, multifactor_handler, reset_password_handler},
};

// [business] Application state: the two core services plus configuration
// Handlers extract exactly the piece they need through FromRef
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub oidc: Arc<OidcService>,
    pub auth: Arc<AuthenticationFlow>,
}

impl AppState {
    pub fn new(config: Arc<Config>, oidc: Arc<OidcService>, auth: Arc<AuthenticationFlow>) -> Self {
        Self { config, oidc, auth }
    }
}

impl FromRef<AppState> for Arc<Config> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.config.clone()
    }
}

impl FromRef<AppState> for Arc<OidcService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.oidc.clone()
    }
}

impl FromRef<AppState> for Arc<AuthenticationFlow> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth.clone()
    }
}

// [business] One route per core operation; handlers stay thin
pub fn create_app_router(app_state: AppState) -> Router {
    Router::new()
        // [business] Discovery and key publication
        .route("/.well-known/jwks.json", get(oauth::jwks_handler))
        .route(
            "/.well-known/openid-configuration",
            get(oauth::discovery_handler),
        )
        // [business] Authorization code flow
        .route("/oauth2/authorize", get(oauth::authorize_handler))
        .route(
            "/oauth2/authorize/request",
            get(oauth::authorization_request_handler),
        )
        .route("/oauth2/authorize/code", post(oauth::issue_code_handler))
        .route("/oauth2/token", post(oauth::token_handler))
        .route("/oauth2/userinfo", get(oauth::userinfo_handler))
        .route("/oauth2/revoke", post(oauth::revoke_handler))
        .route(
            "/oauth2/backchannel-logout",
            post(oauth::backchannel_logout_handler),
        )
        // [business] Interactive login steps
        .route("/auth/login", post(login_handler))
        .route("/auth/multifactor", post(multifactor_handler))
        .route("/auth/reset-password", post(reset_password_handler))
        .route("/auth/enter", post(enter_handler))
        // [business] Liveness probe for load balancers
        .route("/health", get(health_check))
        .with_state(app_state)
        // [security] Session cookies are read and written through tower-cookies
        .layer(CookieManagerLayer::new())
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        assert_eq!(health_check().await, "OK");
    }
}
