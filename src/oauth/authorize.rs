use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tower_cookies::Cookies;
use tracing::{info, warn};

use crate::{
    auth::{AuthenticationFlow, SESSION_COOKIE},
    db::models::{AuthorizationStarted, AuthorizationView, IssuedCode, OAuthError},
    error::{AuthError, AuthResult},
    oauth::service::{AuthorizeParams, OidcService},
};

// [business] A pending authorization is addressed by its ticket or by the client's state
#[derive(Debug, Default, Deserialize)]
pub struct PendingAuthorization {
    pub ticket: Option<String>,
    pub state: Option<String>,
}

/// GET /oauth2/authorize - validates the request and parks it under a ticket
pub async fn authorize_handler(
    State(oidc): State<Arc<OidcService>>,
    Query(params): Query<AuthorizeParams>,
) -> Result<Json<AuthorizationStarted>, Response> {
    info!("Authorization request for client_id: {}", params.client_id);

    oidc.start_authorization(&params).await.map(Json).map_err(|e| match e {
        AuthError::Internal(_) => e.into_response(),
        e => {
            // [security] Echo the client's state so it can correlate the failure
            let state = Some(params.state.clone()).filter(|s| !s.is_empty());
            let body = OAuthError::new(e.code())
                .with_description(&e.to_string())
                .with_state(state);
            (e.status(), Json(body)).into_response()
        }
    })
}

/// GET /oauth2/authorize/request - consent-screen view of a pending authorization
pub async fn authorization_request_handler(
    State(oidc): State<Arc<OidcService>>,
    Query(query): Query<PendingAuthorization>,
) -> AuthResult<Json<AuthorizationView>> {
    let view = match (query.ticket.as_deref(), query.state.as_deref()) {
        (Some(ticket), _) if !ticket.is_empty() => oidc.get_authorization_request(ticket).await?,
        (_, Some(state)) if !state.is_empty() => oidc.find_authorization_by_state(state).await?,
        _ => return Err(AuthError::invalid_request("ticket or state is required")),
    };
    Ok(Json(view))
}

/// POST /oauth2/authorize/code - turns a pending authorization into a code for the signed-in session
pub async fn issue_code_handler(
    State(oidc): State<Arc<OidcService>>,
    State(auth): State<Arc<AuthenticationFlow>>,
    cookies: Cookies,
    Json(pending): Json<PendingAuthorization>,
) -> AuthResult<Json<IssuedCode>> {
    let session = cookies
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .ok_or_else(|| {
            warn!("Code requested without a session cookie");
            AuthError::unauthorized("login required")
        })?;
    let session = auth.verify_session(&session)?;

    let ticket = match (pending.ticket, pending.state) {
        (Some(ticket), _) if !ticket.is_empty() => ticket,
        (_, Some(state)) if !state.is_empty() => oidc.ticket_for_state(&state).await?,
        _ => return Err(AuthError::invalid_request("ticket or state is required")),
    };

    Ok(Json(oidc.issue_authorization_code(&ticket, &session).await?))
}
