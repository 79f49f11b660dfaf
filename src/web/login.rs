// [business] Interactive login endpoints - each maps onto one AuthenticationFlow step
use std::sync::Arc;

// [library] Axum web framework components for HTTP handling
use axum::{extract::State, response::Json};

// [library] JSON serialization and deserialization
use serde::{Deserialize, Serialize};

// [library] Cookie management for the session pair
use tower_cookies::Cookies;

// [library] Structured logging for authentication events
use tracing::info;

use crate::{
    auth::{session_cookies, AuthenticationFlow, LoginStep, NextStep},
    config::Config,
    error::AuthResult,
};

// [business] Credentials: the external id is the student/staff number
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub id: String,
    pub password: String, // [security] Never logged
}

#[derive(Debug, Deserialize)]
pub struct MultifactorRequest {
    pub attempt: String,
    #[serde(rename = "type")]
    pub mfa_type: String,
    pub code: Option<String>, // [business] Absent or not six digits means "send me a code"
    pub target: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub attempt: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct EnterRequest {
    pub attempt: String,
}

// [security] Session tokens travel only in HttpOnly cookies, never in the body
#[derive(Debug, Serialize, Deserialize)]
pub struct EnterResponse {
    pub next: Vec<NextStep>,
    pub sub: String,
    pub expires_in: i64,
}

/// POST /auth/login
pub async fn login_handler(
    State(auth): State<Arc<AuthenticationFlow>>,
    Json(request): Json<LoginRequest>,
) -> AuthResult<Json<LoginStep>> {
    info!("Login attempt for id: {}", request.id);
    Ok(Json(auth.login(&request.id, &request.password).await?))
}

/// POST /auth/multifactor
pub async fn multifactor_handler(
    State(auth): State<Arc<AuthenticationFlow>>,
    Json(request): Json<MultifactorRequest>,
) -> AuthResult<Json<LoginStep>> {
    let step = auth
        .multifactor(
            &request.attempt,
            &request.mfa_type,
            request.code.as_deref(),
            request.target.as_deref(),
        )
        .await?;
    Ok(Json(step))
}

/// POST /auth/reset-password
pub async fn reset_password_handler(
    State(auth): State<Arc<AuthenticationFlow>>,
    Json(request): Json<ResetPasswordRequest>,
) -> AuthResult<Json<LoginStep>> {
    Ok(Json(
        auth.reset_password(&request.attempt, &request.new_password)
            .await?,
    ))
}

/// POST /auth/enter - issues the session pair as cookies
pub async fn enter_handler(
    State(auth): State<Arc<AuthenticationFlow>>,
    State(config): State<Arc<Config>>,
    cookies: Cookies,
    Json(request): Json<EnterRequest>,
) -> AuthResult<Json<EnterResponse>> {
    let session = auth.enter(&request.attempt).await?;

    for cookie in session_cookies(&config, &session) {
        cookies.add(cookie);
    }

    Ok(Json(EnterResponse {
        next: session.next,
        sub: session.subject,
        expires_in: session.access_expires_in,
    }))
}
