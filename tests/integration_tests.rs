// HTTP surface: requests go through the real router with in-memory stores.

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use campus_idp::security::pkce::pkce_challenge;
use common::*;
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn post_json(app: &Router, uri: &str, body: Value, cookie: Option<&str>) -> Response {
    let mut request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    app.clone()
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

async fn post_form(app: &Router, uri: &str, fields: &[(&str, &str)]) -> Response {
    let body = fields
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
}

fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

fn authorize_uri(client_id: &str, redirect_uri: &str, state: &str) -> String {
    format!(
        "/oauth2/authorize?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
        client_id,
        urlencoding::encode(redirect_uri),
        urlencoding::encode("openid profile"),
        state,
        pkce_challenge(VERIFIER),
    )
}

#[tokio::test]
async fn test_health_endpoint() {
    let fx = fixture().await;
    let response = get(&fx.router(), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_openid_discovery_endpoint() {
    let fx = fixture().await;
    let response = get(&fx.router(), "/.well-known/openid-configuration").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["issuer"], ISSUER);
    assert_eq!(json["token_endpoint"], format!("{}/oauth2/token", ISSUER));
    assert_eq!(json["code_challenge_methods_supported"], json!(["S256"]));
    assert_eq!(json["backchannel_logout_supported"], true);
}

#[tokio::test]
async fn test_jwks_endpoint() {
    let fx = fixture().await;
    let response = get(&fx.router(), "/.well-known/jwks.json").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let keys = json["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["kty"], "RSA");
    assert_eq!(keys[0]["alg"], "RS256");
    assert_eq!(keys[0]["use"], "sig");
    assert!(keys[0].get("d").is_none());
}

#[tokio::test]
async fn test_authorize_errors_echo_state() {
    let fx = fixture().await;
    let app = fx.router();

    let response = get(&app, &authorize_uri("portal", "https://evil/cb", "st-9")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_redirect_uri");
    assert_eq!(json["state"], "st-9");

    let response = get(&app, &authorize_uri("nobody", REDIRECT_URI, "st-9")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "invalid_client");

    let response = get(&app, "/oauth2/authorize?client_id=portal").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_request");
    assert!(json.get("state").is_none());
}

#[tokio::test]
async fn test_full_flow_over_http() {
    let fx = fixture().await;
    let app = fx.router();

    // authorize
    let response = get(&app, &authorize_uri("portal", REDIRECT_URI, "s1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let started = body_json(response).await;
    assert_eq!(started["ok"], true);
    assert_eq!(started["state"], "s1");
    let ticket = started["ticket"].as_str().unwrap().to_string();

    // consent view, by ticket and by state
    let response = get(&app, &format!("/oauth2/authorize/request?ticket={}", ticket)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let view = body_json(response).await;
    assert_eq!(view["client_name"], "Student Portal");
    assert_eq!(view["scope"], "openid profile");
    let response = get(&app, "/oauth2/authorize/request?state=s1").await;
    assert_eq!(body_json(response).await, view);

    // login
    let response = post_json(
        &app,
        "/auth/login",
        json!({"id": EXTERNAL_ID, "password": PASSWORD}),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let step = body_json(response).await;
    assert_eq!(step["next"], json!(["multifactor"]));
    assert_eq!(step["methods"], json!(["sms"]));
    let attempt = step["attempt"].as_str().unwrap().to_string();

    // code required before enter
    let response = post_json(&app, "/auth/enter", json!({"attempt": attempt}), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // mfa request + verify
    let response = post_json(
        &app,
        "/auth/multifactor",
        json!({"attempt": attempt, "type": "sms"}),
        None,
    )
    .await;
    assert_eq!(body_json(response).await["code_sent"], true);
    let code = fx.sms.last_code_for(PHONE).unwrap();
    let response = post_json(
        &app,
        "/auth/multifactor",
        json!({"attempt": attempt, "type": "sms", "code": code}),
        None,
    )
    .await;
    assert_eq!(body_json(response).await["next"], json!(["enter"]));

    // enter sets the cookie pair and keeps tokens out of the body
    let response = post_json(&app, "/auth/enter", json!({"attempt": attempt}), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 2);
    assert!(cookies.iter().all(|c| c.contains("HttpOnly") && c.contains("SameSite=Lax")));
    let session_cookie = cookies
        .iter()
        .find(|c| c.starts_with("idp_session="))
        .and_then(|c| c.split(';').next())
        .unwrap()
        .to_string();
    let entered = body_json(response).await;
    assert_eq!(entered["next"], json!(["finish"]));
    assert!(entered.get("access_token").is_none());

    // code issuance needs the session
    let response = post_json(&app, "/oauth2/authorize/code", json!({"ticket": ticket}), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response = post_json(
        &app,
        "/oauth2/authorize/code",
        json!({"state": "s1"}),
        Some(&session_cookie),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let issued = body_json(response).await;
    let code = issued["code"].as_str().unwrap().to_string();
    assert!(issued["redirect_url"]
        .as_str()
        .unwrap()
        .ends_with("&state=s1"));

    // token
    let response = post_form(
        &app,
        "/oauth2/token",
        &[
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("code_verifier", VERIFIER),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", "portal"),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    let tokens = body_json(response).await;
    assert_eq!(tokens["token_type"], "bearer");
    let access_token = tokens["access_token"].as_str().unwrap().to_string();
    let refresh_token = tokens["refresh_token"].as_str().unwrap().to_string();

    // replaying the code
    let response = post_form(
        &app,
        "/oauth2/token",
        &[
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("code_verifier", VERIFIER),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", "portal"),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_grant");

    // userinfo
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/oauth2/userinfo")
                .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let info = body_json(response).await;
    assert_eq!(info["sub"], fx.user.id.to_string());
    assert_eq!(info["name"], "Lin Wei");
    assert!(info.get("email").is_none());

    // revoke, then refresh fails
    let response = post_form(&app, "/oauth2/revoke", &[("token", &refresh_token)]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = post_form(
        &app,
        "/oauth2/token",
        &[("grant_type", "refresh_token"), ("refresh_token", &refresh_token)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_userinfo_requires_bearer() {
    let fx = fixture().await;
    let response = get(&fx.router(), "/oauth2/userinfo").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "unauthorized");
}

#[tokio::test]
async fn test_revoke_unknown_token_is_ok() {
    let fx = fixture().await;
    let app = fx.router();

    let response = post_form(&app, "/oauth2/revoke", &[("token", "never-issued")]).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = post_form(&app, "/oauth2/revoke", &[]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_backchannel_logout_endpoint() {
    let fx = fixture().await;
    let tokens = fx.tokens().await;
    let app = fx.router();

    let response = post_form(
        &app,
        "/oauth2/backchannel-logout",
        &[("logout_token", &tokens.id_token)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["revoked"], 1);

    let response = post_form(
        &app,
        "/oauth2/backchannel-logout",
        &[("logout_token", "not.a.token")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unsupported_grant_type() {
    let fx = fixture().await;
    let response = post_form(&fx.router(), "/oauth2/token", &[("grant_type", "password")]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_request");
}

#[tokio::test]
async fn test_legacy_password_reset_over_http() {
    let fx = fixture().await;
    let mut legacy = fx.user.clone();
    legacy.id = uuid::Uuid::new_v4();
    legacy.external_id = "T1990007".into();
    legacy.password_hash = "imported-plaintext".into();
    campus_idp::db::UserStore::insert_user(fx.store.as_ref(), &legacy)
        .await
        .unwrap();
    let app = fx.router();

    let response = post_json(
        &app,
        "/auth/login",
        json!({"id": "T1990007", "password": "imported-plaintext"}),
        None,
    )
    .await;
    let step = body_json(response).await;
    assert_eq!(step["next"], json!(["reset_password"]));
    let attempt = step["attempt"].as_str().unwrap().to_string();

    let response = post_json(
        &app,
        "/auth/reset-password",
        json!({"attempt": attempt, "new_password": "brand new secret"}),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["next"], json!(["multifactor"]));

    let response = post_json(
        &app,
        "/auth/login",
        json!({"id": "T1990007", "password": "imported-plaintext"}),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_route() {
    let fx = fixture().await;
    let response = get(&fx.router(), "/oauth2/introspect").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
