// Shared fixture: every core component wired to in-memory stores.
#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use campus_idp::{
    auth::{AuthenticationFlow, RecordingSmsSender},
    db::{Client, ClientStatus, ClientStore, KeyStore, MemoryStore, TokenResponse, User, UserStore},
    ephemeral::MemoryEphemeralStore,
    keygen::generate_signing_key,
    oauth::{AuthorizeParams, KeyManager, OidcService, OidcStores, TokenRequest},
    security::{password::hash_password, pkce::pkce_challenge, Kek, SessionClaims},
    web::{create_app_router, AppState},
    Config,
};
use time::OffsetDateTime;
use uuid::Uuid;

pub const ISSUER: &str = "https://idp.campus.test";
pub const REDIRECT_URI: &str = "https://app/cb";
pub const PHONE: &str = "+15550100";
pub const PASSWORD: &str = "correct horse battery";
pub const EXTERNAL_ID: &str = "S2024001";
pub const VERIFIER: &str = "dBjftJeZ4CVP-mJ92K9KlNsLgnXbB7wUFmNbjCz6TjA";
pub const CONFIDENTIAL_SECRET: &str = "registrar-secret";

pub struct Fixture {
    pub config: Arc<Config>,
    pub store: Arc<MemoryStore>,
    pub sms: Arc<RecordingSmsSender>,
    pub kek: Arc<Kek>,
    pub keys: Arc<KeyManager>,
    pub oidc: Arc<OidcService>,
    pub auth: Arc<AuthenticationFlow>,
    pub user: User,
}

impl Fixture {
    pub fn router(&self) -> axum::Router {
        create_app_router(AppState::new(
            self.config.clone(),
            self.oidc.clone(),
            self.auth.clone(),
        ))
    }

    /// Password + SMS + enter; returns the verified session.
    pub async fn authenticate(&self) -> SessionClaims {
        let step = self.auth.login(EXTERNAL_ID, PASSWORD).await.unwrap();
        self.auth
            .multifactor(&step.attempt, "sms", None, None)
            .await
            .unwrap();
        let code = self.sms.last_code_for(PHONE).unwrap();
        self.auth
            .multifactor(&step.attempt, "sms", Some(&code), None)
            .await
            .unwrap();
        let session = self.auth.enter(&step.attempt).await.unwrap();
        self.auth.verify_session(&session.access_token).unwrap()
    }

    /// authorize -> authenticate -> code; returns the code.
    pub async fn authorization_code(&self, client_id: &str, state: &str) -> String {
        let started = self
            .oidc
            .start_authorization(&authorize_params(client_id, state))
            .await
            .unwrap();
        let session = self.authenticate().await;
        self.oidc
            .issue_authorization_code(&started.ticket, &session)
            .await
            .unwrap()
            .code
    }

    /// Full public-client flow up to the first token triple.
    pub async fn tokens(&self) -> TokenResponse {
        let code = self.authorization_code("portal", "s1").await;
        self.oidc.exchange_token(&code_grant(&code)).await.unwrap()
    }
}

pub fn authorize_params(client_id: &str, state: &str) -> AuthorizeParams {
    AuthorizeParams {
        response_type: "code".into(),
        client_id: client_id.into(),
        redirect_uri: REDIRECT_URI.into(),
        scope: Some("openid profile email".into()),
        state: state.into(),
        code_challenge: pkce_challenge(VERIFIER),
        code_challenge_method: "S256".into(),
        nonce: Some("nonce-1".into()),
    }
}

pub fn code_grant(code: &str) -> TokenRequest {
    TokenRequest {
        grant_type: "authorization_code".into(),
        code: Some(code.into()),
        code_verifier: Some(VERIFIER.into()),
        redirect_uri: Some(REDIRECT_URI.into()),
        client_id: Some("portal".into()),
        ..Default::default()
    }
}

pub fn refresh_grant(refresh_token: &str) -> TokenRequest {
    TokenRequest {
        grant_type: "refresh_token".into(),
        refresh_token: Some(refresh_token.into()),
        client_id: Some("portal".into()),
        ..Default::default()
    }
}

pub async fn fixture() -> Fixture {
    let mut config = Config::new(ISSUER, "integration-session-secret", "integration-kek");
    config.app_env = "development".into();
    let config = Arc::new(config);

    let store = Arc::new(MemoryStore::new());
    let ephemeral = Arc::new(MemoryEphemeralStore::new());
    let sms = Arc::new(RecordingSmsSender::new());
    let kek = Arc::new(Kek::derive(config.key_encryption_secret()));

    store
        .insert_signing_key(&generate_signing_key(&kek, None).unwrap())
        .await
        .unwrap();

    let scopes = vec!["openid".to_string(), "profile".to_string(), "email".to_string()];
    store
        .insert_client(&Client {
            client_id: "portal".into(),
            client_secret: None,
            name: "Student Portal".into(),
            redirect_uris: vec![REDIRECT_URI.into()],
            allowed_scopes: scopes.clone(),
            status: ClientStatus::Active,
        })
        .await
        .unwrap();
    store
        .insert_client(&Client {
            client_id: "registrar".into(),
            client_secret: Some(hash_password(CONFIDENTIAL_SECRET).unwrap()),
            name: "Registrar".into(),
            redirect_uris: vec![REDIRECT_URI.into()],
            allowed_scopes: scopes,
            status: ClientStatus::Active,
        })
        .await
        .unwrap();

    let user = User {
        id: Uuid::new_v4(),
        external_id: EXTERNAL_ID.into(),
        username: "lin.wei".into(),
        display_name: "Lin Wei".into(),
        email: Some("lin.wei@campus.test".into()),
        phone: Some(PHONE.into()),
        password_hash: hash_password(PASSWORD).unwrap(),
        roles: vec!["student".into()],
        disabled: false,
        created_at: OffsetDateTime::now_utc(),
    };
    store.insert_user(&user).await.unwrap();

    let keys = Arc::new(KeyManager::new(
        store.clone(),
        kek.clone(),
        Duration::from_secs(60),
    ));
    let oidc = Arc::new(OidcService::new(
        config.clone(),
        OidcStores {
            clients: store.clone(),
            users: store.clone(),
            refresh_tokens: store.clone(),
            ephemeral: ephemeral.clone(),
        },
        keys.clone(),
    ));
    let auth = Arc::new(AuthenticationFlow::new(
        config.clone(),
        store.clone(),
        store.clone(),
        ephemeral,
        sms.clone(),
    ));

    Fixture {
        config,
        store,
        sms,
        kek,
        keys,
        oidc,
        auth,
        user,
    }
}
