// [business] The OIDC core: authorize → login → code → token → refresh, plus userinfo,
// revocation, back-channel logout and the read-only metadata projections.

use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use secrecy::ExposeSecret;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::keys::KeyManager;
use super::ledger::{RefreshTokenLedger, Rotation};
use crate::config::Config;
use crate::db::{
    AuthorizationCode, AuthorizationRequest, AuthorizationStarted, AuthorizationView, Client,
    ClientStore, IssuedCode, JwksResponse, OidcDiscoveryResponse, RefreshTokenStore, TokenResponse,
    User, UserInfo, UserStore,
};
use crate::ephemeral::{EphemeralStore, IdStrategy, SecondaryIndex, TicketIssuer};
use crate::error::{AuthError, AuthResult};
use crate::security::{
    extract_kid_from_jwt,
    password::verify_password,
    pkce::{validate_challenge_method, validate_code_challenge, verify_code_challenge, PkceError},
    AccessTokenClaims, IdTokenClaims, JwtSigner, RefreshTokenClaims, SessionClaims, SigningKeyRef,
    TokenHasher, VerifyingKeyRef, TYP_ACCESS, TYP_ID, TYP_REFRESH,
};

pub const TICKET_PREFIX: &str = "oidc:ticket:";
pub const STATE_PREFIX: &str = "oidc:state:";
pub const CODE_PREFIX: &str = "oidc:code:";
pub const TICKET_TTL: Duration = Duration::from_secs(600);
pub const CODE_TTL: Duration = Duration::from_secs(600);

pub const SUPPORTED_SCOPES: [&str; 3] = ["openid", "profile", "email"];

// [business] Query of `GET /oauth2/authorize`. Missing fields arrive empty and are
// rejected by `OidcService::start_authorization`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthorizeParams {
    #[serde(default)]
    pub response_type: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub code_challenge: String,
    #[serde(default)]
    pub code_challenge_method: String,
    #[serde(default)]
    pub nonce: Option<String>,
}

// [business] Form body of `POST /oauth2/token`, both grants.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: String,
    pub code: Option<String>,
    pub code_verifier: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
}

// Only an id token we issued to a still-active client can end a subject's sessions
#[derive(Debug, Deserialize)]
struct LogoutClaims {
    sub: String,
    aud: String,
    #[serde(default)]
    typ: String,
}

// [business] Collaborators of `OidcService`, injected by the process entry point.
pub struct OidcStores {
    pub clients: Arc<dyn ClientStore>,
    pub users: Arc<dyn UserStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub ephemeral: Arc<dyn EphemeralStore>,
}

pub struct OidcService {
    config: Arc<Config>,
    clients: Arc<dyn ClientStore>,
    users: Arc<dyn UserStore>,
    keys: Arc<KeyManager>,
    ledger: RefreshTokenLedger,
    tickets: TicketIssuer<AuthorizationRequest>,
    states: SecondaryIndex,
    codes: TicketIssuer<AuthorizationCode>,
    signer: JwtSigner,
}

impl OidcService {
    pub fn new(config: Arc<Config>, stores: OidcStores, keys: Arc<KeyManager>) -> Self {
        let hasher = Arc::new(TokenHasher::new(config.token_hash_secret()));
        Self {
            signer: JwtSigner::new(config.issuer.clone()),
            ledger: RefreshTokenLedger::new(stores.refresh_tokens, hasher),
            tickets: TicketIssuer::new(
                stores.ephemeral.clone(),
                TICKET_PREFIX,
                TICKET_TTL,
                IdStrategy::Uuid,
            ),
            states: SecondaryIndex::new(stores.ephemeral.clone(), STATE_PREFIX, TICKET_TTL),
            codes: TicketIssuer::new(stores.ephemeral, CODE_PREFIX, CODE_TTL, IdStrategy::RandomToken),
            clients: stores.clients,
            users: stores.users,
            keys,
            config,
        }
    }

    pub fn ledger(&self) -> &RefreshTokenLedger {
        &self.ledger
    }

    pub async fn start_authorization(&self, params: &AuthorizeParams) -> AuthResult<AuthorizationStarted> {
        if params.response_type != "code" {
            return Err(AuthError::invalid_request("response_type must be 'code'"));
        }
        if params.state.is_empty() {
            return Err(AuthError::invalid_request("state is required"));
        }
        if params.code_challenge.is_empty() {
            return Err(AuthError::invalid_request("code_challenge is required"));
        }
        validate_challenge_method(&params.code_challenge_method)
            .map_err(|e| AuthError::invalid_request(e.to_string()))?;
        validate_code_challenge(&params.code_challenge)
            .map_err(|e| AuthError::InvalidPkce(e.to_string()))?;

        let client = self.active_client(&params.client_id).await?;
        if !client.allows_redirect(&params.redirect_uri) {
            warn!(
                client_id = %client.client_id,
                redirect_uri = %params.redirect_uri,
                "redirect_uri not registered"
            );
            return Err(AuthError::InvalidRedirectUri);
        }

        let request = AuthorizationRequest {
            client_id: client.client_id.clone(),
            redirect_uri: params.redirect_uri.clone(),
            scope: normalize_scope(params.scope.as_deref(), &client),
            state: params.state.clone(),
            code_challenge: params.code_challenge.clone(),
            code_challenge_method: params.code_challenge_method.clone(),
            nonce: params.nonce.clone().filter(|n| !n.is_empty()),
            issued_at: OffsetDateTime::now_utc().unix_timestamp(),
        };

        let ticket = self.tickets.issue(&request, None).await?;
        self.states.link(&request.state, &ticket).await?;
        info!(client_id = %client.client_id, scope = %request.scope, "authorization started");

        Ok(AuthorizationStarted {
            ok: true,
            state: request.state,
            ticket,
        })
    }

    // [business] Consent-screen view of a pending ticket. Does not consume it.
    pub async fn get_authorization_request(&self, ticket: &str) -> AuthResult<AuthorizationView> {
        let request = self.pending_request(ticket).await?;
        let client = self.active_client(&request.client_id).await?;

        Ok(AuthorizationView {
            client_id: client.client_id,
            client_name: client.name,
            scope: request.scope,
            redirect_uri: request.redirect_uri,
            state: request.state,
        })
    }

    pub async fn ticket_for_state(&self, state: &str) -> AuthResult<String> {
        self.states
            .resolve(state)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("no pending authorization for this state"))
    }

    pub async fn find_authorization_by_state(&self, state: &str) -> AuthResult<AuthorizationView> {
        let ticket = self.ticket_for_state(state).await?;
        self.get_authorization_request(&ticket).await
    }

    // [business] Mints a single-use code for a pending ticket on behalf of an authenticated session.
    pub async fn issue_authorization_code(
        &self,
        ticket: &str,
        session: &SessionClaims,
    ) -> AuthResult<IssuedCode> {
        let request = self.pending_request(ticket).await?;
        self.active_client(&request.client_id).await?;

        let acr = if session.amr.len() > 1 { "mfa" } else { "pwd" };
        let payload = AuthorizationCode {
            subject: session.sub.clone(),
            client_id: request.client_id.clone(),
            redirect_uri: request.redirect_uri.clone(),
            code_challenge: request.code_challenge.clone(),
            scope: request.scope.clone(),
            nonce: request.nonce.clone(),
            acr: acr.to_string(),
            amr: session.amr.clone(),
        };
        let code = self.codes.issue(&payload, None).await?;
        info!(client_id = %request.client_id, subject = %session.sub, acr, "authorization code issued");

        Ok(IssuedCode {
            redirect_url: redirect_with_code(&request.redirect_uri, &code, &request.state),
            code,
            redirect_uri: request.redirect_uri,
            state: request.state,
        })
    }

    pub async fn exchange_token(&self, request: &TokenRequest) -> AuthResult<TokenResponse> {
        match request.grant_type.as_str() {
            "authorization_code" => self.exchange_code(request).await,
            "refresh_token" => self.exchange_refresh(request).await,
            "" => Err(AuthError::invalid_request("grant_type is required")),
            other => Err(AuthError::invalid_request(format!(
                "unsupported grant_type '{}'",
                other
            ))),
        }
    }

    async fn exchange_code(&self, request: &TokenRequest) -> AuthResult<TokenResponse> {
        let code = required(&request.code, "code")?;
        let verifier = required(&request.code_verifier, "code_verifier")?;
        let redirect_uri = required(&request.redirect_uri, "redirect_uri")?;
        let client_id = required(&request.client_id, "client_id")?;

        // Consumed before any other check: a failed attempt still burns the code
        let grant = self.codes.consume(code).await?.ok_or_else(|| {
            warn!(client_id, "authorization code invalid, expired or already redeemed");
            AuthError::invalid_grant("authorization code is invalid, expired or already used")
        })?;

        let client = self
            .authenticate_client(client_id, request.client_secret.as_deref())
            .await?;
        if grant.client_id != client.client_id {
            warn!(client_id, "authorization code presented by another client");
            return Err(AuthError::invalid_grant("code was issued to another client"));
        }
        if grant.redirect_uri != redirect_uri {
            return Err(AuthError::invalid_grant("redirect_uri does not match the authorization request"));
        }

        verify_code_challenge(verifier, &grant.code_challenge, "S256").map_err(|e| match e {
            PkceError::VerificationFailed => {
                warn!(client_id, "PKCE verifier mismatch");
                AuthError::invalid_grant("PKCE verification failed")
            }
            other => AuthError::InvalidPkce(other.to_string()),
        })?;

        self.issue_tokens(
            &client.client_id,
            &grant.subject,
            grant.nonce,
            Some(grant.acr),
            grant.amr,
            &grant.scope,
            None,
        )
        .await
    }

    async fn exchange_refresh(&self, request: &TokenRequest) -> AuthResult<TokenResponse> {
        let token = required(&request.refresh_token, "refresh_token")?;

        let claims: RefreshTokenClaims = self.verify_rs256(token).await.map_err(|e| match e {
            AuthError::Internal(_) => e,
            other => AuthError::invalid_grant(other.to_string()),
        })?;
        if claims.typ != TYP_REFRESH {
            return Err(AuthError::invalid_grant("not a refresh token"));
        }
        if let Some(client_id) = request.client_id.as_deref() {
            if client_id != claims.aud {
                return Err(AuthError::invalid_grant("refresh token was issued to another client"));
            }
        }
        let client = self
            .authenticate_client(&claims.aud, request.client_secret.as_deref())
            .await?;

        let token_hash = self.ledger.hash_token(token);
        let record = match self.ledger.rotate(&token_hash).await? {
            Rotation::Rotated(record) => record,
            Rotation::ReuseDetected { .. } => {
                return Err(AuthError::invalid_grant(
                    "refresh token already used; session revoked",
                ))
            }
        };

        let subject_hash = self.ledger.hash_subject(&claims.sub);
        if record.client_id != client.client_id || record.subject_hash != subject_hash {
            error!(client_id = %client.client_id, "refresh token does not match its ledger row");
            self.ledger.revoke_subject(&subject_hash).await?;
            return Err(AuthError::invalid_grant("refresh token does not match its record"));
        }

        self.issue_tokens(
            &client.client_id,
            &claims.sub,
            None,
            claims.acr,
            claims.amr,
            &claims.scope,
            Some(record.id),
        )
        .await
    }

    // [business] Signs the access/id/refresh triple with the active key and records the refresh token.
    #[allow(clippy::too_many_arguments)]
    pub async fn issue_tokens(
        &self,
        client_id: &str,
        subject: &str,
        nonce: Option<String>,
        acr: Option<String>,
        amr: Vec<String>,
        scope: &str,
        prev_id: Option<Uuid>,
    ) -> AuthResult<TokenResponse> {
        let user = self
            .subject_user(subject)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("subject is no longer active"))?;

        let key = self.keys.active_key().await?;
        let private_pem = key.decrypt()?;
        let signing = SigningKeyRef::Rsa {
            private_pem: private_pem.expose_secret(),
            kid: &key.kid,
        };

        let access_token = self.sign(
            &AccessTokenClaims {
                iss: String::new(),
                sub: subject.to_string(),
                aud: client_id.to_string(),
                scope: scope.to_string(),
                typ: TYP_ACCESS.to_string(),
                exp: 0,
                iat: 0,
                jti: String::new(),
            },
            signing,
            self.config.default_access_ttl_secs,
        )?;

        let id_token = self.sign(
            &IdTokenClaims {
                iss: String::new(),
                sub: subject.to_string(),
                aud: client_id.to_string(),
                typ: TYP_ID.to_string(),
                nonce,
                acr: acr.clone(),
                amr: amr.clone(),
                preferred_username: user.username.clone(),
                name: user.display_name.clone(),
                roles: user.roles.clone(),
                exp: 0,
                iat: 0,
                jti: String::new(),
            },
            signing,
            self.config.default_id_token_ttl_secs,
        )?;

        let refresh_token = self.sign(
            &RefreshTokenClaims {
                iss: String::new(),
                sub: subject.to_string(),
                aud: client_id.to_string(),
                scope: scope.to_string(),
                typ: TYP_REFRESH.to_string(),
                acr,
                amr,
                exp: 0,
                iat: 0,
                jti: String::new(),
            },
            signing,
            self.config.refresh_ttl_secs(),
        )?;

        let subject_hash = self.ledger.hash_subject(subject);
        self.ledger
            .record(client_id, &subject_hash, &self.ledger.hash_token(&refresh_token), prev_id)
            .await?;

        info!(client_id, subject, kid = %key.kid, rotated = prev_id.is_some(), "tokens issued");
        Ok(TokenResponse {
            access_token,
            id_token,
            refresh_token,
            token_type: "bearer".to_string(),
            expires_in: self.config.default_access_ttl_secs,
            scope: scope.to_string(),
        })
    }

    // [business] Always succeeds for unknown or already revoked tokens.
    pub async fn revoke_token(&self, token: &str) -> AuthResult<()> {
        self.ledger.revoke(&self.ledger.hash_token(token)).await
    }

    pub async fn userinfo(&self, access_token: &str) -> AuthResult<UserInfo> {
        let claims: AccessTokenClaims = self.verify_rs256(access_token).await?;
        if claims.typ != TYP_ACCESS {
            return Err(AuthError::unauthorized("not an access token"));
        }

        let user = self
            .subject_user(&claims.sub)
            .await?
            .ok_or_else(|| AuthError::unauthorized("subject is no longer active"))?;

        let granted: Vec<&str> = claims.scope.split_whitespace().collect();
        let profile = granted.contains(&"profile");
        let email = granted.contains(&"email");

        Ok(UserInfo {
            sub: claims.sub,
            name: profile.then(|| user.display_name.clone()),
            preferred_username: profile.then(|| user.username.clone()),
            roles: profile.then(|| user.roles.clone()),
            email: if email { user.email.clone() } else { None },
        })
    }

    // [business] Revokes every refresh token of the token's subject, across clients.
    // Access and refresh tokens are refused; the logout token is an id token.
    pub async fn backchannel_logout(&self, logout_token: &str) -> AuthResult<u64> {
        let claims: LogoutClaims = self.verify_rs256(logout_token).await?;
        if claims.typ != TYP_ID {
            warn!(typ = %claims.typ, "back-channel logout with a non-id token");
            return Err(AuthError::unauthorized("logout_token must be an id_token"));
        }
        self.active_client(&claims.aud).await?;

        let revoked = self
            .ledger
            .revoke_subject(&self.ledger.hash_subject(&claims.sub))
            .await?;
        info!(subject = %claims.sub, revoked, "back-channel logout");
        Ok(revoked)
    }

    pub async fn jwks(&self) -> AuthResult<JwksResponse> {
        self.keys.jwks().await
    }

    pub fn configuration(&self) -> OidcDiscoveryResponse {
        let issuer = self.config.issuer.trim_end_matches('/');
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        OidcDiscoveryResponse {
            issuer: issuer.to_string(),
            authorization_endpoint: format!("{}/oauth2/authorize", issuer),
            token_endpoint: format!("{}/oauth2/token", issuer),
            userinfo_endpoint: format!("{}/oauth2/userinfo", issuer),
            revocation_endpoint: format!("{}/oauth2/revoke", issuer),
            jwks_uri: format!("{}/.well-known/jwks.json", issuer),
            backchannel_logout_endpoint: format!("{}/oauth2/backchannel-logout", issuer),
            response_types_supported: strings(&["code"]),
            grant_types_supported: strings(&["authorization_code", "refresh_token"]),
            subject_types_supported: strings(&["public"]),
            id_token_signing_alg_values_supported: strings(&["RS256"]),
            scopes_supported: strings(&SUPPORTED_SCOPES),
            claims_supported: strings(&[
                "sub",
                "iss",
                "aud",
                "exp",
                "iat",
                "nonce",
                "acr",
                "amr",
                "name",
                "preferred_username",
                "roles",
                "email",
            ]),
            token_endpoint_auth_methods_supported: strings(&["none", "client_secret_post"]),
            code_challenge_methods_supported: strings(&["S256"]),
            backchannel_logout_supported: true,
        }
    }

    async fn pending_request(&self, ticket: &str) -> AuthResult<AuthorizationRequest> {
        self.tickets
            .verify(ticket)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("authorization ticket not found or expired"))
    }

    async fn active_client(&self, client_id: &str) -> AuthResult<Client> {
        match self.clients.client(client_id).await? {
            Some(client) if client.is_active() => Ok(client),
            Some(_) => {
                warn!(client_id, "inactive client");
                Err(AuthError::InvalidClient)
            }
            None => {
                warn!(client_id, "unknown client");
                Err(AuthError::InvalidClient)
            }
        }
    }

    // Confidential clients must present their secret; public clients rely on PKCE
    async fn authenticate_client(&self, client_id: &str, secret: Option<&str>) -> AuthResult<Client> {
        let client = self.active_client(client_id).await?;
        let Some(stored) = client.client_secret.as_deref() else {
            return Ok(client);
        };

        let presented = secret.ok_or_else(|| {
            warn!(client_id, "confidential client without client_secret");
            AuthError::InvalidClient
        })?;
        match verify_password(presented, stored) {
            Ok(true) => Ok(client),
            Ok(false) => {
                warn!(client_id, "client_secret mismatch");
                Err(AuthError::InvalidClient)
            }
            Err(e) => {
                error!(client_id, "stored client secret is unreadable: {}", e);
                Err(AuthError::InvalidClient)
            }
        }
    }

    async fn subject_user(&self, subject: &str) -> AuthResult<Option<User>> {
        let Ok(id) = Uuid::parse_str(subject) else {
            return Ok(None);
        };
        Ok(self.users.user_by_id(id).await?.filter(|u| !u.disabled))
    }

    fn sign<C: Serialize>(&self, claims: &C, key: SigningKeyRef<'_>, ttl: i64) -> AuthResult<String> {
        self.signer
            .sign(claims, key, ttl)
            .map_err(|e| AuthError::Internal(anyhow!(e)))
    }

    // kid lookup first: an absent or compromised key is UnknownKey, not a signature failure
    async fn verify_rs256<C: DeserializeOwned>(&self, token: &str) -> AuthResult<C> {
        let kid = extract_kid_from_jwt(token)?;
        let key = self.keys.verification_key(&kid).await?;
        Ok(self.signer.verify(
            token,
            VerifyingKeyRef::Rsa {
                public_pem: &key.public_key_pem,
            },
        )?)
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> AuthResult<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::invalid_request(format!("{} is required", name)))
}

// [business] Deduplicated, space-joined scopes the client may receive; `openid` when none survive.
fn normalize_scope(requested: Option<&str>, client: &Client) -> String {
    let mut scopes: Vec<&str> = Vec::new();
    for scope in requested.unwrap_or("openid").split(|c: char| c.is_whitespace() || c == ',') {
        let allowed = client.allowed_scopes.iter().any(|s| s == scope);
        if !scope.is_empty() && allowed && !scopes.contains(&scope) {
            scopes.push(scope);
        }
    }
    if scopes.is_empty() {
        return "openid".to_string();
    }
    scopes.join(" ")
}

fn redirect_with_code(redirect_uri: &str, code: &str, state: &str) -> String {
    let separator = if redirect_uri.contains('?') { '&' } else { '?' };
    format!(
        "{}{}code={}&state={}",
        redirect_uri,
        separator,
        urlencoding::encode(code),
        urlencoding::encode(state)
    )
}
