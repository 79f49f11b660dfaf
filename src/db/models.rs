// [library] Serde - JSON serialization/deserialization framework for Rust
// Serialize: convert Rust structs to JSON for API responses and ephemeral payloads
// Deserialize: parse JSON/form data into Rust structs
use serde::{Deserialize, Serialize};

// [library] Timezone-aware timestamps that map to TIMESTAMPTZ
use time::OffsetDateTime;

// [library] UUID v4 support - globally unique identifiers
use uuid::Uuid;

use std::{fmt, str::FromStr};

// [rust] Status enums are stored as TEXT and parsed back through FromStr
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(anyhow::anyhow!(concat!("unknown ", stringify!($name), ": {}"), other)),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Durable entities
// ---------------------------------------------------------------------------

// [security] Signing key lifecycle - only the status column ever changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,      // [security] Chosen for new signatures
    Retired,     // [security] Still published in JWKS so old tokens verify
    Compromised, // [security] Excluded from JWKS and verification entirely
}

text_enum!(KeyStatus { Active => "active", Retired => "retired", Compromised => "compromised" });

// [business] Server-wide token signing key - private half is envelope-encrypted at rest
#[derive(Debug, Clone)]
pub struct SigningKey {
    pub kid: String,                   // [security] Key ID carried in the JWT header
    pub key_type: String,              // [security] "RSA"
    pub algorithm: String,             // [security] "RS256"
    pub key_use: String,               // [security] "sig"
    pub public_key_pem: String,        // [security] SPKI PEM used by verifiers
    pub public_jwk: serde_json::Value, // [security] Public JWK (n/e) published in JWKS
    pub encrypted_private_key: Vec<u8>, // [security] iv || tag || ciphertext
    pub status: KeyStatus,
    pub activated_at: Option<OffsetDateTime>,
    pub expires_at: Option<OffsetDateTime>, // [security] Active keys past this are never selected
    pub created_at: OffsetDateTime,
    pub rotated_at: Option<OffsetDateTime>,
}

impl SigningKey {
    // [business] Eligible for new signatures right now
    pub fn is_usable_at(&self, now: OffsetDateTime) -> bool {
        self.status == KeyStatus::Active && self.expires_at.map_or(true, |exp| exp > now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Active,
    Inactive,
}

text_enum!(ClientStatus { Active => "active", Inactive => "inactive" });

// [business] Relying party (campus application) registered with the IDP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String, // [business] OAuth2 client_id - public identifier used in auth flows
    #[serde(skip_serializing)]
    pub client_secret: Option<String>, // [security] Argon2 PHC hash; None for public clients
    pub name: String,      // [business] Display name on the consent screen

    // [security] Exact string match, no prefix or wildcard matching
    pub redirect_uris: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub status: ClientStatus,
}

impl Client {
    pub fn is_active(&self) -> bool {
        self.status == ClientStatus::Active
    }

    // [security] Redirect URI validation - exact string matching required by RFC 6749
    pub fn allows_redirect(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }
}

// [business] Campus principal (student or staff)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,            // [business] Primary key - becomes the `sub` claim
    pub external_id: String, // [business] Student/staff number used to log in
    pub username: String,    // [business] preferred_username claim
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String, // [security] Argon2id PHC string, or a legacy plaintext row
    pub roles: Vec<String>,    // [business] e.g. ["student"], ["staff", "lecturer"]
    pub disabled: bool,        // [business] Account disable flag for admin control
    pub created_at: OffsetDateTime,
}

// [security] Refresh token lifecycle in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshTokenStatus {
    Active,
    Rotated,
    Revoked,
    Compromised,
}

text_enum!(RefreshTokenStatus {
    Active => "active",
    Rotated => "rotated",
    Revoked => "revoked",
    Compromised => "compromised",
});

// [security] One issued refresh token; the plaintext is never stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub client_id: String,
    pub subject_hash: String,
    pub token_hash: String,
    pub status: RefreshTokenStatus,
    pub prev_id: Option<Uuid>, // [security] Previous link of the rotation chain
    pub created_at: OffsetDateTime,
    pub last_used_at: Option<OffsetDateTime>,
}

// [rust] Insert payload for the ledger
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub client_id: String,
    pub subject_hash: String,
    pub token_hash: String,
    pub prev_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MfaMethod {
    Sms,
    Email,
    Fido2,
    Otp,
}

text_enum!(MfaMethod { Sms => "sms", Email => "email", Fido2 => "fido2", Otp => "otp" });

// [business] Per-user second factor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaSettings {
    pub user_id: Uuid,
    pub sms_enabled: bool,
    pub email_enabled: bool,
    pub fido2_enabled: bool,
    pub otp_enabled: bool,
    pub phone: Option<String>, // [security] Bound phone number for SMS codes
    pub required: bool,
}

impl MfaSettings {
    // [business] Users without a row get SMS only
    pub fn default_for(user_id: Uuid) -> Self {
        Self {
            user_id,
            sms_enabled: true,
            email_enabled: false,
            fido2_enabled: false,
            otp_enabled: false,
            phone: None,
            required: true,
        }
    }

    // [business] The challenge menu shown after the password step
    pub fn methods(&self) -> Vec<MfaMethod> {
        [
            (self.sms_enabled, MfaMethod::Sms),
            (self.email_enabled, MfaMethod::Email),
            (self.fido2_enabled, MfaMethod::Fido2),
            (self.otp_enabled, MfaMethod::Otp),
        ]
        .into_iter()
        .filter_map(|(enabled, method)| enabled.then_some(method))
        .collect()
    }
}

// ---------------------------------------------------------------------------
// Ephemeral payloads (JSON in the ephemeral store)
// ---------------------------------------------------------------------------

// [business] Pending authorization request, referenced by ticket id and by state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String, // [business] Normalized, space-joined
    pub state: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    #[serde(default)]
    pub nonce: Option<String>,
    pub issued_at: i64,
}

// [security] Single-use authorization code payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub subject: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub scope: String,
    #[serde(default)]
    pub nonce: Option<String>,
    pub acr: String,
    pub amr: Vec<String>,
}

// [business] Login attempt state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    ResetRequired, // [business] Legacy password row, must pick a new one
    PasswordOk,
    MfaPending,
    Authenticated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub user_id: Uuid,
    pub state: LoginState,
    #[serde(default)]
    pub amr: Vec<String>,
    #[serde(default)]
    pub mfa_failures: u32,
}

// [security] SMS code keyed by phone, valid only for the attempt that requested it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpChallenge {
    pub attempt: String,
    pub code: String,
}

// ---------------------------------------------------------------------------
// Data Transfer Objects (DTOs) for API responses
// ---------------------------------------------------------------------------

// [business] `startAuthorization` result
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizationStarted {
    pub ok: bool,
    pub state: String,
    pub ticket: String,
}

// [business] Consent-screen view model
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationView {
    pub client_id: String,
    pub client_name: String,
    pub scope: String,
    pub redirect_uri: String,
    pub state: String,
}

// [business] Authorization code handed back to the front end after login
#[derive(Debug, Serialize, Deserialize)]
pub struct IssuedCode {
    pub code: String,
    pub redirect_uri: String,
    pub state: String,
    pub redirect_url: String, // [business] redirect_uri?code=..&state=..
}

// [business] OAuth2 token endpoint response - RFC 6749 compliant
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,  // [security] RS256 access token
    pub id_token: String,      // [security] OpenID Connect ID token with user claims
    pub refresh_token: String, // [security] RS256 JWT tracked by the refresh ledger
    pub token_type: String,    // [business] Always "bearer"
    pub expires_in: i64,       // [business] Access token lifetime in seconds
    pub scope: String,
}

// [business] OpenID Connect UserInfo endpoint response
// Profile and email claims only appear when the matching scope was granted
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct UserInfo {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

// [business] JSON Web Key Set (JWKS) response for /.well-known/jwks.json
#[derive(Debug, Serialize, Deserialize)]
pub struct JwksResponse {
    pub keys: Vec<serde_json::Value>, // [security] Array of JWK public keys in JSON format
}

// [business] OpenID Connect Discovery response for /.well-known/openid-configuration
#[derive(Debug, Serialize, Deserialize)]
pub struct OidcDiscoveryResponse {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub revocation_endpoint: String,
    pub jwks_uri: String,
    pub backchannel_logout_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub claims_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub backchannel_logout_supported: bool,
}

// [business] OAuth2 error response structure - RFC 6749 compliant error handling
#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthError {
    pub error: String, // [business] Stable error code (e.g., "invalid_request")

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>, // [security] Echo back the client's state parameter
}

impl OAuthError {
    pub fn new(error: &str) -> Self {
        Self {
            error: error.to_string(),
            error_description: None,
            state: None,
        }
    }

    // [rust] Builder pattern method - adds description and returns self for chaining
    pub fn with_description(mut self, description: &str) -> Self {
        self.error_description = Some(description.to_string());
        self
    }

    pub fn with_state(mut self, state: Option<String>) -> Self {
        self.state = state;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text_round_trip() {
        assert_eq!("retired".parse::<KeyStatus>().unwrap(), KeyStatus::Retired);
        assert_eq!(RefreshTokenStatus::Rotated.as_str(), "rotated");
        assert!("deleted".parse::<RefreshTokenStatus>().is_err());
    }

    #[test]
    fn test_default_mfa_menu_is_sms_only() {
        let settings = MfaSettings::default_for(Uuid::new_v4());
        assert_eq!(settings.methods(), vec![MfaMethod::Sms]);
    }

    #[test]
    fn test_expired_active_key_not_usable() {
        let now = OffsetDateTime::now_utc();
        let mut key = SigningKey {
            kid: "k".into(),
            key_type: "RSA".into(),
            algorithm: "RS256".into(),
            key_use: "sig".into(),
            public_key_pem: String::new(),
            public_jwk: serde_json::json!({}),
            encrypted_private_key: vec![],
            status: KeyStatus::Active,
            activated_at: Some(now),
            expires_at: None,
            created_at: now,
            rotated_at: None,
        };
        assert!(key.is_usable_at(now));

        key.expires_at = Some(now - time::Duration::minutes(1));
        assert!(!key.is_usable_at(now));

        key.expires_at = None;
        key.status = KeyStatus::Retired;
        assert!(!key.is_usable_at(now));
    }

    #[test]
    fn test_redirect_uri_exact_match() {
        let client = Client {
            client_id: "app".into(),
            client_secret: None,
            name: "App".into(),
            redirect_uris: vec!["https://app/cb".into()],
            allowed_scopes: vec!["openid".into()],
            status: ClientStatus::Active,
        };
        assert!(client.allows_redirect("https://app/cb"));
        assert!(!client.allows_redirect("https://app/cb/"));
        assert!(!client.allows_redirect("https://app/cb?x=1"));
        assert!(!client.allows_redirect("https://evil/cb"));
    }

    #[test]
    fn test_oauth_error_skips_empty_fields() {
        let body = serde_json::to_value(OAuthError::new("invalid_grant")).unwrap();
        assert_eq!(body, serde_json::json!({"error": "invalid_grant"}));
    }
}
