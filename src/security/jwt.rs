// [library] JOSE kit - JSON Web Signature and JWT implementation for Rust
use josekit::{
    jws::{JwsHeader, HS256, RS256}, // [security] HMAC-SHA256 for session tokens, RSA-SHA256 for OIDC tokens
    jwt::{self, JwtPayload},        // [security] JWT creation and parsing utilities
};

// [library] JSON serialization for JWT claims and responses
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

// [library] Structured error types for token failures
use thiserror::Error;

// [library] Time handling for token expiration and timestamps
use time::OffsetDateTime;

// [library] UUID generation for unique token identifiers (jti claim)
use uuid::Uuid;

// [library] Base64 encoding for JWT header inspection and random tokens
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

// [security] Clock skew tolerance applied to exp and iat checks
const LEEWAY_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("signature verification failed: {0}")]
    InvalidSignature(String),
    #[error("token has expired")]
    Expired,
    #[error("token issued in the future")]
    IssuedInFuture,
    #[error("invalid issuer: {0}")]
    InvalidIssuer(String),
    #[error("invalid claims: {0}")]
    InvalidClaims(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

// [security] Key material for signing: HMAC secret for internal sessions, RSA PEM + kid for OIDC
#[derive(Clone, Copy)]
pub enum SigningKeyRef<'a> {
    Hmac(&'a [u8]),
    Rsa { private_pem: &'a str, kid: &'a str },
}

// [security] Key material for verification
#[derive(Clone, Copy)]
pub enum VerifyingKeyRef<'a> {
    Hmac(&'a [u8]),
    Rsa { public_pem: &'a str },
}

// [business] OAuth2 access token claims - audience is the relying party's client_id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub scope: String,
    pub typ: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

// [business] OpenID Connect ID token claims - identity of the authenticated principal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    #[serde(default)]
    pub typ: String, // [security] Always `id`; lets logout tell id tokens from access/refresh tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>, // [security] Echo of the authorization request nonce
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>, // [security] `pwd` or `mfa`
    #[serde(default)]
    pub amr: Vec<String>, // [security] Methods used, e.g. ["pwd", "sms"]
    pub preferred_username: String,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>, // [business] Campus roles (student, staff, ...)
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

// [business] Refresh token claims - an RS256 JWT whose hash is tracked by the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub scope: String,
    pub typ: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,
    #[serde(default)]
    pub amr: Vec<String>,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

// [business] Internal session token claims (HS256, carried in cookies)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub iss: String,
    pub sub: String,
    pub sid: String,
    #[serde(default)]
    pub amr: Vec<String>,
    pub typ: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

// [business] Token type markers carried in the `typ` claim
pub const TYP_ACCESS: &str = "access";
pub const TYP_REFRESH: &str = "refresh";
pub const TYP_ID: &str = "id";
pub const TYP_SESSION: &str = "session";
pub const TYP_SESSION_REFRESH: &str = "session_refresh";

// [business] JWT token signing and verification service
// Stamps iss/iat/exp/jti on every token and validates them on the way back in
#[derive(Debug, Clone)]
pub struct JwtSigner {
    issuer: String, // [business] OAuth2 issuer identifier - goes into iss claim
}

impl JwtSigner {
    // [rust] Constructor - creates new JwtSigner instance with issuer URL
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    // [security] Sign any claims struct; registered claims are filled in here
    pub fn sign<C: Serialize>(
        &self,
        claims: &C,
        key: SigningKeyRef<'_>,
        ttl_secs: i64,
    ) -> Result<String, TokenError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();

        // [library] Serialize the typed claims, then overlay the registered ones
        let mut map = match serde_json::to_value(claims) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(TokenError::InvalidClaims("claims must be an object".into())),
            Err(e) => return Err(TokenError::InvalidClaims(e.to_string())),
        };
        map.insert("iss".into(), Value::String(self.issuer.clone()));
        map.insert("iat".into(), Value::from(now));
        map.insert("exp".into(), Value::from(now + ttl_secs));
        if !matches!(map.get("jti"), Some(Value::String(s)) if !s.is_empty()) {
            map.insert("jti".into(), Value::String(Uuid::new_v4().to_string()));
        }

        let mut payload = JwtPayload::new();
        for (name, value) in map {
            payload
                .set_claim(&name, Some(value))
                .map_err(|e| TokenError::InvalidClaims(e.to_string()))?;
        }

        let mut header = JwsHeader::new();
        header.set_token_type("JWT");

        // [security] Create digital signature with the selected algorithm
        let token = match key {
            SigningKeyRef::Hmac(secret) => {
                let signer = HS256
                    .signer_from_bytes(secret)
                    .map_err(|e| TokenError::Signing(e.to_string()))?;
                jwt::encode_with_signer(&payload, &header, &signer)
            }
            SigningKeyRef::Rsa { private_pem, kid } => {
                header.set_key_id(kid); // [security] Key ID so verifiers can pick the public key
                let signer = RS256
                    .signer_from_pem(private_pem.as_bytes())
                    .map_err(|e| TokenError::Signing(e.to_string()))?;
                jwt::encode_with_signer(&payload, &header, &signer)
            }
        };

        token.map_err(|e| TokenError::Signing(e.to_string()))
    }

    // [security] Verify signature, then issuer and time-based claims, then decode
    pub fn verify<C: DeserializeOwned>(
        &self,
        token: &str,
        key: VerifyingKeyRef<'_>,
    ) -> Result<C, TokenError> {
        let decoded = match key {
            VerifyingKeyRef::Hmac(secret) => {
                let verifier = HS256
                    .verifier_from_bytes(secret)
                    .map_err(|e| TokenError::InvalidSignature(e.to_string()))?;
                jwt::decode_with_verifier(token, &verifier)
            }
            VerifyingKeyRef::Rsa { public_pem } => {
                let verifier = RS256
                    .verifier_from_pem(public_pem.as_bytes())
                    .map_err(|e| TokenError::InvalidSignature(e.to_string()))?;
                jwt::decode_with_verifier(token, &verifier)
            }
        };
        let (payload, _header) = decoded.map_err(|e| TokenError::InvalidSignature(e.to_string()))?;

        let claims = payload.claims_set();
        self.validate_claims(claims)?;

        serde_json::from_value(Value::Object(claims.clone()))
            .map_err(|e| TokenError::InvalidClaims(e.to_string()))
    }

    // [security] Validate critical JWT claims to ensure token authenticity and validity
    fn validate_claims(&self, claims: &Map<String, Value>) -> Result<(), TokenError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();

        // [security] Validate issuer claim - prevents token forgery from other issuers
        let iss = claims.get("iss").and_then(Value::as_str).unwrap_or_default();
        if iss != self.issuer {
            return Err(TokenError::InvalidIssuer(iss.to_string()));
        }

        // [security] Check token expiration with clock skew tolerance
        let exp = claims
            .get("exp")
            .and_then(Value::as_i64)
            .ok_or_else(|| TokenError::InvalidClaims("missing 'exp'".into()))?;
        if exp < now - LEEWAY_SECS {
            return Err(TokenError::Expired);
        }

        // [security] Validate issued-at time - prevents tokens "issued in the future"
        if let Some(iat) = claims.get("iat").and_then(Value::as_i64) {
            if iat > now + LEEWAY_SECS {
                return Err(TokenError::IssuedInFuture);
            }
        }

        Ok(())
    }
}

// [business] Extract key ID from JWT header without full token verification
// Used for key lookup before performing expensive signature verification
pub fn extract_kid_from_jwt(token: &str) -> Result<String, TokenError> {
    // [library] Parse JWT structure - header.payload.signature format
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(TokenError::Malformed("expected three segments".into()));
    }

    // [library] Decode base64url-encoded header (first part of JWT)
    let header_json = URL_SAFE_NO_PAD
        .decode(parts[0])
        .map_err(|_| TokenError::Malformed("invalid header encoding".into()))?;

    let header: Value = serde_json::from_slice(&header_json)
        .map_err(|_| TokenError::Malformed("invalid header JSON".into()))?;

    // [security] Extract key ID for public key lookup
    let kid = header
        .get("kid")
        .and_then(|v| v.as_str())
        .ok_or_else(|| TokenError::Malformed("missing 'kid' in header".into()))?;

    Ok(kid.to_string())
}

// [security] Generate cryptographically secure random token
// Used for authorization codes and other security-critical random values
pub fn generate_random_token() -> String {
    use rand::Rng; // [library] Random number generation trait

    // [security] Generate 32 bytes (256 bits) of cryptographically secure randomness
    let random_bytes: [u8; 32] = rand::thread_rng().gen();

    // [library] Encode as base64url without padding for URL safety
    URL_SAFE_NO_PAD.encode(random_bytes)
}

// [rust] Unit tests for JWT functionality and security properties
#[cfg(test)]
mod tests {
    use super::*;
    use josekit::jwk::alg::rsa::RsaKeyPair;

    const ISSUER: &str = "https://idp.campus.test";
    const HMAC_KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn rsa_pems() -> (String, String) {
        let pair = RsaKeyPair::generate(2048).unwrap();
        (
            String::from_utf8(pair.to_pem_private_key()).unwrap(),
            String::from_utf8(pair.to_pem_public_key()).unwrap(),
        )
    }

    fn session_claims(sub: &str) -> SessionClaims {
        SessionClaims {
            iss: String::new(),
            sub: sub.into(),
            sid: "sid-1".into(),
            amr: vec!["pwd".into(), "sms".into()],
            typ: TYP_SESSION.into(),
            exp: 0,
            iat: 0,
            jti: String::new(),
        }
    }

    #[test]
    fn test_hmac_sign_and_verify() {
        let signer = JwtSigner::new(ISSUER);
        let token = signer
            .sign(&session_claims("u1"), SigningKeyRef::Hmac(HMAC_KEY), 900)
            .unwrap();

        let claims: SessionClaims = signer.verify(&token, VerifyingKeyRef::Hmac(HMAC_KEY)).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.iss, ISSUER);
        assert_eq!(claims.exp - claims.iat, 900);
        assert!(!claims.jti.is_empty());

        assert!(matches!(
            signer.verify::<SessionClaims>(&token, VerifyingKeyRef::Hmac(b"another-key-another-key-another!")),
            Err(TokenError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_rsa_sign_carries_kid() {
        let (private_pem, public_pem) = rsa_pems();
        let signer = JwtSigner::new(ISSUER);
        let token = signer
            .sign(
                &session_claims("u2"),
                SigningKeyRef::Rsa { private_pem: &private_pem, kid: "kid-1" },
                60,
            )
            .unwrap();

        assert_eq!(extract_kid_from_jwt(&token).unwrap(), "kid-1");
        let claims: SessionClaims = signer
            .verify(&token, VerifyingKeyRef::Rsa { public_pem: &public_pem })
            .unwrap();
        assert_eq!(claims.sub, "u2");

        // A different key pair must not verify
        let (_, other_public) = rsa_pems();
        assert!(signer
            .verify::<SessionClaims>(&token, VerifyingKeyRef::Rsa { public_pem: &other_public })
            .is_err());
    }

    #[test]
    fn test_expired_and_foreign_issuer_rejected() {
        let signer = JwtSigner::new(ISSUER);
        let expired = signer
            .sign(&session_claims("u3"), SigningKeyRef::Hmac(HMAC_KEY), -120)
            .unwrap();
        assert!(matches!(
            signer.verify::<SessionClaims>(&expired, VerifyingKeyRef::Hmac(HMAC_KEY)),
            Err(TokenError::Expired)
        ));

        let foreign = JwtSigner::new("https://elsewhere.test")
            .sign(&session_claims("u3"), SigningKeyRef::Hmac(HMAC_KEY), 60)
            .unwrap();
        assert!(matches!(
            signer.verify::<SessionClaims>(&foreign, VerifyingKeyRef::Hmac(HMAC_KEY)),
            Err(TokenError::InvalidIssuer(_))
        ));
    }

    #[test]
    fn test_extract_kid_rejects_garbage() {
        assert!(extract_kid_from_jwt("not-a-jwt").is_err());
        assert!(extract_kid_from_jwt("a.b.c").is_err());
    }

    #[test]
    fn test_generate_random_token() {
        // [security] Test that random token generation produces unique values
        let token1 = generate_random_token();
        let token2 = generate_random_token();

        assert_ne!(token1, token2);
        // [library] Base64 encoding of 32 bytes should be ~43 characters
        assert!(token1.len() > 40);
    }
}
