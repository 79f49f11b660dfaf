// [business] Interactive login: password, forced reset, SMS second factor, session issuance.
//
// Every step after `login` names the attempt it continues. The attempt
// lives in the ephemeral store and carries its state, so a step can only
// run from the state that precedes it:
//
// login ──► ResetRequired ──reset_password──► PasswordOk
//       └─────────────────────────────────────► PasswordOk ──multifactor(request)──► MfaPending
//                                                           MfaPending ──multifactor(code)──► Authenticated
//                                                                                     enter ──► (consumed)

use std::{sync::Arc, time::Duration};

use rand::Rng;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use tower_cookies::{cookie::SameSite, Cookie};
use tracing::{info, warn};
use uuid::Uuid;

use super::sms::{mask_phone, SmsSender};
use crate::config::Config;
use crate::db::{
    LoginAttempt, LoginState, MfaMethod, MfaSettings, MfaStore, OtpChallenge, User, UserStore,
};
use crate::ephemeral::{EphemeralStore, IdStrategy, TicketIssuer};
use crate::error::{AuthError, AuthResult};
use crate::security::{
    constant_time_eq,
    password::{hash_password, is_legacy_hash, verify_password},
    JwtSigner, SessionClaims, SigningKeyRef, VerifyingKeyRef, TYP_SESSION, TYP_SESSION_REFRESH,
};

pub const ATTEMPT_PREFIX: &str = "auth:attempt:";
pub const OTP_PREFIX: &str = "mfa:otp:";
pub const ATTEMPT_TTL: Duration = Duration::from_secs(600);
pub const OTP_TTL: Duration = Duration::from_secs(300);

pub const SESSION_COOKIE: &str = "idp_session";
pub const REFRESH_COOKIE: &str = "idp_refresh";

const MIN_PASSWORD_LEN: usize = 8;
// [business] Wrong codes tolerated per attempt before it is discarded.
const MAX_MFA_FAILURES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    ResetPassword,
    Multifactor,
    Enter,
    Finish,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginStep {
    pub attempt: String,
    pub next: Vec<NextStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<MfaMethod>,
    #[serde(default)]
    pub code_sent: bool,
}

#[derive(Debug)]
pub struct SessionTokens {
    pub subject: String,
    pub session_id: String,
    pub amr: Vec<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_in: i64,
    pub refresh_expires_in: i64,
    pub next: Vec<NextStep>,
}

pub struct AuthenticationFlow {
    config: Arc<Config>,
    users: Arc<dyn UserStore>,
    mfa: Arc<dyn MfaStore>,
    attempts: TicketIssuer<LoginAttempt>,
    otp: TicketIssuer<OtpChallenge>,
    sms: Arc<dyn SmsSender>,
    signer: JwtSigner,
    session_key: Secret<Vec<u8>>,
}

impl AuthenticationFlow {
    pub fn new(
        config: Arc<Config>,
        users: Arc<dyn UserStore>,
        mfa: Arc<dyn MfaStore>,
        ephemeral: Arc<dyn EphemeralStore>,
        sms: Arc<dyn SmsSender>,
    ) -> Self {
        Self {
            signer: JwtSigner::new(config.issuer.clone()),
            session_key: config.session_key(),
            attempts: TicketIssuer::new(ephemeral.clone(), ATTEMPT_PREFIX, ATTEMPT_TTL, IdStrategy::Uuid),
            otp: TicketIssuer::new(ephemeral, OTP_PREFIX, OTP_TTL, IdStrategy::RandomToken),
            config,
            users,
            mfa,
            sms,
        }
    }

    pub async fn login(&self, external_id: &str, password: &str) -> AuthResult<LoginStep> {
        let user = match self.users.user_by_external_id(external_id).await? {
            Some(user) if !user.disabled => user,
            Some(_) => {
                warn!(external_id, "login rejected: account disabled");
                return Err(invalid_credentials());
            }
            None => {
                warn!(external_id, "login rejected: unknown account");
                return Err(invalid_credentials());
            }
        };

        if !verify_password(password, &user.password_hash)? {
            warn!(user_id = %user.id, "login rejected: password mismatch");
            return Err(invalid_credentials());
        }

        if is_legacy_hash(&user.password_hash) {
            let attempt = self
                .attempts
                .issue(&new_attempt(user.id, LoginState::ResetRequired), None)
                .await?;
            info!(user_id = %user.id, "first login on legacy password; reset required");
            return Ok(LoginStep {
                attempt,
                next: vec![NextStep::ResetPassword],
                methods: vec![],
                code_sent: false,
            });
        }

        let settings = self.settings_for(user.id).await?;
        let attempt = self
            .attempts
            .issue(&new_attempt(user.id, LoginState::PasswordOk), None)
            .await?;
        info!(user_id = %user.id, "password accepted");

        Ok(LoginStep {
            attempt,
            next: vec![NextStep::Multifactor],
            methods: settings.methods(),
            code_sent: false,
        })
    }

    pub async fn reset_password(&self, attempt_id: &str, new_password: &str) -> AuthResult<LoginStep> {
        let mut attempt = self.load_attempt(attempt_id).await?;
        if attempt.state != LoginState::ResetRequired {
            return Err(AuthError::unauthorized("password reset is not pending for this attempt"));
        }
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::invalid_request(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let hash = hash_password(new_password)?;
        self.users.update_password_hash(attempt.user_id, &hash).await?;

        attempt.state = LoginState::PasswordOk;
        self.attempts.issue(&attempt, Some(attempt_id)).await?;
        info!(user_id = %attempt.user_id, "legacy password replaced");

        let settings = self.settings_for(attempt.user_id).await?;
        Ok(LoginStep {
            attempt: attempt_id.to_string(),
            next: vec![NextStep::Multifactor],
            methods: settings.methods(),
            code_sent: false,
        })
    }

    // [business] A missing or non six-digit `code` requests a new one; otherwise it is verified.
    pub async fn multifactor(
        &self,
        attempt_id: &str,
        mfa_type: &str,
        code: Option<&str>,
        target: Option<&str>,
    ) -> AuthResult<LoginStep> {
        let mut attempt = self.load_attempt(attempt_id).await?;
        if !matches!(attempt.state, LoginState::PasswordOk | LoginState::MfaPending) {
            return Err(AuthError::unauthorized("multifactor is not expected for this attempt"));
        }

        let method: MfaMethod = mfa_type
            .parse()
            .map_err(|_| AuthError::invalid_request(format!("unknown mfa type '{}'", mfa_type)))?;
        if method != MfaMethod::Sms {
            return Err(AuthError::invalid_request(format!(
                "mfa type '{}' is not supported",
                method
            )));
        }

        let user = self.load_user(attempt.user_id).await?;
        let settings = self.settings_for(user.id).await?;
        if !settings.sms_enabled {
            return Err(AuthError::invalid_request("sms is not enabled for this account"));
        }
        let phone = resolve_target(&settings, &user, target)?;

        match code.filter(|c| is_six_digits(c)) {
            None => {
                let challenge = OtpChallenge {
                    attempt: attempt_id.to_string(),
                    code: format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32)),
                };
                self.otp.issue(&challenge, Some(&phone)).await?;
                self.sms.send(&phone, &challenge.code).await?;

                attempt.state = LoginState::MfaPending;
                self.attempts.issue(&attempt, Some(attempt_id)).await?;
                info!(user_id = %user.id, phone = %mask_phone(&phone), "sms challenge issued");

                Ok(LoginStep {
                    attempt: attempt_id.to_string(),
                    next: vec![NextStep::Multifactor],
                    methods: vec![MfaMethod::Sms],
                    code_sent: true,
                })
            }
            Some(code) => {
                // A code only verifies the attempt that requested it
                let matched = match self.otp.verify(&phone).await? {
                    Some(stored)
                        if stored.attempt == attempt_id
                            && constant_time_eq(stored.code.as_bytes(), code.as_bytes()) =>
                    {
                        // Consume, and require that nobody replaced or used it in between
                        matches!(self.otp.consume(&phone).await?, Some(taken) if taken == stored)
                    }
                    _ => false,
                };

                if !matched {
                    attempt.mfa_failures += 1;
                    if attempt.mfa_failures >= MAX_MFA_FAILURES {
                        // The outstanding code dies with the attempt
                        self.discard_challenge(&phone, attempt_id).await?;
                        self.attempts.revoke(attempt_id).await?;
                        warn!(user_id = %user.id, "too many wrong codes; login attempt discarded");
                    } else {
                        self.attempts.issue(&attempt, Some(attempt_id)).await?;
                        warn!(user_id = %user.id, failures = attempt.mfa_failures, "sms code rejected");
                    }
                    return Err(AuthError::unauthorized("invalid or expired verification code"));
                }

                attempt.state = LoginState::Authenticated;
                attempt.amr = vec!["pwd".to_string(), "sms".to_string()];
                self.attempts.issue(&attempt, Some(attempt_id)).await?;
                info!(user_id = %user.id, "second factor verified");

                Ok(LoginStep {
                    attempt: attempt_id.to_string(),
                    next: vec![NextStep::Enter],
                    methods: vec![],
                    code_sent: false,
                })
            }
        }
    }

    // [business] Consumes a fully authenticated attempt and issues the session pair.
    pub async fn enter(&self, attempt_id: &str) -> AuthResult<SessionTokens> {
        let attempt = self.load_attempt(attempt_id).await?;
        if attempt.state != LoginState::Authenticated {
            return Err(AuthError::unauthorized("authentication is not complete"));
        }
        let attempt = self
            .attempts
            .consume(attempt_id)
            .await?
            .filter(|a| a.state == LoginState::Authenticated)
            .ok_or_else(|| AuthError::unauthorized("login attempt already used"))?;

        let user = self.load_user(attempt.user_id).await?;
        let subject = user.id.to_string();
        let session_id = Uuid::new_v4().to_string();
        let key = SigningKeyRef::Hmac(self.session_key.expose_secret());

        let access_token = self.signer.sign(
            &session_claims(&subject, &session_id, &attempt.amr, TYP_SESSION),
            key,
            self.config.session_access_ttl_secs,
        )?;
        let refresh_token = self.signer.sign(
            &session_claims(&subject, &session_id, &attempt.amr, TYP_SESSION_REFRESH),
            key,
            self.config.session_refresh_ttl_secs,
        )?;

        info!(user_id = %user.id, session_id, "session issued");
        Ok(SessionTokens {
            subject,
            session_id,
            amr: attempt.amr,
            access_token,
            refresh_token,
            access_expires_in: self.config.session_access_ttl_secs,
            refresh_expires_in: self.config.session_refresh_ttl_secs,
            next: vec![NextStep::Finish],
        })
    }

    // [business] Validates an access session token (signature, issuer, expiry, type).
    pub fn verify_session(&self, token: &str) -> AuthResult<SessionClaims> {
        let claims: SessionClaims = self
            .signer
            .verify(token, VerifyingKeyRef::Hmac(self.session_key.expose_secret()))?;
        if claims.typ != TYP_SESSION {
            return Err(AuthError::unauthorized("not a session access token"));
        }
        Ok(claims)
    }

    async fn load_attempt(&self, attempt_id: &str) -> AuthResult<LoginAttempt> {
        self.attempts
            .verify(attempt_id)
            .await?
            .ok_or_else(|| AuthError::unauthorized("login attempt not found or expired"))
    }

    async fn load_user(&self, user_id: Uuid) -> AuthResult<User> {
        match self.users.user_by_id(user_id).await? {
            Some(user) if !user.disabled => Ok(user),
            _ => Err(invalid_credentials()),
        }
    }

    async fn settings_for(&self, user_id: Uuid) -> AuthResult<MfaSettings> {
        Ok(self
            .mfa
            .mfa_settings(user_id)
            .await?
            .unwrap_or_else(|| MfaSettings::default_for(user_id)))
    }

    async fn discard_challenge(&self, phone: &str, attempt_id: &str) -> AuthResult<()> {
        if let Some(pending) = self.otp.verify(phone).await? {
            if pending.attempt == attempt_id {
                self.otp.revoke(phone).await?;
            }
        }
        Ok(())
    }
}

// [business] The two session cookies: HttpOnly, SameSite=Lax, Secure outside development.
pub fn session_cookies(config: &Config, tokens: &SessionTokens) -> [Cookie<'static>; 2] {
    let build = |name: &'static str, value: &str, max_age: i64| {
        let mut cookie = Cookie::new(name, value.to_string());
        cookie.set_http_only(true);
        cookie.set_path("/");
        cookie.set_same_site(SameSite::Lax);
        cookie.set_secure(config.secure_cookies());
        cookie.set_max_age(time::Duration::seconds(max_age));
        if !config.cookie_domain.is_empty() {
            cookie.set_domain(config.cookie_domain.clone());
        }
        cookie
    };

    [
        build(SESSION_COOKIE, &tokens.access_token, tokens.access_expires_in),
        build(REFRESH_COOKIE, &tokens.refresh_token, tokens.refresh_expires_in),
    ]
}

fn new_attempt(user_id: Uuid, state: LoginState) -> LoginAttempt {
    LoginAttempt {
        user_id,
        state,
        amr: vec!["pwd".to_string()],
        mfa_failures: 0,
    }
}

fn session_claims(subject: &str, session_id: &str, amr: &[String], typ: &str) -> SessionClaims {
    SessionClaims {
        iss: String::new(),
        sub: subject.to_string(),
        sid: session_id.to_string(),
        amr: amr.to_vec(),
        typ: typ.to_string(),
        exp: 0,
        iat: 0,
        jti: String::new(),
    }
}

fn invalid_credentials() -> AuthError {
    AuthError::unauthorized("invalid credentials")
}

fn is_six_digits(code: &str) -> bool {
    code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit())
}

// The bound phone wins; a caller-supplied target must match it exactly.
fn resolve_target(settings: &MfaSettings, user: &User, target: Option<&str>) -> AuthResult<String> {
    let bound = settings.phone.as_deref().or(user.phone.as_deref());
    match (bound, target) {
        (Some(bound), Some(target)) if bound != target => {
            Err(AuthError::unauthorized("target does not match the bound phone"))
        }
        (Some(bound), _) => Ok(bound.to_string()),
        (None, _) => Err(AuthError::invalid_request("no phone number is bound to this account")),
    }
}
