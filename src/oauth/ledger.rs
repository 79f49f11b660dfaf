use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{NewRefreshToken, RefreshTokenRecord, RefreshTokenStore};
use crate::error::{AuthError, AuthResult};
use crate::security::TokenHasher;

// [security] Result of presenting a refresh token for rotation.
#[derive(Debug)]
pub enum Rotation {
    // [security] The presented row is now `rotated`; the caller inserts the successor.
    Rotated(RefreshTokenRecord),
    // [security] The token was already used: its whole family has been revoked.
    ReuseDetected { revoked: u64 },
}

// [security] Refresh tokens by hash, with rotation and reuse detection.
pub struct RefreshTokenLedger {
    store: Arc<dyn RefreshTokenStore>,
    hasher: Arc<TokenHasher>,
}

impl RefreshTokenLedger {
    pub fn new(store: Arc<dyn RefreshTokenStore>, hasher: Arc<TokenHasher>) -> Self {
        Self { store, hasher }
    }

    pub fn hash_token(&self, token: &str) -> String {
        self.hasher.hash_token(token)
    }

    pub fn hash_subject(&self, subject: &str) -> String {
        self.hasher.hash_subject(subject)
    }

    pub async fn record(
        &self,
        client_id: &str,
        subject_hash: &str,
        token_hash: &str,
        prev_id: Option<Uuid>,
    ) -> AuthResult<RefreshTokenRecord> {
        let record = self
            .store
            .insert_refresh_token(&NewRefreshToken {
                client_id: client_id.to_string(),
                subject_hash: subject_hash.to_string(),
                token_hash: token_hash.to_string(),
                prev_id,
            })
            .await?;
        Ok(record)
    }

    pub async fn rotate(&self, token_hash: &str) -> AuthResult<Rotation> {
        // Conditional active -> rotated; only one concurrent caller can win
        if let Some(record) = self.store.mark_refresh_token_rotated(token_hash).await? {
            return Ok(Rotation::Rotated(record));
        }

        let record = self
            .store
            .refresh_token_by_hash(token_hash)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("unknown refresh token"))?;

        let revoked = self
            .store
            .revoke_refresh_family(&record.client_id, &record.subject_hash)
            .await?;
        warn!(
            client_id = %record.client_id,
            token = %short_hash(token_hash),
            status = %record.status,
            revoked,
            "refresh token reuse detected; family revoked"
        );
        Ok(Rotation::ReuseDetected { revoked })
    }

    // [security] Idempotent; unknown tokens are a no-op.
    pub async fn revoke(&self, token_hash: &str) -> AuthResult<()> {
        let revoked = self.store.revoke_refresh_token(token_hash).await?;
        if revoked > 0 {
            info!(token = %short_hash(token_hash), "refresh token revoked");
        }
        Ok(())
    }

    // [security] Every row for the subject, across all clients.
    pub async fn revoke_subject(&self, subject_hash: &str) -> AuthResult<u64> {
        Ok(self.store.revoke_refresh_subject(subject_hash).await?)
    }

    pub async fn family(&self, subject_hash: &str) -> AuthResult<Vec<RefreshTokenRecord>> {
        Ok(self.store.refresh_tokens_for_subject(subject_hash).await?)
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
