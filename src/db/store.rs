// [business] Store traits for the durable entities.
//
// Every component takes the narrowest trait it needs as an `Arc<dyn ...>`;
// `PgStore`(super::PgStore) and `MemoryStore`(super::MemoryStore)
// implement all of them.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use super::models::{
    Client, KeyStatus, MfaSettings, NewRefreshToken, RefreshTokenRecord, SigningKey, User,
};

#[async_trait]
pub trait KeyStore: Send + Sync {
    // [business] Active, unexpired key with the latest `activated_at`.
    async fn active_signing_key(&self) -> Result<Option<SigningKey>>;

    async fn signing_key(&self, kid: &str) -> Result<Option<SigningKey>>;

    // [business] Keys that may still verify tokens: `active` and `retired`.
    async fn verification_keys(&self) -> Result<Vec<SigningKey>>;

    async fn insert_signing_key(&self, key: &SigningKey) -> Result<()>;

    // [business] Returns false when no key has this kid.
    async fn set_signing_key_status(&self, kid: &str, status: KeyStatus) -> Result<bool>;
}

#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn client(&self, client_id: &str) -> Result<Option<Client>>;

    async fn insert_client(&self, client: &Client) -> Result<()>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user_by_external_id(&self, external_id: &str) -> Result<Option<User>>;

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>>;

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()>;

    async fn insert_user(&self, user: &User) -> Result<()>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    // [business] Inserts a new chain link. The row starts `active` unless `prev_id`
    // names a record that is no longer `rotated`, in which case it is
    // inserted already `revoked`.
    async fn insert_refresh_token(&self, token: &NewRefreshToken) -> Result<RefreshTokenRecord>;

    async fn refresh_token_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>>;

    // [business] Conditional `active -> rotated` transition. `None` when the row is
    // missing or was not `active`.
    async fn mark_refresh_token_rotated(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>>;

    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<u64>;

    async fn revoke_refresh_family(&self, client_id: &str, subject_hash: &str) -> Result<u64>;

    async fn revoke_refresh_subject(&self, subject_hash: &str) -> Result<u64>;

    async fn refresh_tokens_for_subject(&self, subject_hash: &str)
        -> Result<Vec<RefreshTokenRecord>>;
}

#[async_trait]
pub trait MfaStore: Send + Sync {
    async fn mfa_settings(&self, user_id: Uuid) -> Result<Option<MfaSettings>>;

    async fn upsert_mfa_settings(&self, settings: &MfaSettings) -> Result<()>;
}
