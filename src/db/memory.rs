// [business] In-memory implementation of every store trait.
//
// Used by the test suites and for running the service without Postgres.
// Each table sits behind its own `parking_lot::RwLock`; every trait
// method is a single critical section, so the conditional transitions of
// the refresh ledger are atomic here just as they are in SQL.

use std::{collections::HashMap, sync::Arc};

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    models::{
        Client, KeyStatus, MfaSettings, NewRefreshToken, RefreshTokenRecord, RefreshTokenStatus,
        SigningKey, User,
    },
    store::{ClientStore, KeyStore, MfaStore, RefreshTokenStore, UserStore},
};

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    keys: Arc<RwLock<HashMap<String, SigningKey>>>,
    clients: Arc<RwLock<HashMap<String, Client>>>,
    users: Arc<RwLock<HashMap<Uuid, User>>>,
    refresh_tokens: Arc<RwLock<Vec<RefreshTokenRecord>>>,
    mfa: Arc<RwLock<HashMap<Uuid, MfaSettings>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn active_signing_key(&self) -> Result<Option<SigningKey>> {
        let now = OffsetDateTime::now_utc();
        let keys = self.keys.read();
        Ok(keys
            .values()
            .filter(|k| k.is_usable_at(now))
            .max_by_key(|k| k.activated_at.unwrap_or(k.created_at))
            .cloned())
    }

    async fn signing_key(&self, kid: &str) -> Result<Option<SigningKey>> {
        Ok(self.keys.read().get(kid).cloned())
    }

    async fn verification_keys(&self) -> Result<Vec<SigningKey>> {
        let mut keys: Vec<SigningKey> = self
            .keys
            .read()
            .values()
            .filter(|k| matches!(k.status, KeyStatus::Active | KeyStatus::Retired))
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn insert_signing_key(&self, key: &SigningKey) -> Result<()> {
        let mut keys = self.keys.write();
        if keys.contains_key(&key.kid) {
            bail!("signing key {} already exists", key.kid);
        }
        keys.insert(key.kid.clone(), key.clone());
        Ok(())
    }

    async fn set_signing_key_status(&self, kid: &str, status: KeyStatus) -> Result<bool> {
        let mut keys = self.keys.write();
        match keys.get_mut(kid) {
            Some(key) => {
                if key.status == KeyStatus::Active && status != KeyStatus::Active {
                    key.rotated_at = Some(OffsetDateTime::now_utc());
                }
                if status == KeyStatus::Active && key.activated_at.is_none() {
                    key.activated_at = Some(OffsetDateTime::now_utc());
                }
                key.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn client(&self, client_id: &str) -> Result<Option<Client>> {
        Ok(self.clients.read().get(client_id).cloned())
    }

    async fn insert_client(&self, client: &Client) -> Result<()> {
        self.clients
            .write()
            .insert(client.client_id.clone(), client.clone());
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn user_by_external_id(&self, external_id: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .values()
            .find(|u| u.external_id == external_id)
            .cloned())
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().get(&id).cloned())
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()> {
        match self.users.write().get_mut(&id) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                Ok(())
            }
            None => bail!("user {} not found", id),
        }
    }

    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut users = self.users.write();
        if users.values().any(|u| u.external_id == user.external_id) {
            bail!("external id {} already registered", user.external_id);
        }
        users.insert(user.id, user.clone());
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn insert_refresh_token(&self, token: &NewRefreshToken) -> Result<RefreshTokenRecord> {
        let mut rows = self.refresh_tokens.write();
        if rows.iter().any(|r| r.token_hash == token.token_hash) {
            bail!("duplicate refresh token hash");
        }

        let status = match token.prev_id {
            None => RefreshTokenStatus::Active,
            Some(prev) => match rows.iter().find(|r| r.id == prev) {
                Some(r) if r.status == RefreshTokenStatus::Rotated => RefreshTokenStatus::Active,
                _ => RefreshTokenStatus::Revoked,
            },
        };

        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            client_id: token.client_id.clone(),
            subject_hash: token.subject_hash.clone(),
            token_hash: token.token_hash.clone(),
            status,
            prev_id: token.prev_id,
            created_at: OffsetDateTime::now_utc(),
            last_used_at: None,
        };
        rows.push(record.clone());
        Ok(record)
    }

    async fn refresh_token_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        Ok(self
            .refresh_tokens
            .read()
            .iter()
            .find(|r| r.token_hash == token_hash)
            .cloned())
    }

    async fn mark_refresh_token_rotated(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>> {
        let mut rows = self.refresh_tokens.write();
        Ok(rows
            .iter_mut()
            .find(|r| r.token_hash == token_hash && r.status == RefreshTokenStatus::Active)
            .map(|r| {
                r.status = RefreshTokenStatus::Rotated;
                r.last_used_at = Some(OffsetDateTime::now_utc());
                r.clone()
            }))
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<u64> {
        Ok(revoke_where(&mut self.refresh_tokens.write(), |r| {
            r.token_hash == token_hash
        }))
    }

    async fn revoke_refresh_family(&self, client_id: &str, subject_hash: &str) -> Result<u64> {
        Ok(revoke_where(&mut self.refresh_tokens.write(), |r| {
            r.client_id == client_id && r.subject_hash == subject_hash
        }))
    }

    async fn revoke_refresh_subject(&self, subject_hash: &str) -> Result<u64> {
        Ok(revoke_where(&mut self.refresh_tokens.write(), |r| {
            r.subject_hash == subject_hash
        }))
    }

    async fn refresh_tokens_for_subject(
        &self,
        subject_hash: &str,
    ) -> Result<Vec<RefreshTokenRecord>> {
        Ok(self
            .refresh_tokens
            .read()
            .iter()
            .filter(|r| r.subject_hash == subject_hash)
            .cloned()
            .collect())
    }
}

fn revoke_where(
    rows: &mut [RefreshTokenRecord],
    matches: impl Fn(&RefreshTokenRecord) -> bool,
) -> u64 {
    let mut count = 0;
    for row in rows.iter_mut().filter(|r| matches(r)) {
        if row.status != RefreshTokenStatus::Revoked {
            row.status = RefreshTokenStatus::Revoked;
            count += 1;
        }
    }
    count
}

#[async_trait]
impl MfaStore for MemoryStore {
    async fn mfa_settings(&self, user_id: Uuid) -> Result<Option<MfaSettings>> {
        Ok(self.mfa.read().get(&user_id).cloned())
    }

    async fn upsert_mfa_settings(&self, settings: &MfaSettings) -> Result<()> {
        self.mfa.write().insert(settings.user_id, settings.clone());
        Ok(())
    }
}
