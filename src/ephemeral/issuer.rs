use std::{marker::PhantomData, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use super::store::EphemeralStore;
use crate::security::generate_random_token;

// [business] How a `TicketIssuer` mints ids when the caller does not supply one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    Uuid,
    // [business] 256 random bits, base64url.
    RandomToken,
}

impl IdStrategy {
    fn generate(self) -> String {
        match self {
            IdStrategy::Uuid => Uuid::new_v4().to_string(),
            IdStrategy::RandomToken => generate_random_token(),
        }
    }
}

// [business] Typed, single-use records under `{prefix}{id}` with a fixed TTL.
pub struct TicketIssuer<T> {
    store: Arc<dyn EphemeralStore>,
    prefix: &'static str,
    ttl: Duration,
    ids: IdStrategy,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for TicketIssuer<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            prefix: self.prefix,
            ttl: self.ttl,
            ids: self.ids,
            _payload: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> TicketIssuer<T> {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        prefix: &'static str,
        ttl: Duration,
        ids: IdStrategy,
    ) -> Self {
        Self {
            store,
            prefix,
            ttl,
            ids,
            _payload: PhantomData,
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }

    // [business] Stores `payload` and returns its id. A `custom_id` overwrites any
    // live record under the same id and restarts its TTL.
    pub async fn issue(&self, payload: &T, custom_id: Option<&str>) -> Result<String> {
        let id = match custom_id {
            Some(id) => id.to_string(),
            None => self.ids.generate(),
        };
        let bytes = serde_json::to_vec(payload).context("encoding ephemeral payload")?;
        self.store.set_ex(&self.key(&id), &bytes, self.ttl).await?;
        Ok(id)
    }

    // [business] Reads without consuming.
    pub async fn verify(&self, id: &str) -> Result<Option<T>> {
        match self.store.get(&self.key(id)).await? {
            Some(bytes) => Ok(Some(self.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // [business] Atomic fetch-and-delete.
    pub async fn consume(&self, id: &str) -> Result<Option<T>> {
        match self.store.get_del(&self.key(id)).await? {
            Some(bytes) => Ok(Some(self.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn revoke(&self, id: &str) -> Result<bool> {
        self.store.del(&self.key(id)).await
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).with_context(|| format!("decoding {} payload", self.prefix))
    }
}

// [business] Maps a secondary key (e.g. the OAuth `state`) to a primary ticket id.
#[derive(Clone)]
pub struct SecondaryIndex {
    store: Arc<dyn EphemeralStore>,
    prefix: &'static str,
    ttl: Duration,
}

impl SecondaryIndex {
    pub fn new(store: Arc<dyn EphemeralStore>, prefix: &'static str, ttl: Duration) -> Self {
        Self { store, prefix, ttl }
    }

    pub async fn link(&self, secondary: &str, primary_id: &str) -> Result<()> {
        self.store
            .set_ex(
                &format!("{}{}", self.prefix, secondary),
                primary_id.as_bytes(),
                self.ttl,
            )
            .await
    }

    pub async fn resolve(&self, secondary: &str) -> Result<Option<String>> {
        let raw = self
            .store
            .get(&format!("{}{}", self.prefix, secondary))
            .await?;
        raw.map(|bytes| String::from_utf8(bytes).context("index entry is not UTF-8"))
            .transpose()
    }
}
