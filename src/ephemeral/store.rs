use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::{query, Row};
use tokio::time::Instant;

use crate::db::Database;

// [business] Key-value store with a per-key TTL.
//
// `get_del` must be a single atomic operation: of two concurrent calls for
// the same key, exactly one observes the value.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn get_del(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn del(&self, key: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryEphemeralStore {
    entries: Arc<Mutex<HashMap<String, (Vec<u8>, Instant)>>>,
}

impl MemoryEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    // [business] Drops expired entries; lookups already ignore them.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        before - entries.len()
    }
}

#[async_trait]
impl EphemeralStore for MemoryEphemeralStore {
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_vec(), Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone()))
    }

    async fn get_del(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .remove(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value))
    }

    async fn del(&self, key: &str) -> Result<bool> {
        Ok(self.entries.lock().remove(key).is_some())
    }
}

// [business] Ephemeral entries in an UNLOGGED Postgres table.
#[derive(Debug, Clone)]
pub struct PgEphemeralStore {
    db: Database,
}

impl PgEphemeralStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        let result = query("DELETE FROM ephemeral_entries WHERE expires_at <= NOW()")
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl EphemeralStore for PgEphemeralStore {
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        query(
            "INSERT INTO ephemeral_entries (key, value, expires_at) \
             VALUES ($1, $2, NOW() + make_interval(secs => $3)) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(ttl.as_secs_f64())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row = query("SELECT value FROM ephemeral_entries WHERE key = $1 AND expires_at > NOW()")
            .bind(key)
            .fetch_optional(self.db.as_ref())
            .await?;
        Ok(row.map(|r| r.try_get("value")).transpose()?)
    }

    async fn get_del(&self, key: &str) -> Result<Option<Vec<u8>>> {
        // One statement: the row lock makes a concurrent DELETE see nothing
        let row = query(
            "DELETE FROM ephemeral_entries WHERE key = $1 \
             RETURNING value, expires_at > NOW() AS live",
        )
        .bind(key)
        .fetch_optional(self.db.as_ref())
        .await?;

        match row {
            Some(row) if row.try_get::<bool, _>("live")? => Ok(Some(row.try_get("value")?)),
            _ => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let result = query("DELETE FROM ephemeral_entries WHERE key = $1")
            .bind(key)
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
