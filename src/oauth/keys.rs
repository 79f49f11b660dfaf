// [security] Signing key selection, on-demand private key decryption and JWKS.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use moka::future::Cache;
use secrecy::SecretString;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::db::{JwksResponse, KeyStatus, KeyStore, SigningKey};
use crate::error::{AuthError, AuthResult};
use crate::security::envelope::{decrypt_private_key, Kek};

// [security] The key new tokens are signed with. Private material stays encrypted
// until `ActiveKey::decrypt` is called.
pub struct ActiveKey {
    pub kid: String,
    pub algorithm: String,
    pub public_pem: String,
    expires_at: Option<OffsetDateTime>,
    encrypted_private: Vec<u8>,
    kek: Arc<Kek>,
}

impl ActiveKey {
    fn is_current(&self) -> bool {
        self.expires_at
            .map_or(true, |exp| exp > OffsetDateTime::now_utc())
    }

    pub fn decrypt(&self) -> AuthResult<SecretString> {
        Ok(decrypt_private_key(&self.encrypted_private, &self.kek)?)
    }
}

impl std::fmt::Debug for ActiveKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

// [security] Active-key selection with a short-lived cache.
//
// `KeyManager::rotate` and `KeyManager::mark_compromised` invalidate the
// cache of this instance only. A status change written by another process
// is picked up once the cache TTL lapses, so this instance may keep signing
// with the old key for at most that long. Verification and JWKS always read
// the store, so an out-of-band compromise is rejected immediately there.
pub struct KeyManager {
    store: Arc<dyn KeyStore>,
    kek: Arc<Kek>,
    cache: Cache<(), Arc<ActiveKey>>,
    // [security] Bumped on every invalidation so a load racing with a rotation is
    // returned to its caller but never cached.
    generation: AtomicU64,
}

impl KeyManager {
    pub fn new(store: Arc<dyn KeyStore>, kek: Arc<Kek>, cache_ttl: Duration) -> Self {
        Self {
            store,
            kek,
            cache: Cache::builder().time_to_live(cache_ttl).max_capacity(1).build(),
            generation: AtomicU64::new(0),
        }
    }

    // [security] Fails with `NoActiveKey` when no active, unexpired key exists.
    pub async fn active_key(&self) -> AuthResult<Arc<ActiveKey>> {
        if let Some(key) = self.cache.get(&()).await {
            // A cached key may have expired since it was loaded
            if key.is_current() {
                return Ok(key);
            }
        }

        let gen_before = self.generation.load(Ordering::Acquire);
        let row = self.store.active_signing_key().await?.ok_or_else(|| {
            error!("no active signing key; token issuance is halted");
            AuthError::NoActiveKey
        })?;

        let key = Arc::new(ActiveKey {
            kid: row.kid,
            algorithm: row.algorithm,
            public_pem: row.public_key_pem,
            expires_at: row.expires_at,
            encrypted_private: row.encrypted_private_key,
            kek: self.kek.clone(),
        });

        if self.generation.load(Ordering::Acquire) == gen_before {
            self.cache.insert((), key.clone()).await;
        } else {
            debug!(kid = %key.kid, "not caching signing key loaded during invalidation");
        }
        Ok(key)
    }

    // [security] Public key for `kid`. Missing and compromised keys are both `UnknownKey`.
    pub async fn verification_key(&self, kid: &str) -> AuthResult<SigningKey> {
        match self.store.signing_key(kid).await? {
            Some(key) if key.status != KeyStatus::Compromised => Ok(key),
            Some(_) => {
                warn!(kid, "token presented with a compromised signing key");
                Err(AuthError::UnknownKey(kid.to_string()))
            }
            None => Err(AuthError::UnknownKey(kid.to_string())),
        }
    }

    // [security] Active and retired keys; compromised keys never appear.
    pub async fn jwks(&self) -> AuthResult<JwksResponse> {
        let keys = self
            .store
            .verification_keys()
            .await?
            .into_iter()
            .filter(|k| k.status != KeyStatus::Compromised)
            .map(|k| public_jwk(&k))
            .collect();
        Ok(JwksResponse { keys })
    }

    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.invalidate_all();
    }

    // [security] Inserts `new_key` as active and retires the previous active key.
    pub async fn rotate(&self, mut new_key: SigningKey) -> AuthResult<()> {
        let previous = self.store.active_signing_key().await?;

        new_key.status = KeyStatus::Active;
        new_key.activated_at.get_or_insert_with(OffsetDateTime::now_utc);
        self.store.insert_signing_key(&new_key).await?;

        if let Some(previous) = previous.filter(|p| p.kid != new_key.kid) {
            self.store
                .set_signing_key_status(&previous.kid, KeyStatus::Retired)
                .await?;
            info!(retired = %previous.kid, active = %new_key.kid, "signing key rotated");
        } else {
            info!(active = %new_key.kid, "signing key activated");
        }

        self.invalidate();
        Ok(())
    }

    // [security] Marks a key compromised; it disappears from JWKS and verification.
    pub async fn mark_compromised(&self, kid: &str) -> AuthResult<bool> {
        let updated = self
            .store
            .set_signing_key_status(kid, KeyStatus::Compromised)
            .await?;
        self.invalidate();
        if updated {
            warn!(kid, "signing key marked compromised");
        }
        Ok(updated)
    }
}

// JWK with kid/alg/use filled in even when the stored JWK lacks them
fn public_jwk(key: &SigningKey) -> serde_json::Value {
    let mut jwk = key.public_jwk.clone();
    if let Some(map) = jwk.as_object_mut() {
        map.remove("d");
        map.insert("kid".into(), key.kid.clone().into());
        map.insert("alg".into(), key.algorithm.clone().into());
        map.insert("use".into(), key.key_use.clone().into());
        map.entry("kty").or_insert_with(|| key.key_type.clone().into());
    }
    jwk
}
