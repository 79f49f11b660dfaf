use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

// [security] Fixed key for `constant_time_eq`; equality does not depend on it being secret.
const EQ_KEY: &[u8] = b"campus-idp/constant-time-eq";

// [security] Peppered, deterministic hashes for values that must be indexable but
// never stored in the clear (refresh tokens, subjects in the ledger).
pub struct TokenHasher {
    pepper: Secret<Vec<u8>>,
}

impl TokenHasher {
    pub fn new(pepper: &[u8]) -> Self {
        Self {
            pepper: Secret::new(pepper.to_vec()),
        }
    }

    pub fn hash_token(&self, token: &str) -> String {
        self.digest(b"refresh_token:", token)
    }

    pub fn hash_subject(&self, subject: &str) -> String {
        self.digest(b"subject:", subject)
    }

    fn digest(&self, domain: &[u8], value: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.pepper.expose_secret())
            .expect("HMAC can take key of any size");
        mac.update(domain);
        mac.update(value.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for TokenHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenHasher").finish_non_exhaustive()
    }
}

// [security] Constant-time byte comparison, routed through HMAC tag verification.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut expected = HmacSha256::new_from_slice(EQ_KEY).expect("HMAC can take key of any size");
    expected.update(a);
    let tag = expected.finalize().into_bytes();

    let mut actual = HmacSha256::new_from_slice(EQ_KEY).expect("HMAC can take key of any size");
    actual.update(b);
    actual.verify_slice(&tag).is_ok()
}
