// [security] AES-256-GCM envelope encryption for signing-key private material at rest.
//
// Blob layout: `iv (12 bytes) || tag (16 bytes) || ciphertext`.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    AeadCore, Aes256Gcm, Key, Nonce,
};
use hkdf::Hkdf;
use secrecy::{ExposeSecret, Secret, SecretString};
use sha2::Sha256;
use thiserror::Error;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

const KEK_SALT: &[u8] = b"campus-idp/kek/v1";
const KEK_INFO: &[u8] = b"signing-key-envelope";

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope too short: {0} bytes")]
    TooShort(usize),
    #[error("encryption failed")]
    Encrypt,
    // [security] Wrong KEK or tampered blob (authentication tag mismatch).
    #[error("decryption failed: authentication tag mismatch")]
    Decrypt,
    #[error("decrypted key material is not valid UTF-8")]
    NotUtf8,
}

// [security] Key-encryption key derived from the server-held secret.
pub struct Kek(Secret<[u8; 32]>);

impl Kek {
    // [security] HKDF-SHA256 over the configured secret.
    pub fn derive(secret: &str) -> Self {
        let hk = Hkdf::<Sha256>::new(Some(KEK_SALT), secret.as_bytes());
        let mut okm = [0u8; 32];
        hk.expand(KEK_INFO, &mut okm)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        Self(Secret::new(okm))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.0.expose_secret()))
    }
}

impl std::fmt::Debug for Kek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Kek([REDACTED])")
    }
}

pub fn encrypt_private_key(pem: &str, kek: &Kek) -> Result<Vec<u8>, EnvelopeError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    // aes-gcm appends the tag to the ciphertext
    let sealed = kek
        .cipher()
        .encrypt(&nonce, pem.as_bytes())
        .map_err(|_| EnvelopeError::Encrypt)?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    let mut blob = Vec::with_capacity(IV_LEN + TAG_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(tag);
    blob.extend_from_slice(ciphertext);
    Ok(blob)
}

pub fn decrypt_private_key(blob: &[u8], kek: &Kek) -> Result<SecretString, EnvelopeError> {
    if blob.len() < IV_LEN + TAG_LEN {
        return Err(EnvelopeError::TooShort(blob.len()));
    }

    let (iv, rest) = blob.split_at(IV_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);

    let plaintext = kek
        .cipher()
        .decrypt(Nonce::from_slice(iv), sealed.as_slice())
        .map_err(|_| EnvelopeError::Decrypt)?;

    String::from_utf8(plaintext)
        .map(SecretString::new)
        .map_err(|_| EnvelopeError::NotUtf8)
}
