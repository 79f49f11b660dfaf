// [library] Base64url without padding - the S256 challenge encoding of RFC 7636
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

// [library] SHA-256 digest behind the S256 transform
use sha2::{Digest, Sha256};

use thiserror::Error;

use super::hashing::constant_time_eq;

// [security] The only transform accepted at the authorize and token endpoints
pub const S256: &str = "S256";

// [security] RFC 7636 section 4.1 verifier length bounds
const VERIFIER_LEN: std::ops::RangeInclusive<usize> = 43..=128;

// [security] base64url of a 32-byte SHA-256 digest, unpadded
const S256_CHALLENGE_LEN: usize = 43;

#[derive(Debug, Error)]
pub enum PkceError {
    #[error("code_verifier must be 43 to 128 characters, got {0}")]
    VerifierLength(usize),
    #[error("code_verifier may only contain A-Z a-z 0-9 - . _ ~")]
    VerifierCharset,
    #[error("code_challenge is not a base64url SHA-256 digest")]
    MalformedChallenge,
    #[error("code_challenge_method '{0}' is not supported, use S256")]
    UnsupportedMethod(String),
    #[error("code_verifier does not match the code_challenge")]
    VerificationFailed,
}

/// `base64url(SHA256(verifier))` with no input checks.
pub fn pkce_challenge(code_verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

pub fn validate_challenge_method(method: &str) -> Result<(), PkceError> {
    match method {
        S256 => Ok(()),
        other => Err(PkceError::UnsupportedMethod(other.to_string())),
    }
}

// [security] Rejected at authorization time so a bad challenge never reaches a code
pub fn validate_code_challenge(code_challenge: &str) -> Result<(), PkceError> {
    if code_challenge.len() != S256_CHALLENGE_LEN {
        return Err(PkceError::MalformedChallenge);
    }
    match URL_SAFE_NO_PAD.decode(code_challenge) {
        Ok(digest) if digest.len() == 32 => Ok(()),
        _ => Err(PkceError::MalformedChallenge),
    }
}

pub fn validate_code_verifier(code_verifier: &str) -> Result<(), PkceError> {
    if !VERIFIER_LEN.contains(&code_verifier.len()) {
        return Err(PkceError::VerifierLength(code_verifier.len()));
    }
    let unreserved = |b: u8| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~');
    if !code_verifier.bytes().all(unreserved) {
        return Err(PkceError::VerifierCharset);
    }
    Ok(())
}

/// Token-endpoint check of a presented verifier against the stored challenge.
///
/// Shape errors are reported as such; only a well-formed verifier that hashes
/// to something else yields [`PkceError::VerificationFailed`].
pub fn verify_code_challenge(
    code_verifier: &str,
    code_challenge: &str,
    code_challenge_method: &str,
) -> Result<(), PkceError> {
    validate_challenge_method(code_challenge_method)?;
    validate_code_verifier(code_verifier)?;
    validate_code_challenge(code_challenge)?;

    let computed = pkce_challenge(code_verifier);
    if constant_time_eq(computed.as_bytes(), code_challenge.as_bytes()) {
        Ok(())
    } else {
        Err(PkceError::VerificationFailed)
    }
}
