// [library] Argon2 - memory-hard password hashing algorithm
// Argon2id variant provides both memory-hard and compute-hard properties
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString}, // [security] Password hashing traits and secure randomness
    Argon2, // [security] Argon2 algorithm implementation
};

// [library] Structured error types with automatic Display and Error trait derivation
use thiserror::Error;

use super::hashing::constant_time_eq;

// [rust] Custom error type for password operations with structured error handling
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Password hashing failed: {0}")] // [rust] Error message template with placeholder
    HashError(argon2::password_hash::Error), // [rust] Manual error wrapping
}

// [rust] Manual implementation of From trait for error conversion
impl From<argon2::password_hash::Error> for PasswordError {
    fn from(err: argon2::password_hash::Error) -> Self {
        PasswordError::HashError(err)
    }
}

// [security] Hash password using Argon2id with cryptographically secure salt
// Result is a PHC string: `$argon2id$v=19$m=..,t=..,p=..$<salt>$<digest>`
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    // [security] Generate cryptographically secure random salt using OS entropy
    let salt = SaltString::generate(&mut OsRng); // [security] Each password gets unique salt

    // [security] Use Argon2id with default parameters (memory cost, time cost, parallelism)
    let argon2 = Argon2::default();

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)? // [rust] Convert string to bytes, propagate errors
        .to_string(); // [library] Convert to PHC string format

    Ok(password_hash)
}

// [business] Rows imported from the previous system store the password as-is.
// Only argon2 PHC strings are hashes; everything else, `$`-prefixed or not, is a legacy row and forces a reset.
const ARGON2_PREFIX: &str = "$argon2";

pub fn is_legacy_hash(stored: &str) -> bool {
    !stored.starts_with(ARGON2_PREFIX)
}

// [security] Verify password against stored hash using constant-time comparison
// Legacy plaintext rows are compared in constant time too; an empty legacy row never matches.
pub fn verify_password(password: &str, stored: &str) -> Result<bool, PasswordError> {
    if is_legacy_hash(stored) {
        if stored.is_empty() {
            return Ok(false);
        }
        return Ok(constant_time_eq(password.as_bytes(), stored.as_bytes()));
    }

    // [security] Parse PHC string format to extract algorithm parameters, salt, and hash
    let parsed_hash = PasswordHash::new(stored)?;

    let argon2 = Argon2::default();

    // [security] Perform constant-time password verification
    match argon2.verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true), // [security] Password matches - verification successful
        Err(argon2::password_hash::Error::Password) => Ok(false), // [security] Password mismatch - expected error
        Err(e) => Err(PasswordError::HashError(e)), // [rust] Unexpected error - propagate up
    }
}

// [rust] Unit tests for password security functions
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_and_verify() {
        let password = "test_password_123";
        let hash = hash_password(password).expect("Failed to hash password");

        assert!(verify_password(password, &hash).expect("Failed to verify password"));
        assert!(!verify_password("test_password_123x", &hash).expect("Failed to verify"));
        assert!(!verify_password("wrong_password", &hash).expect("Failed to verify"));
    }

    #[test]
    fn test_different_hashes_for_same_password() {
        let password = "same_password";
        let hash1 = hash_password(password).expect("Failed to hash password");
        let hash2 = hash_password(password).expect("Failed to hash password");

        // Different salts should produce different hashes
        assert_ne!(hash1, hash2);

        assert!(verify_password(password, &hash1).expect("Failed to verify password"));
        assert!(verify_password(password, &hash2).expect("Failed to verify password"));
    }

    #[test]
    fn test_password_security_edge_cases() {
        let empty_hash = hash_password("").expect("Should handle empty password");
        assert!(verify_password("", &empty_hash).unwrap());
        assert!(!verify_password("not_empty", &empty_hash).unwrap());

        let unicode_password = "пароль🔒密码";
        let unicode_hash = hash_password(unicode_password).expect("Failed to hash unicode");
        assert!(verify_password(unicode_password, &unicode_hash).unwrap());
        assert!(!verify_password("password", &unicode_hash).unwrap());

        let whitespace_password = "  password with spaces  ";
        let whitespace_hash =
            hash_password(whitespace_password).expect("Failed to hash whitespace");
        assert!(verify_password(whitespace_password, &whitespace_hash).unwrap());
        assert!(!verify_password("password with spaces", &whitespace_hash).unwrap());
    }

    #[test]
    fn test_password_verification_attacks() {
        let password = "correct_password";
        let hash = hash_password(password).expect("Failed to hash password");

        let attack_vectors = vec![
            "",
            "\0",
            "correct_password\0",
            "correct_password\n",
            "CORRECT_PASSWORD",
            "correct_password ",
            " correct_password",
            "correct_passwörd",
        ];

        for attack in attack_vectors {
            assert!(
                !verify_password(attack, &hash).unwrap(),
                "Attack vector should fail: {:?}",
                attack
            );
        }
    }

    #[test]
    fn test_legacy_plaintext_rows() {
        // [business] Imported rows without the `$algorithm$` prefix
        assert!(is_legacy_hash("hunter2"));
        assert!(is_legacy_hash(""));
        assert!(!is_legacy_hash(&hash_password("x").unwrap()));

        assert!(verify_password("hunter2", "hunter2").unwrap());
        assert!(!verify_password("hunter3", "hunter2").unwrap());
        assert!(!verify_password("", "").unwrap(), "Empty legacy row must never match");
    }

    #[test]
    fn test_dollar_prefixed_legacy_rows() {
        // [business] A plaintext password may itself start with `$`
        for stored in ["$ecret-legacy", "$2b$10$not-a-bcrypt-we-know", "$"] {
            assert!(is_legacy_hash(stored), "{:?} should be legacy", stored);
        }
        assert!(verify_password("$ecret-legacy", "$ecret-legacy").unwrap());
        assert!(!verify_password("secret-legacy", "$ecret-legacy").unwrap());
    }

    #[test]
    fn test_hash_format_validation() {
        let valid_hash = hash_password("test_password").expect("Failed to hash password");
        assert!(
            valid_hash.starts_with("$argon2id$"),
            "Hash should use Argon2id: {}",
            valid_hash
        );

        // Malformed PHC strings are errors, not mismatches
        let invalid_hashes = vec![
            "$argon2$invalid$format",
            "$argon2id$",
            "$argon2id$v=19$m=4096$t=3$p=1$",
        ];

        for invalid_hash in invalid_hashes {
            assert!(
                verify_password("test_password", invalid_hash).is_err(),
                "Should reject invalid hash format: {}",
                invalid_hash
            );
        }
    }
}
