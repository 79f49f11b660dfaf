// [rust] Security module organization - cryptographic and security utilities
pub mod envelope; // [security] AES-256-GCM envelope encryption of private key material
pub mod hashing; // [security] Peppered HMAC hashes for refresh tokens and subjects
pub mod jwt; // [security] JSON Web Token signing, verification, and claims management
pub mod password; // [security] Argon2id password hashing and verification
pub mod pkce; // [security] Proof Key for Code Exchange (RFC 7636) implementation

// [rust] Re-export the items most call sites need
pub use envelope::{decrypt_private_key, encrypt_private_key, EnvelopeError, Kek};
pub use hashing::{constant_time_eq, TokenHasher};
pub use jwt::*;
pub use password::PasswordError;
pub use pkce::PkceError;
