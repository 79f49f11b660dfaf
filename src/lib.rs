//! Campus identity provider: OpenID Connect authorization server core.
//!
//! The crate is layered leaves-first:
//!
//! - [`security`]: password KDF, envelope encryption, JWT signing, PKCE, token hashing
//! - [`ephemeral`]: TTL key-value store and the single-use ticket/code issuer built on it
//! - [`db`]: durable entities and the store traits (Postgres and in-memory)
//! - [`oauth`]: key manager, refresh-token ledger and the OIDC service, plus HTTP handlers
//! - [`auth`]: the interactive login state machine (password, MFA, session issuance)
//! - [`web`]: axum router and login endpoints

pub mod auth;
pub mod config;
pub mod db;
pub mod ephemeral;
pub mod error;
pub mod keygen;
pub mod oauth;
pub mod security;
pub mod web;

pub use config::Config;
pub use error::{AuthError, AuthResult};
