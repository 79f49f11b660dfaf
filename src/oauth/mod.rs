// [business] Protocol core and its HTTP handlers
pub mod keys; // Active signing key selection, decryption and JWKS
pub mod ledger; // Refresh-token rotation with reuse detection
pub mod service; // Authorization, code, token, userinfo, revocation and logout operations

// [business] One handler module per endpoint
pub mod authorize;
pub mod discovery;
pub mod jwks;
pub mod logout;
pub mod revoke;
pub mod token;
pub mod userinfo;

pub use authorize::*;
pub use discovery::*;
pub use jwks::*;
pub use keys::{ActiveKey, KeyManager};
pub use ledger::{RefreshTokenLedger, Rotation};
pub use logout::*;
pub use revoke::*;
pub use service::{AuthorizeParams, OidcService, OidcStores, TokenRequest};
pub use token::*;
pub use userinfo::*;
