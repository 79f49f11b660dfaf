// [business] Short-lived, single-use records: tickets, authorization codes, OTP
// challenges and login attempts.

pub mod issuer;
pub mod store;

pub use issuer::{IdStrategy, SecondaryIndex, TicketIssuer};
pub use store::{EphemeralStore, MemoryEphemeralStore, PgEphemeralStore};
