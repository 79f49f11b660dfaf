pub mod login;
pub mod routes;

pub use login::*;
pub use routes::*;
