//! Interactive authentication: password, forced reset, SMS second factor and
//! internal session tokens.

pub mod flow;
pub mod sms;

pub use flow::{
    session_cookies, AuthenticationFlow, LoginStep, NextStep, SessionTokens, REFRESH_COOKIE,
    SESSION_COOKIE,
};
pub use sms::{LogSmsSender, RecordingSmsSender, SmsSender};
