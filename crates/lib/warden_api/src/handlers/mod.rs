//! Request handlers.

pub mod auth;
pub mod oauth;
pub mod otp;
pub mod password;
pub mod users;
pub mod webauthn;
