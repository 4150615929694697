//! Orchestration between HTTP handlers and `warden_core` components.

pub mod auth;
pub mod oauth;
pub mod otp;
pub mod password;
pub mod profile;
pub mod validate;
pub mod webauthn;
