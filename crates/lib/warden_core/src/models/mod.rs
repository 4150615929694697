//! Domain models shared across the Warden crates.

pub mod audit;
pub mod auth;
pub mod profile;
pub mod webauthn;
