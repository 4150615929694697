//! # warden_core
//!
//! Identity verification and session/token lifecycle for Warden.
//!
//! Everything here is transport-agnostic: the HTTP surface lives in
//! `warden_api`, which wires these components to axum handlers.

pub mod audit;
pub mod auth;
pub mod migrate;
pub mod models;
pub mod store;
pub mod transport;
pub mod uuid;
pub mod webauthn;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
