//! # Credo (credential issuance)
//!
//! `credo` authenticates users and hands out a pair of tokens: a short-lived
//! HS512 access token and a long-lived, single-use refresh token.
//!
//! ## Token lifecycle
//!
//! - **Pairing:** both tokens of a pair carry the same `jti`. The refresh token is
//!   only accepted together with its own access token.
//! - **Rotation:** redeeming a refresh token revokes its record and issues a fresh
//!   pair. A redeemed token can never be used again.
//! - **Single session:** every user has at most one active refresh record. A new
//!   login revokes whatever was active before.
//! - **IP change:** refreshing from an address other than the one recorded in the
//!   access token still succeeds, but the account owner gets a notification.
//!
//! Refresh tokens are never stored in plain form; the store keeps an Argon2 hash.

pub mod api;
pub mod cli;
pub mod hasher;
pub mod notify;
pub mod session;
pub mod store;
pub mod token;
pub mod validation;
pub mod vault;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
