//! Token codec.
//!
//! Access tokens are compact HS512 JWTs carrying [`AccessTokenClaims`]. Refresh
//! tokens are opaque base64 strings carrying the paired `jti` and, optionally, the
//! caller IP at issue time. The codec never persists anything.

mod access;
mod refresh;

pub use access::{AccessTokenClaims, TokenCodec, ACCESS_TOKEN_ALG, MIN_KEY_LEN};
pub use refresh::{issue_refresh_token, parse_refresh_token, RefreshTokenPayload};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid claims")]
    InvalidClaims(#[source] serde_json::Error),
    #[error("failed to encode token")]
    Encode(#[from] serde_json::Error),
    #[error("signing key must be at least {MIN_KEY_LEN} bytes")]
    KeyTooShort,
    #[error("signing key is not valid base64")]
    KeyEncoding,
}
