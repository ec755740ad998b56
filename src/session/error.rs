use crate::validation::FieldError;
use thiserror::Error;

/// Why a request was denied. Only ever logged; callers see one uniform answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DenyReason {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("access token rejected")]
    InvalidAccessToken,
    #[error("refresh token rejected")]
    InvalidRefreshToken,
    #[error("session is no longer active")]
    SessionRevoked,
    #[error("user no longer exists")]
    UnknownUser,
    #[error("refresh token does not match stored hash")]
    SecretMismatch,
    #[error("token pair mismatch")]
    PairMismatch,
    #[error("session was rotated concurrently")]
    SessionRaced,
    #[error("caller does not own the resource")]
    NotOwner,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("authentication denied: {0}")]
    Denied(DenyReason),
    #[error("email already registered")]
    Conflict,
    #[error("user not found")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SessionError {
    /// Denial reason, if this is a denial.
    #[must_use]
    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Self::Denied(reason) => Some(*reason),
            _ => None,
        }
    }
}
