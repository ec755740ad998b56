//! HTTP handlers and the pieces they share: state, caller identity, error mapping.

pub mod auth;
pub mod health;
pub mod types;
pub mod users;

use crate::session::{DenyReason, Principal, SessionError, SessionService};
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use secrecy::{ExposeSecret, SecretString};
use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use subtle::ConstantTimeEq;
use tracing::{debug, error};
use types::ErrorBody;

pub const SERVICE_TOKEN_HEADER: &str = "x-service-token";

/// Shared handler state, injected as an `Extension`.
pub struct ApiState {
    sessions: Arc<SessionService>,
    trusted_identity_token: Option<SecretString>,
}

impl ApiState {
    #[must_use]
    pub fn new(sessions: Arc<SessionService>) -> Self {
        Self {
            sessions,
            trusted_identity_token: None,
        }
    }

    /// Token a trusted service must present to log users in by id.
    #[must_use]
    pub fn with_trusted_identity_token(mut self, token: Option<SecretString>) -> Self {
        self.trusted_identity_token = token.filter(|t| !t.expose_secret().is_empty());
        self
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }

    /// Constant-time check of the service token header. Always false when unset.
    pub(crate) fn is_trusted_caller(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.trusted_identity_token else {
            return false;
        };
        let Some(presented) = headers
            .get(SERVICE_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
        else {
            return false;
        };
        presented
            .as_bytes()
            .ct_eq(expected.expose_secret().as_bytes())
            .into()
    }
}

/// Caller address from proxy headers, falling back to the peer socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientIp(pub Option<IpAddr>);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_headers = extract_client_ip(&parts.headers).and_then(|ip| ip.parse().ok());
        let ip = from_headers.or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        });
        Ok(Self(ip))
    }
}

/// First hop of `X-Forwarded-For`, then `X-Real-IP`.
pub(crate) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Resolve the bearer token into a live principal.
pub(crate) async fn authenticate(
    state: &ApiState,
    headers: &HeaderMap,
) -> Result<Principal, ApiError> {
    let token = bearer_token(headers)?;
    Ok(state.sessions().authenticate(token).await?)
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    extract_bearer_token(headers)
        .ok_or(ApiError(SessionError::Denied(DenyReason::InvalidAccessToken)))
}

/// Wraps domain errors so they can be returned from handlers.
#[derive(Debug)]
pub struct ApiError(pub SessionError);

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self.0 {
            SessionError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody::new(StatusCode::UNPROCESSABLE_ENTITY, "Validation failed")
                    .with_errors(errors),
            ),
            SessionError::Denied(reason) => {
                debug!(reason = %reason, "responding forbidden");
                (
                    StatusCode::FORBIDDEN,
                    ErrorBody::new(StatusCode::FORBIDDEN, "Forbidden"),
                )
            }
            SessionError::Conflict => (
                StatusCode::CONFLICT,
                ErrorBody::new(StatusCode::CONFLICT, "User with this email already exists"),
            ),
            SessionError::NotFound => (
                StatusCode::NOT_FOUND,
                ErrorBody::new(StatusCode::NOT_FOUND, "User not found"),
            ),
            SessionError::Internal(err) => {
                error!("internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "An unexpected error occurred.",
                    ),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

/// Malformed JSON is a client error, not a validation failure of a field.
pub(crate) fn bad_request(rejection: &JsonRejection) -> Response {
    debug!("rejected request body: {}", rejection.body_text());
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody::new(StatusCode::BAD_REQUEST, "Invalid request body")),
    )
        .into_response()
}
