//! Authentication endpoints: every successful call answers with a fresh [`TokenPair`].

use super::{
    bad_request, bearer_token,
    types::{ErrorBody, LoginRequest, RefreshRequest, RegisterRequest, UserResponse},
    ApiError, ApiState, ClientIp,
};
use crate::session::{DenyReason, SessionError, TokenPair};
use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created and first session opened", body = TokenPair),
        (status = 400, description = "Malformed request body", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody),
        (status = 422, description = "Invalid email or password", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip(state, payload))]
pub async fn register(
    state: Extension<Arc<ApiState>>,
    client_ip: ClientIp,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return bad_request(&rejection),
    };

    match state
        .sessions()
        .register(&request.email, &request.password, client_ip.0)
        .await
    {
        Ok(pair) => (StatusCode::CREATED, Json(pair)).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session opened", body = TokenPair),
        (status = 400, description = "Malformed request body", body = ErrorBody),
        (status = 403, description = "Invalid credentials", body = ErrorBody),
        (status = 422, description = "Missing email or password", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip(state, payload))]
pub async fn login(
    state: Extension<Arc<ApiState>>,
    client_ip: ClientIp,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return bad_request(&rejection),
    };

    match state
        .sessions()
        .login(&request.email, &request.password, client_ip.0)
        .await
    {
        Ok(pair) => Json(pair).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/users/{id}/login",
    params(
        ("id" = Uuid, Path, description = "User id"),
        ("X-Service-Token" = String, Header, description = "Trusted identity token"),
    ),
    responses(
        (status = 200, description = "Session opened", body = TokenPair),
        (status = 403, description = "Caller is not trusted or user unknown", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip(state, headers))]
pub async fn login_by_identity(
    state: Extension<Arc<ApiState>>,
    client_ip: ClientIp,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    if !state.is_trusted_caller(&headers) {
        warn!(user_id = %id, "identity login without a valid service token");
        return ApiError(SessionError::Denied(DenyReason::NotOwner)).into_response();
    }

    match state.sessions().login_by_identity(id, client_ip.0).await {
        Ok(pair) => Json(pair).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Pair rotated", body = TokenPair),
        (status = 400, description = "Malformed request body", body = ErrorBody),
        (status = 403, description = "Pair rejected; log in again", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip(state, payload))]
pub async fn refresh(
    state: Extension<Arc<ApiState>>,
    client_ip: ClientIp,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return bad_request(&rejection),
    };

    match state
        .sessions()
        .refresh(&request.access_token, &request.refresh_token, client_ip.0)
        .await
    {
        Ok(pair) => Json(pair).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    params(("Authorization" = String, Header, description = "Bearer access token")),
    responses(
        (status = 204, description = "All sessions revoked"),
        (status = 403, description = "Missing or invalid access token", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip(state, headers))]
pub async fn logout(
    state: Extension<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let principal = state.sessions().identify(bearer_token(&headers)?)?;
    state.sessions().logout(&principal).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/auth/me",
    params(("Authorization" = String, Header, description = "Bearer access token")),
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 403, description = "Missing or invalid access token", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip(state, headers))]
pub async fn me(
    state: Extension<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.sessions().current_user(bearer_token(&headers)?).await?;
    Ok(Json(user.into()))
}
