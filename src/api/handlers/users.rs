use super::{
    authenticate, bad_request,
    types::{ErrorBody, UpdateUserRequest, UserResponse},
    ApiError, ApiState,
};
use crate::session::UserUpdate;
use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

#[utoipa::path(
    get,
    path = "/v1/users",
    params(("Authorization" = String, Header, description = "Bearer access token")),
    responses(
        (status = 200, description = "All users", body = [UserResponse]),
        (status = 403, description = "Missing or invalid access token", body = ErrorBody),
    ),
    tag = "users"
)]
#[instrument(skip(state, headers))]
pub async fn list_users(
    state: Extension<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    authenticate(&state, &headers).await?;
    let users = state.sessions().list_users().await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/v1/users/{id}",
    params(
        ("id" = Uuid, Path, description = "User id"),
        ("Authorization" = String, Header, description = "Bearer access token"),
    ),
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 403, description = "Missing or invalid access token", body = ErrorBody),
        (status = 404, description = "No such user", body = ErrorBody),
    ),
    tag = "users"
)]
#[instrument(skip(state, headers))]
pub async fn get_user(
    state: Extension<Arc<ApiState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<UserResponse>, ApiError> {
    authenticate(&state, &headers).await?;
    let user = state.sessions().get_user(id).await?;
    Ok(Json(user.into()))
}

#[utoipa::path(
    patch,
    path = "/v1/users/{id}",
    request_body = UpdateUserRequest,
    params(
        ("id" = Uuid, Path, description = "User id, must be the caller"),
        ("Authorization" = String, Header, description = "Bearer access token"),
    ),
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 403, description = "Not the caller's account", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody),
        (status = 422, description = "Invalid email or password", body = ErrorBody),
    ),
    tag = "users"
)]
#[instrument(skip(state, headers, payload))]
pub async fn update_user(
    state: Extension<Arc<ApiState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return bad_request(&rejection),
    };

    let result = async {
        let principal = authenticate(&state, &headers).await?;
        let update = UserUpdate {
            email: request.email,
            password: request.password,
        };
        let user = state.sessions().update_user(&principal, id, update).await?;
        Ok::<_, ApiError>(Json(UserResponse::from(user)))
    }
    .await;

    match result {
        Ok(body) => body.into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/users/{id}",
    params(
        ("id" = Uuid, Path, description = "User id, must be the caller"),
        ("Authorization" = String, Header, description = "Bearer access token"),
    ),
    responses(
        (status = 204, description = "User and sessions deleted"),
        (status = 403, description = "Not the caller's account", body = ErrorBody),
        (status = 404, description = "No such user", body = ErrorBody),
    ),
    tag = "users"
)]
#[instrument(skip(state, headers))]
pub async fn delete_user(
    state: Extension<Arc<ApiState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let principal = authenticate(&state, &headers).await?;
    state.sessions().delete_user(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
