//! Credential store contract and its implementations.
//!
//! The store owns the "one active refresh record per user" invariant. Postgres
//! enforces it with a partial unique index, [`MemoryStore`] checks it under a lock.
//! Either way a second active record surfaces as
//! [`StoreError::ActiveSessionConflict`] instead of being silently accepted.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
}

/// Server-side half of a token pair. `id` equals the pair's `jti`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub hashed_secret: String,
    pub user_id: Uuid,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("email already registered")]
    DuplicateEmail,
    #[error("user already has an active refresh token")]
    ActiveSessionConflict,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Cheap liveness check used by the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn get_user(&self, id: Uuid) -> Result<User, StoreError>;

    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    async fn create_user(&self, user: &User) -> Result<(), StoreError>;

    async fn update_user(&self, user: &User) -> Result<(), StoreError>;

    /// Deletes the user and, by cascade, every refresh record it owns.
    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError>;

    /// Insert `record` as active.
    async fn add_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError>;

    /// Mark every record of `user_id` inactive and return how many were active.
    async fn revoke_refresh_tokens_by_user(&self, user_id: Uuid) -> Result<u64, StoreError>;

    /// Flip a single record from active to inactive. Returns `false` when the
    /// record was already inactive or missing, so only one caller ever wins.
    async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn get_active_refresh_token(&self, id: Uuid) -> Result<RefreshTokenRecord, StoreError>;

    async fn get_active_refresh_token_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<RefreshTokenRecord, StoreError>;
}
