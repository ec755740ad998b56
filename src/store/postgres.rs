use super::{CredentialStore, RefreshTokenRecord, StoreError, User};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{info_span, Instrument, Span};
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../sql/schema.sql");

const EMAIL_UNIQUE_CONSTRAINT: &str = "users_email_unique";
const SINGLE_ACTIVE_INDEX: &str = "refresh_tokens_single_active";

/// Postgres backed [`CredentialStore`].
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist yet.
    ///
    /// # Errors
    /// Returns an error if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .instrument(db_span("DDL", "sql/schema.sql"))
            .await
            .context("failed to apply schema")?;
        Ok(())
    }
}

fn db_span(operation: &'static str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

pub(super) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn violated_constraint(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    }
}

/// Translate unique violations into the domain errors callers can act on.
fn classify(err: sqlx::Error, context: &'static str) -> StoreError {
    if is_unique_violation(&err) {
        match violated_constraint(&err) {
            Some(EMAIL_UNIQUE_CONSTRAINT) => return StoreError::DuplicateEmail,
            Some(SINGLE_ACTIVE_INDEX) => return StoreError::ActiveSessionConflict,
            _ => {}
        }
    }
    StoreError::Backend(anyhow::Error::new(err).context(context))
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
    }
}

fn refresh_token_from_row(row: &PgRow) -> RefreshTokenRecord {
    RefreshTokenRecord {
        id: row.get("id"),
        hashed_secret: row.get("hashed_secret"),
        user_id: row.get("user_id"),
        active: row.get("active"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let query = "SELECT 1";
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to ping database")?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<User, StoreError> {
        let query = "SELECT id, email, password_hash FROM users WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to fetch user")?;
        row.as_ref().map(user_from_row).ok_or(StoreError::NotFound)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        let query = "SELECT id, email, password_hash FROM users WHERE email = $1";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to fetch user by email")?;
        row.as_ref().map(user_from_row).ok_or(StoreError::NotFound)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let query = "SELECT id, email, password_hash FROM users ORDER BY email";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list users")?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        let query = "INSERT INTO users (id, email, password_hash) VALUES ($1, $2, $3)";
        sqlx::query(query)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.password_hash)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .map_err(|err| classify(err, "failed to insert user"))?;
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        let query = "UPDATE users SET email = $2, password_hash = $3 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.password_hash)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .map_err(|err| classify(err, "failed to update user"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        let query = "DELETE FROM users WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete user")?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn add_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO refresh_tokens (id, hashed_secret, user_id, active, created_at)
            VALUES ($1, $2, $3, TRUE, $4)
        ";
        sqlx::query(query)
            .bind(record.id)
            .bind(&record.hashed_secret)
            .bind(record.user_id)
            .bind(record.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .map_err(|err| classify(err, "failed to insert refresh token"))?;
        Ok(())
    }

    async fn revoke_refresh_tokens_by_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let query = "UPDATE refresh_tokens SET active = FALSE WHERE user_id = $1 AND active";
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to revoke refresh tokens")?;
        Ok(result.rows_affected())
    }

    async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, StoreError> {
        let query = "UPDATE refresh_tokens SET active = FALSE WHERE id = $1 AND active";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to revoke refresh token")?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_active_refresh_token(&self, id: Uuid) -> Result<RefreshTokenRecord, StoreError> {
        let query = r"
            SELECT id, hashed_secret, user_id, active, created_at
            FROM refresh_tokens
            WHERE id = $1 AND active
        ";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to fetch refresh token")?;
        row.as_ref()
            .map(refresh_token_from_row)
            .ok_or(StoreError::NotFound)
    }

    async fn get_active_refresh_token_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let query = r"
            SELECT id, hashed_secret, user_id, active, created_at
            FROM refresh_tokens
            WHERE user_id = $1 AND active
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to fetch refresh token by user")?;
        row.as_ref()
            .map(refresh_token_from_row)
            .ok_or(StoreError::NotFound)
    }
}
