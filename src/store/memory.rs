use super::{CredentialStore, RefreshTokenRecord, StoreError, User};
use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    refresh_tokens: HashMap<Uuid, RefreshTokenRecord>,
}

/// In-process [`CredentialStore`] with the same invariants as the Postgres schema.
/// Used by tests and for running without a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active refresh records owned by `user_id`.
    pub async fn active_count(&self, user_id: Uuid) -> usize {
        let inner = self.inner.lock().await;
        inner
            .refresh_tokens
            .values()
            .filter(|record| record.user_id == user_id && record.active)
            .count()
    }

    /// Total refresh records, active or not.
    pub async fn refresh_token_count(&self) -> usize {
        self.inner.lock().await.refresh_tokens.len()
    }
}

impl Inner {
    fn email_taken(&self, email: &str, except: Option<Uuid>) -> bool {
        self.users
            .values()
            .any(|user| user.email == email && Some(user.id) != except)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<User, StoreError> {
        let inner = self.inner.lock().await;
        inner.users.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .users
            .values()
            .find(|user| user.email == email)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let inner = self.inner.lock().await;
        let mut users: Vec<User> = inner.users.values().cloned().collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.email_taken(&user.email, None) {
            return Err(StoreError::DuplicateEmail);
        }
        if inner.users.contains_key(&user.id) {
            return Err(StoreError::Backend(anyhow!("duplicate user id {}", user.id)));
        }
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.users.contains_key(&user.id) {
            return Err(StoreError::NotFound);
        }
        if inner.email_taken(&user.email, Some(user.id)) {
            return Err(StoreError::DuplicateEmail);
        }
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.users.remove(&id).is_none() {
            return Err(StoreError::NotFound);
        }
        inner.refresh_tokens.retain(|_, record| record.user_id != id);
        Ok(())
    }

    async fn add_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.users.contains_key(&record.user_id) {
            return Err(StoreError::Backend(anyhow!(
                "refresh token references unknown user {}",
                record.user_id
            )));
        }
        if inner.refresh_tokens.contains_key(&record.id) {
            return Err(StoreError::Backend(anyhow!(
                "duplicate refresh token id {}",
                record.id
            )));
        }
        let conflict = inner
            .refresh_tokens
            .values()
            .any(|existing| existing.user_id == record.user_id && existing.active);
        if conflict {
            return Err(StoreError::ActiveSessionConflict);
        }
        let mut record = record.clone();
        record.active = true;
        inner.refresh_tokens.insert(record.id, record);
        Ok(())
    }

    async fn revoke_refresh_tokens_by_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let mut revoked = 0;
        for record in inner.refresh_tokens.values_mut() {
            if record.user_id == user_id && record.active {
                record.active = false;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.refresh_tokens.get_mut(&id) {
            Some(record) if record.active => {
                record.active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_active_refresh_token(&self, id: Uuid) -> Result<RefreshTokenRecord, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .refresh_tokens
            .get(&id)
            .filter(|record| record.active)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_active_refresh_token_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .refresh_tokens
            .values()
            .find(|record| record.user_id == user_id && record.active)
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}
