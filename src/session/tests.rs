#![allow(clippy::unwrap_used)]

use super::*;
use crate::{hasher::Argon2Hasher, store::MemoryStore, token::TokenCodec};
use anyhow::Result;
use argon2::Params;
use async_trait::async_trait;
use secrecy::SecretSlice;
use std::time::Duration;
use tokio::sync::mpsc;

const KEY: [u8; 64] = [7u8; 64];
const PASSWORD: &str = "Secret#123";

struct RecordingNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let _ = self.tx.send(notification.clone());
        Ok(())
    }
}

/// Wraps [`MemoryStore`] and injects failures into selected calls.
#[derive(Default)]
struct FaultyStore {
    inner: MemoryStore,
    fail_add_refresh_token: bool,
    stall_user_lookup: bool,
}

#[async_trait]
impl CredentialStore for FaultyStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn get_user(&self, id: Uuid) -> Result<User, StoreError> {
        self.inner.get_user(id).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        if self.stall_user_lookup {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.inner.get_user_by_email(email).await
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        self.inner.list_users().await
    }

    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        self.inner.create_user(user).await
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        self.inner.update_user(user).await
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.delete_user(id).await
    }

    async fn add_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        if self.fail_add_refresh_token {
            return Err(StoreError::Backend(anyhow!("disk full")));
        }
        self.inner.add_refresh_token(record).await
    }

    async fn revoke_refresh_tokens_by_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        self.inner.revoke_refresh_tokens_by_user(user_id).await
    }

    async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.revoke_refresh_token(id).await
    }

    async fn get_active_refresh_token(&self, id: Uuid) -> Result<RefreshTokenRecord, StoreError> {
        self.inner.get_active_refresh_token(id).await
    }

    async fn get_active_refresh_token_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<RefreshTokenRecord, StoreError> {
        self.inner.get_active_refresh_token_by_user(user_id).await
    }
}

struct Harness {
    service: SessionService,
    store: Arc<MemoryStore>,
    notifications: mpsc::UnboundedReceiver<Notification>,
}

fn cheap_hasher() -> Arc<Argon2Hasher> {
    Arc::new(Argon2Hasher::with_params(Params::new(8, 1, 1, None).unwrap()))
}

fn codec() -> TokenCodec {
    TokenCodec::new(SecretSlice::from(KEY.to_vec())).unwrap()
}

fn service_with(
    store: Arc<dyn CredentialStore>,
    config: SessionConfig,
) -> (SessionService, mpsc::UnboundedReceiver<Notification>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let service = SessionService::new(
        store,
        cheap_hasher(),
        Arc::new(RecordingNotifier { tx }),
        codec(),
        config,
    );
    (service, rx)
}

fn harness_with(config: SessionConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let (service, notifications) = service_with(store.clone(), config);
    Harness {
        service,
        store,
        notifications,
    }
}

fn harness() -> Harness {
    harness_with(SessionConfig::new())
}

fn ip(s: &str) -> Option<IpAddr> {
    s.parse().ok()
}

async fn user_id(h: &Harness, email: &str) -> Uuid {
    h.store.get_user_by_email(email).await.unwrap().id
}

#[tokio::test]
async fn register_refresh_replay() {
    let h = harness();
    let first = h
        .service
        .register("alice@example.com", PASSWORD, ip("192.0.2.1"))
        .await
        .unwrap();

    let second = h
        .service
        .refresh(&first.access_token, &first.refresh_token, ip("192.0.2.1"))
        .await
        .unwrap();
    assert_ne!(first, second);

    let replay = h
        .service
        .refresh(&first.access_token, &first.refresh_token, ip("192.0.2.1"))
        .await;
    assert_eq!(
        replay.unwrap_err().deny_reason(),
        Some(DenyReason::SessionRevoked)
    );

    assert!(h
        .service
        .refresh(&second.access_token, &second.refresh_token, ip("192.0.2.1"))
        .await
        .is_ok());
}

#[tokio::test]
async fn rotation_revokes_predecessor_access() {
    let h = harness();
    let first = h
        .service
        .register("alice@example.com", PASSWORD, None)
        .await
        .unwrap();
    assert!(h.service.authenticate(&first.access_token).await.is_ok());

    let second = h
        .service
        .refresh(&first.access_token, &first.refresh_token, None)
        .await
        .unwrap();

    // still inside its own lifetime, but the session behind it is gone
    assert_eq!(
        h.service
            .authenticate(&first.access_token)
            .await
            .unwrap_err()
            .deny_reason(),
        Some(DenyReason::SessionRevoked)
    );
    let principal = h.service.authenticate(&second.access_token).await.unwrap();
    assert_eq!(principal.user_id, user_id(&h, "alice@example.com").await);
}

#[tokio::test]
async fn one_active_session_per_user() {
    let h = harness();
    let registered = h
        .service
        .register("alice@example.com", PASSWORD, None)
        .await
        .unwrap();
    let id = user_id(&h, "alice@example.com").await;
    assert_eq!(h.store.active_count(id).await, 1);

    let login = h
        .service
        .login("alice@example.com", PASSWORD, None)
        .await
        .unwrap();
    assert_eq!(h.store.active_count(id).await, 1);

    // the login superseded the registration session
    assert!(h
        .service
        .refresh(&registered.access_token, &registered.refresh_token, None)
        .await
        .is_err());

    let refreshed = h
        .service
        .refresh(&login.access_token, &login.refresh_token, None)
        .await
        .unwrap();
    assert_eq!(h.store.active_count(id).await, 1);

    let active = h.store.get_active_refresh_token_by_user(id).await.unwrap();
    let principal = h
        .service
        .authenticate(&refreshed.access_token)
        .await
        .unwrap();
    assert_eq!(active.id, principal.jti);

    h.service.logout(&principal).await.unwrap();
    assert_eq!(h.store.active_count(id).await, 0);
}

#[tokio::test]
async fn refresh_token_of_another_user_is_rejected() {
    let h = harness();
    let alice = h
        .service
        .register("alice@example.com", PASSWORD, None)
        .await
        .unwrap();
    let bob = h
        .service
        .register("bob@example.com", PASSWORD, None)
        .await
        .unwrap();

    let result = h
        .service
        .refresh(&alice.access_token, &bob.refresh_token, None)
        .await;
    assert_eq!(
        result.unwrap_err().deny_reason(),
        Some(DenyReason::SecretMismatch)
    );

    // a failed attempt does not burn the legitimate pair
    assert!(h
        .service
        .refresh(&alice.access_token, &alice.refresh_token, None)
        .await
        .is_ok());
}

#[tokio::test]
async fn refresh_token_from_other_issuance_is_rejected() {
    let h = harness();
    let first = h
        .service
        .register("alice@example.com", PASSWORD, None)
        .await
        .unwrap();
    let second = h
        .service
        .login("alice@example.com", PASSWORD, None)
        .await
        .unwrap();

    let result = h
        .service
        .refresh(&second.access_token, &first.refresh_token, None)
        .await;
    assert_eq!(
        result.unwrap_err().deny_reason(),
        Some(DenyReason::SecretMismatch)
    );
}

#[tokio::test]
async fn matching_hash_with_foreign_jti_is_a_pair_mismatch() {
    let h = harness();
    h.service
        .register("alice@example.com", PASSWORD, None)
        .await
        .unwrap();
    let id = user_id(&h, "alice@example.com").await;
    h.store.revoke_refresh_tokens_by_user(id).await.unwrap();

    // a record whose stored hash belongs to a refresh token for a different jti
    let jti = Uuid::new_v4();
    let foreign = issue_refresh_token(&RefreshTokenPayload {
        jti: Uuid::new_v4(),
        ip: None,
    });
    let record = RefreshTokenRecord {
        id: jti,
        hashed_secret: cheap_hasher().hash(&foreign).unwrap(),
        user_id: id,
        active: true,
        created_at: Utc::now(),
    };
    h.store.add_refresh_token(&record).await.unwrap();

    let now = Utc::now().timestamp();
    let access = codec()
        .issue_access_token(&AccessTokenClaims {
            jti,
            sub: id,
            ip: String::new(),
            iat: now,
            exp: now + 300,
        })
        .unwrap();

    let result = h.service.refresh(&access, &foreign, None).await;
    assert_eq!(
        result.unwrap_err().deny_reason(),
        Some(DenyReason::PairMismatch)
    );
    assert_eq!(h.store.active_count(id).await, 1);
}

#[tokio::test]
async fn expired_access_token_cannot_refresh() {
    let h = harness_with(SessionConfig::new().with_access_token_ttl_seconds(0));
    let pair = h
        .service
        .register("alice@example.com", PASSWORD, None)
        .await
        .unwrap();

    let result = h
        .service
        .refresh(&pair.access_token, &pair.refresh_token, None)
        .await;
    assert_eq!(
        result.unwrap_err().deny_reason(),
        Some(DenyReason::InvalidAccessToken)
    );
    assert!(h.service.current_user(&pair.access_token).await.is_err());
}

#[tokio::test]
async fn garbage_tokens_are_denied() {
    let h = harness();
    let pair = h
        .service
        .register("alice@example.com", PASSWORD, None)
        .await
        .unwrap();

    let result = h
        .service
        .refresh("not.a.jwt", &pair.refresh_token, None)
        .await;
    assert_eq!(
        result.unwrap_err().deny_reason(),
        Some(DenyReason::InvalidAccessToken)
    );

    let result = h
        .service
        .refresh(&pair.access_token, "%%%", None)
        .await;
    assert_eq!(
        result.unwrap_err().deny_reason(),
        Some(DenyReason::SecretMismatch)
    );
}

#[tokio::test]
async fn ip_change_notifies_once_and_still_refreshes() {
    let mut h = harness();
    let pair = h
        .service
        .register("alice@example.com", PASSWORD, ip("192.0.2.1"))
        .await
        .unwrap();

    let refreshed = h
        .service
        .refresh(&pair.access_token, &pair.refresh_token, ip("198.51.100.7"))
        .await;
    assert!(refreshed.is_ok());

    let notification = tokio::time::timeout(Duration::from_secs(5), h.notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notification.to, "alice@example.com");
    assert!(notification.body.contains("192.0.2.1"));
    assert!(notification.body.contains("198.51.100.7"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.notifications.try_recv().is_err());
}

#[tokio::test]
async fn same_ip_does_not_notify() {
    let mut h = harness();
    let pair = h
        .service
        .register("alice@example.com", PASSWORD, ip("192.0.2.1"))
        .await
        .unwrap();
    h.service
        .refresh(&pair.access_token, &pair.refresh_token, ip("192.0.2.1"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.notifications.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_logins_leave_one_session() {
    let h = harness();
    h.service
        .register("alice@example.com", PASSWORD, None)
        .await
        .unwrap();
    let id = user_id(&h, "alice@example.com").await;

    let (a, b) = tokio::join!(
        h.service.login("alice@example.com", PASSWORD, None),
        h.service.login("alice@example.com", PASSWORD, None),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(h.store.active_count(id).await, 1);

    let ra = h
        .service
        .refresh(&a.access_token, &a.refresh_token, None)
        .await;
    let rb = h
        .service
        .refresh(&b.access_token, &b.refresh_token, None)
        .await;
    assert_eq!(
        usize::from(ra.is_ok()) + usize::from(rb.is_ok()),
        1,
        "exactly one concurrent login keeps a live session"
    );
    assert_eq!(h.store.active_count(id).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refresh_has_one_winner() {
    let h = harness();
    let pair = h
        .service
        .register("alice@example.com", PASSWORD, None)
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        h.service
            .refresh(&pair.access_token, &pair.refresh_token, None),
        h.service
            .refresh(&pair.access_token, &pair.refresh_token, None),
    );
    assert_eq!(usize::from(a.is_ok()) + usize::from(b.is_ok()), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refresh_from_new_ip_alerts_once() {
    for _ in 0..10 {
        let mut h = harness();
        let pair = h
            .service
            .register("alice@example.com", PASSWORD, ip("192.0.2.1"))
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            h.service
                .refresh(&pair.access_token, &pair.refresh_token, ip("198.51.100.7")),
            h.service
                .refresh(&pair.access_token, &pair.refresh_token, ip("198.51.100.7")),
        );
        assert_eq!(usize::from(a.is_ok()) + usize::from(b.is_ok()), 1);

        tokio::time::timeout(Duration::from_secs(5), h.notifications.recv())
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.notifications.try_recv().is_err());
    }
}

#[tokio::test]
async fn login_failures_are_uniform() {
    let h = harness();
    h.service
        .register("alice@example.com", PASSWORD, None)
        .await
        .unwrap();

    let wrong = h
        .service
        .login("alice@example.com", "Wrong#123", None)
        .await;
    let unknown = h
        .service
        .login("nobody@example.com", PASSWORD, None)
        .await;
    assert_eq!(
        wrong.unwrap_err().deny_reason(),
        Some(DenyReason::InvalidCredentials)
    );
    assert_eq!(
        unknown.unwrap_err().deny_reason(),
        Some(DenyReason::InvalidCredentials)
    );
}

#[tokio::test]
async fn register_rejects_bad_input_and_duplicates() {
    let h = harness();
    assert!(matches!(
        h.service.register("not-an-email", "weak", None).await,
        Err(SessionError::Validation(errors)) if errors.len() == 2
    ));

    h.service
        .register("alice@example.com", PASSWORD, None)
        .await
        .unwrap();
    assert!(matches!(
        h.service
            .register("alice@example.com", PASSWORD, None)
            .await,
        Err(SessionError::Conflict)
    ));
}

#[tokio::test]
async fn failed_session_rolls_back_registration() {
    let store = Arc::new(FaultyStore {
        fail_add_refresh_token: true,
        ..FaultyStore::default()
    });
    let (service, _rx) = service_with(store.clone(), SessionConfig::new());

    let result = service
        .register("alice@example.com", PASSWORD, None)
        .await;
    assert!(matches!(result, Err(SessionError::Internal(_))));
    assert!(matches!(
        store.inner.get_user_by_email("alice@example.com").await,
        Err(StoreError::NotFound)
    ));
}

#[tokio::test]
async fn slow_store_times_out() {
    let store = Arc::new(FaultyStore {
        stall_user_lookup: true,
        ..FaultyStore::default()
    });
    let (service, _rx) =
        service_with(store, SessionConfig::new().with_store_timeout_seconds(1));

    let result = service.login("alice@example.com", PASSWORD, None).await;
    assert!(matches!(result, Err(SessionError::Internal(_))));
}

#[tokio::test]
async fn login_by_identity_issues_session() {
    let h = harness();
    h.service
        .register("alice@example.com", PASSWORD, None)
        .await
        .unwrap();
    let id = user_id(&h, "alice@example.com").await;

    let pair = h
        .service
        .login_by_identity(id, ip("10.0.0.1"))
        .await
        .unwrap();
    let user = h.service.current_user(&pair.access_token).await.unwrap();
    assert_eq!(user.id, id);

    assert_eq!(
        h.service
            .login_by_identity(Uuid::new_v4(), None)
            .await
            .unwrap_err()
            .deny_reason(),
        Some(DenyReason::UnknownUser)
    );
}

#[tokio::test]
async fn logout_is_idempotent() {
    let h = harness();
    let pair = h
        .service
        .register("alice@example.com", PASSWORD, None)
        .await
        .unwrap();
    let principal = h.service.authenticate(&pair.access_token).await.unwrap();

    h.service.logout(&principal).await.unwrap();
    assert_eq!(
        h.service
            .authenticate(&pair.access_token)
            .await
            .unwrap_err()
            .deny_reason(),
        Some(DenyReason::SessionRevoked)
    );

    let again = h.service.identify(&pair.access_token).unwrap();
    assert_eq!(again, principal);
    h.service.logout(&again).await.unwrap();

    assert_eq!(
        h.service.identify("not.a.token").unwrap_err().deny_reason(),
        Some(DenyReason::InvalidAccessToken)
    );

    assert!(h
        .service
        .refresh(&pair.access_token, &pair.refresh_token, None)
        .await
        .is_err());
}

#[tokio::test]
async fn users_manage_only_themselves() {
    let h = harness();
    let alice = h
        .service
        .register("alice@example.com", PASSWORD, None)
        .await
        .unwrap();
    h.service
        .register("bob@example.com", PASSWORD, None)
        .await
        .unwrap();
    let alice_principal = h.service.authenticate(&alice.access_token).await.unwrap();
    let bob_id = user_id(&h, "bob@example.com").await;

    assert_eq!(
        h.service
            .delete_user(&alice_principal, bob_id)
            .await
            .unwrap_err()
            .deny_reason(),
        Some(DenyReason::NotOwner)
    );

    let taken = UserUpdate {
        email: Some("bob@example.com".to_string()),
        password: None,
    };
    assert!(matches!(
        h.service
            .update_user(&alice_principal, alice_principal.user_id, taken)
            .await,
        Err(SessionError::Conflict)
    ));

    let new_password = UserUpdate {
        email: None,
        password: Some("Another#456".to_string()),
    };
    h.service
        .update_user(&alice_principal, alice_principal.user_id, new_password)
        .await
        .unwrap();
    assert!(h
        .service
        .login("alice@example.com", "Another#456", None)
        .await
        .is_ok());

    h.service
        .delete_user(&alice_principal, alice_principal.user_id)
        .await
        .unwrap();
    assert_eq!(h.store.refresh_token_count().await, 1);
    assert!(matches!(
        h.service.get_user(alice_principal.user_id).await,
        Err(SessionError::NotFound)
    ));
    assert_eq!(h.service.list_users().await.unwrap().len(), 1);
}
