//! Session orchestration: authentication, pair issuance and rotation.
//!
//! Every successful authentication ends in [`SessionService::issue_session`], which
//! mints a new `jti`, signs an access token, builds the matching refresh token and
//! stores a hash of the latter. Persisting always revokes the user's previous
//! records before inserting the new one.
//!
//! ## Rotation
//!
//! [`SessionService::refresh`] checks, in order:
//!
//! 1. the access token (signature and expiry; expired tokens are not accepted),
//! 2. that the record named by its `jti` is still active,
//! 3. that the owning user still exists,
//! 4. that the presented refresh token hashes to the stored value,
//! 5. that the refresh token carries the same `jti`.
//!
//! A mismatch between the recorded IP and the caller IP does not block the refresh;
//! it triggers a detached notification instead. The presented record is then
//! revoked with a compare-and-swap so two concurrent redemptions cannot both win.
//!
//! ## Concurrency
//!
//! Two logins for one user may interleave their revoke and insert steps. The
//! store rejects the second active row, and the loser retries a bounded number of
//! times before giving up with [`DenyReason::SessionRaced`].

mod config;
mod error;
#[cfg(test)]
mod tests;

pub use config::{
    SessionConfig, DEFAULT_ACCESS_TOKEN_TTL_SECONDS, DEFAULT_NOTIFY_TIMEOUT_SECONDS,
    DEFAULT_STORE_TIMEOUT_SECONDS,
};
pub use error::{DenyReason, SessionError};

use crate::{
    hasher::SecretHasher,
    notify::{Notification, Notifier},
    store::{CredentialStore, RefreshTokenRecord, StoreError, User},
    token::{
        issue_refresh_token, parse_refresh_token, AccessTokenClaims, RefreshTokenPayload,
        TokenCodec,
    },
    validation,
};
use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{future::Future, net::IpAddr, sync::Arc};
use tokio::sync::OnceCell;
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Password used to compute the hash that unknown-email logins are checked against.
const DUMMY_PASSWORD: &str = "credo-dummy-password";

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Identity proven by a live access token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub jti: Uuid,
}

/// Fields a user may change about themselves.
#[derive(Clone, Debug, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
}

pub struct SessionService {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<dyn SecretHasher>,
    notifier: Arc<dyn Notifier>,
    codec: TokenCodec,
    config: SessionConfig,
    dummy_hash: OnceCell<String>,
}

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("codec", &self.codec)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn ip_string(ip: Option<IpAddr>) -> String {
    ip.map(|ip| ip.to_string()).unwrap_or_default()
}

fn now_unix() -> i64 {
    Utc::now().timestamp()
}

fn deny(reason: DenyReason) -> SessionError {
    debug!(reason = %reason, "request denied");
    SessionError::Denied(reason)
}

fn internal(err: StoreError) -> SessionError {
    match err {
        StoreError::Backend(err) => SessionError::Internal(err),
        other => SessionError::Internal(anyhow!(other)),
    }
}

impl SessionService {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: Arc<dyn SecretHasher>,
        notifier: Arc<dyn Notifier>,
        codec: TokenCodec,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            hasher,
            notifier,
            codec,
            config,
            dummy_hash: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run a store call under the configured deadline.
    async fn with_timeout<T, F>(&self, operation: &'static str, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.config.store_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Backend(anyhow!(
                "store operation {operation} timed out"
            ))),
        }
    }

    async fn hash_secret(&self, secret: String) -> Result<String, SessionError> {
        let hasher = Arc::clone(&self.hasher);
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .context("hashing task failed")??;
        Ok(hash)
    }

    async fn verify_secret(&self, secret: String, hash: String) -> Result<bool, SessionError> {
        let hasher = Arc::clone(&self.hasher);
        let matches = tokio::task::spawn_blocking(move || hasher.verify(&secret, &hash))
            .await
            .context("hash verification task failed")?;
        Ok(matches)
    }

    async fn dummy_hash(&self) -> Result<&str, SessionError> {
        let hash = self
            .dummy_hash
            .get_or_try_init(|| self.hash_secret(DUMMY_PASSWORD.to_string()))
            .await?;
        Ok(hash.as_str())
    }

    /// Store liveness for health checks.
    ///
    /// # Errors
    /// Returns an error if the store does not answer in time.
    pub async fn ping(&self) -> Result<(), SessionError> {
        self.with_timeout("ping", self.store.ping())
            .await
            .map_err(internal)
    }

    /// Create an account and open its first session.
    ///
    /// # Errors
    /// `Validation` for bad input, `Conflict` for a taken email, `Internal` otherwise.
    #[instrument(skip(self, password))]
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        ip: Option<IpAddr>,
    ) -> Result<TokenPair, SessionError> {
        let email = email.trim();
        let errors = validation::validate_registration(email, password);
        if !errors.is_empty() {
            return Err(SessionError::Validation(errors));
        }

        let password_hash = self.hash_secret(password.to_string()).await?;
        let user = User {
            id: Uuid::now_v7(),
            email: email.to_string(),
            password_hash,
        };

        match self
            .with_timeout("create_user", self.store.create_user(&user))
            .await
        {
            Ok(()) => {}
            Err(StoreError::DuplicateEmail) => return Err(SessionError::Conflict),
            Err(err) => return Err(internal(err)),
        }

        match self.issue_session(&user, ip).await {
            Ok(pair) => {
                info!(user_id = %user.id, "user registered");
                Ok(pair)
            }
            Err(err) => {
                // leave no account behind that the caller never got tokens for
                if let Err(cleanup) = self
                    .with_timeout("delete_user", self.store.delete_user(user.id))
                    .await
                {
                    warn!(
                        user_id = %user.id,
                        "failed to remove user after session error: {cleanup}"
                    );
                }
                Err(err)
            }
        }
    }

    /// Email and password login.
    ///
    /// # Errors
    /// `Denied(InvalidCredentials)` for an unknown email or wrong password.
    #[instrument(skip(self, password))]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        ip: Option<IpAddr>,
    ) -> Result<TokenPair, SessionError> {
        let email = email.trim();
        let errors = validation::validate_login(email, password);
        if !errors.is_empty() {
            return Err(SessionError::Validation(errors));
        }

        let user = match self
            .with_timeout("get_user_by_email", self.store.get_user_by_email(email))
            .await
        {
            Ok(user) => user,
            Err(StoreError::NotFound) => {
                // burn the same time as a real check
                let dummy = self.dummy_hash().await?.to_string();
                let _ = self.verify_secret(password.to_string(), dummy).await?;
                return Err(deny(DenyReason::InvalidCredentials));
            }
            Err(err) => return Err(internal(err)),
        };

        if !self
            .verify_secret(password.to_string(), user.password_hash.clone())
            .await?
        {
            return Err(deny(DenyReason::InvalidCredentials));
        }

        self.issue_session(&user, ip).await
    }

    /// Open a session for an identity vouched for by a trusted caller.
    ///
    /// # Errors
    /// `Denied(UnknownUser)` if the user does not exist.
    #[instrument(skip(self))]
    pub async fn login_by_identity(
        &self,
        user_id: Uuid,
        ip: Option<IpAddr>,
    ) -> Result<TokenPair, SessionError> {
        let user = match self
            .with_timeout("get_user", self.store.get_user(user_id))
            .await
        {
            Ok(user) => user,
            Err(StoreError::NotFound) => return Err(deny(DenyReason::UnknownUser)),
            Err(err) => return Err(internal(err)),
        };

        self.issue_session(&user, ip).await
    }

    /// Exchange a token pair for a new one.
    ///
    /// # Errors
    /// `Denied` with the failing check; `Internal` on store failures.
    #[instrument(skip(self, access_token, refresh_token))]
    pub async fn refresh(
        &self,
        access_token: &str,
        refresh_token: &str,
        ip: Option<IpAddr>,
    ) -> Result<TokenPair, SessionError> {
        let claims = self.parse_access(access_token)?;

        let record = self.active_record(&claims).await?;

        let user = match self
            .with_timeout("get_user", self.store.get_user(record.user_id))
            .await
        {
            Ok(user) => user,
            Err(StoreError::NotFound) => return Err(deny(DenyReason::UnknownUser)),
            Err(err) => return Err(internal(err)),
        };

        if !self
            .verify_secret(refresh_token.to_string(), record.hashed_secret.clone())
            .await?
        {
            return Err(deny(DenyReason::SecretMismatch));
        }

        let payload =
            parse_refresh_token(refresh_token).map_err(|_| deny(DenyReason::InvalidRefreshToken))?;
        if payload.jti != claims.jti {
            warn!(user_id = %user.id, jti = %claims.jti, "token pair mismatch");
            return Err(deny(DenyReason::PairMismatch));
        }

        let revoked = self
            .with_timeout(
                "revoke_refresh_token",
                self.store.revoke_refresh_token(claims.jti),
            )
            .await
            .map_err(internal)?;
        if !revoked {
            return Err(deny(DenyReason::SessionRaced));
        }

        // only the redeemer that won the revoke alerts
        let current_ip = ip_string(ip);
        if claims.ip != current_ip {
            info!(
                user_id = %user.id,
                previous_ip = %claims.ip,
                current_ip = %current_ip,
                "new ip detected"
            );
            self.spawn_ip_change_alert(user.email.clone(), claims.ip.clone(), current_ip);
        }

        self.issue_session(&user, ip).await
    }

    /// Revoke every session of the caller. Repeating it is harmless.
    ///
    /// # Errors
    /// `Internal` on store failures.
    #[instrument(skip(self))]
    pub async fn logout(&self, principal: &Principal) -> Result<(), SessionError> {
        let revoked = self
            .with_timeout(
                "revoke_refresh_tokens_by_user",
                self.store.revoke_refresh_tokens_by_user(principal.user_id),
            )
            .await
            .map_err(internal)?;
        debug!(user_id = %principal.user_id, revoked, "logged out");
        Ok(())
    }

    /// Identity from a signed, unexpired access token, without the liveness check.
    ///
    /// Used by logout so that repeating it after revocation still succeeds.
    ///
    /// # Errors
    /// `Denied(InvalidAccessToken)` for a malformed, forged or expired token.
    pub fn identify(&self, access_token: &str) -> Result<Principal, SessionError> {
        let claims = self.parse_access(access_token)?;
        Ok(Principal {
            user_id: claims.sub,
            jti: claims.jti,
        })
    }

    /// Check an access token and that its session is still live.
    ///
    /// # Errors
    /// `Denied` if the token is invalid or its session was revoked.
    pub async fn authenticate(&self, access_token: &str) -> Result<Principal, SessionError> {
        let claims = self.parse_access(access_token)?;
        let record = self.active_record(&claims).await?;
        Ok(Principal {
            user_id: record.user_id,
            jti: record.id,
        })
    }

    /// The user behind a live access token.
    ///
    /// # Errors
    /// `Denied` if the token is invalid, revoked, or its user is gone.
    pub async fn current_user(&self, access_token: &str) -> Result<User, SessionError> {
        let principal = self.authenticate(access_token).await?;
        match self
            .with_timeout("get_user", self.store.get_user(principal.user_id))
            .await
        {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound) => Err(deny(DenyReason::UnknownUser)),
            Err(err) => Err(internal(err)),
        }
    }

    /// # Errors
    /// `NotFound` if there is no such user.
    pub async fn get_user(&self, user_id: Uuid) -> Result<User, SessionError> {
        match self
            .with_timeout("get_user", self.store.get_user(user_id))
            .await
        {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound) => Err(SessionError::NotFound),
            Err(err) => Err(internal(err)),
        }
    }

    /// # Errors
    /// `Internal` on store failures.
    pub async fn list_users(&self) -> Result<Vec<User>, SessionError> {
        self.with_timeout("list_users", self.store.list_users())
            .await
            .map_err(internal)
    }

    /// Change the caller's own email and/or password.
    ///
    /// # Errors
    /// `Denied(NotOwner)` for someone else's account, `Validation`, `Conflict` or `NotFound`.
    #[instrument(skip(self, update))]
    pub async fn update_user(
        &self,
        principal: &Principal,
        user_id: Uuid,
        update: UserUpdate,
    ) -> Result<User, SessionError> {
        if principal.user_id != user_id {
            return Err(deny(DenyReason::NotOwner));
        }

        let email = update.email.as_deref().map(str::trim);
        let errors = validation::validate_update(email, update.password.as_deref());
        if !errors.is_empty() {
            return Err(SessionError::Validation(errors));
        }

        let mut user = self.get_user(user_id).await?;
        if let Some(email) = email {
            user.email = email.to_string();
        }
        if let Some(password) = update.password {
            user.password_hash = self.hash_secret(password).await?;
        }

        match self
            .with_timeout("update_user", self.store.update_user(&user))
            .await
        {
            Ok(()) => Ok(user),
            Err(StoreError::DuplicateEmail) => Err(SessionError::Conflict),
            Err(StoreError::NotFound) => Err(SessionError::NotFound),
            Err(err) => Err(internal(err)),
        }
    }

    /// Delete the caller's own account along with every refresh record.
    ///
    /// # Errors
    /// `Denied(NotOwner)` for someone else's account, `NotFound` if already gone.
    #[instrument(skip(self))]
    pub async fn delete_user(
        &self,
        principal: &Principal,
        user_id: Uuid,
    ) -> Result<(), SessionError> {
        if principal.user_id != user_id {
            return Err(deny(DenyReason::NotOwner));
        }
        match self
            .with_timeout("delete_user", self.store.delete_user(user_id))
            .await
        {
            Ok(()) => {
                info!(user_id = %user_id, "user deleted");
                Ok(())
            }
            Err(StoreError::NotFound) => Err(SessionError::NotFound),
            Err(err) => Err(internal(err)),
        }
    }

    /// Mint and persist a new pair for `user`, revoking whatever was active.
    ///
    /// # Errors
    /// `Denied(SessionRaced)` if concurrent logins keep winning the insert.
    pub async fn issue_session(
        &self,
        user: &User,
        ip: Option<IpAddr>,
    ) -> Result<TokenPair, SessionError> {
        let issued_at = Utc::now();
        let iat = issued_at.timestamp();
        let jti = Uuid::new_v4();

        let claims = AccessTokenClaims {
            jti,
            sub: user.id,
            ip: ip_string(ip),
            iat,
            exp: iat + self.config.access_token_ttl_seconds(),
        };
        let access_token = self
            .codec
            .issue_access_token(&claims)
            .context("failed to sign access token")?;
        let refresh_token = issue_refresh_token(&RefreshTokenPayload { jti, ip });

        let record = RefreshTokenRecord {
            id: jti,
            hashed_secret: self.hash_secret(refresh_token.clone()).await?,
            user_id: user.id,
            active: true,
            created_at: DateTime::from_timestamp(iat, 0).unwrap_or(issued_at),
        };
        self.persist_session(&record).await?;

        debug!(user_id = %user.id, jti = %jti, "session issued");

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    async fn persist_session(&self, record: &RefreshTokenRecord) -> Result<(), SessionError> {
        for attempt in 1..=self.config.issue_attempts() {
            self.with_timeout(
                "revoke_refresh_tokens_by_user",
                self.store.revoke_refresh_tokens_by_user(record.user_id),
            )
            .await
            .map_err(internal)?;

            match self
                .with_timeout("add_refresh_token", self.store.add_refresh_token(record))
                .await
            {
                Ok(()) => return Ok(()),
                Err(StoreError::ActiveSessionConflict) => {
                    debug!(
                        user_id = %record.user_id,
                        attempt,
                        "concurrent session insert, retrying"
                    );
                }
                Err(err) => return Err(internal(err)),
            }
        }

        warn!(user_id = %record.user_id, "gave up issuing session after concurrent logins");
        Err(deny(DenyReason::SessionRaced))
    }

    fn parse_access(&self, access_token: &str) -> Result<AccessTokenClaims, SessionError> {
        self.codec
            .parse_access_token(access_token, now_unix())
            .map_err(|err| {
                debug!("access token rejected: {err}");
                deny(DenyReason::InvalidAccessToken)
            })
    }

    async fn active_record(
        &self,
        claims: &AccessTokenClaims,
    ) -> Result<RefreshTokenRecord, SessionError> {
        let record = match self
            .with_timeout(
                "get_active_refresh_token",
                self.store.get_active_refresh_token(claims.jti),
            )
            .await
        {
            Ok(record) => record,
            Err(StoreError::NotFound) => return Err(deny(DenyReason::SessionRevoked)),
            Err(err) => return Err(internal(err)),
        };
        if record.user_id != claims.sub {
            warn!(jti = %claims.jti, "refresh record owner does not match token subject");
            return Err(deny(DenyReason::PairMismatch));
        }
        Ok(record)
    }

    fn spawn_ip_change_alert(&self, email: String, previous_ip: String, current_ip: String) {
        let notifier = Arc::clone(&self.notifier);
        let deadline = self.config.notify_timeout();
        let span = info_span!("notify.ip_change");
        tokio::spawn(
            async move {
                let notification = Notification::ip_change(&email, &previous_ip, &current_ip);
                match tokio::time::timeout(deadline, notifier.send(&notification)).await {
                    Ok(Ok(())) => debug!("ip change notification sent"),
                    Ok(Err(err)) => warn!("failed to send ip change notification: {err:#}"),
                    Err(_) => warn!("ip change notification timed out"),
                }
            }
            .instrument(span),
        );
    }
}
