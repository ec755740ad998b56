use std::time::Duration;

pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 5 * 60;
pub const DEFAULT_STORE_TIMEOUT_SECONDS: u64 = 5;
pub const DEFAULT_NOTIFY_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_ISSUE_ATTEMPTS: usize = 3;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    access_token_ttl_seconds: i64,
    store_timeout: Duration,
    notify_timeout: Duration,
    issue_attempts: usize,
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            store_timeout: Duration::from_secs(DEFAULT_STORE_TIMEOUT_SECONDS),
            notify_timeout: Duration::from_secs(DEFAULT_NOTIFY_TIMEOUT_SECONDS),
            issue_attempts: DEFAULT_ISSUE_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_store_timeout_seconds(mut self, seconds: u64) -> Self {
        self.store_timeout = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_notify_timeout_seconds(mut self, seconds: u64) -> Self {
        self.notify_timeout = Duration::from_secs(seconds);
        self
    }

    /// Revoke+insert rounds attempted before a concurrent login is reported as raced.
    #[must_use]
    pub fn with_issue_attempts(mut self, attempts: usize) -> Self {
        self.issue_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    #[must_use]
    pub fn notify_timeout(&self) -> Duration {
        self.notify_timeout
    }

    #[must_use]
    pub fn issue_attempts(&self) -> usize {
        self.issue_attempts
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}
