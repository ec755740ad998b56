use crate::session::{
    DEFAULT_ACCESS_TOKEN_TTL_SECONDS, DEFAULT_NOTIFY_TIMEOUT_SECONDS, DEFAULT_STORE_TIMEOUT_SECONDS,
};
use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_ACCESS_TOKEN_SECRET: &str = "access-token-secret";
pub const ARG_ACCESS_TOKEN_TTL_SECONDS: &str = "access-token-ttl-seconds";
pub const ARG_TRUSTED_IDENTITY_TOKEN: &str = "trusted-identity-token";
pub const ARG_STORE_TIMEOUT_SECONDS: &str = "store-timeout-seconds";
pub const ARG_NOTIFY_TIMEOUT_SECONDS: &str = "notify-timeout-seconds";

pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_SECRET)
                .long(ARG_ACCESS_TOKEN_SECRET)
                .help("Base64 HMAC key for access tokens (at least 32 bytes decoded)")
                .long_help(
                    "Base64 HMAC key for access tokens, at least 32 bytes once decoded. Not needed when the key is read from Vault.",
                )
                .env("CREDO_ACCESS_TOKEN_SECRET")
                .hide_env_values(true)
                .required_unless_present(super::vault::ARG_VAULT_URL)
                .conflicts_with(super::vault::ARG_VAULT_URL),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .long(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .help("Access token lifetime in seconds")
                .env("CREDO_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TRUSTED_IDENTITY_TOKEN)
                .long(ARG_TRUSTED_IDENTITY_TOKEN)
                .help("Token a trusted service sends in X-Service-Token to log users in by id")
                .env("CREDO_TRUSTED_IDENTITY_TOKEN")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT_SECONDS)
                .long(ARG_STORE_TIMEOUT_SECONDS)
                .help("Deadline for each credential store call")
                .env("CREDO_STORE_TIMEOUT_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_NOTIFY_TIMEOUT_SECONDS)
                .long(ARG_NOTIFY_TIMEOUT_SECONDS)
                .help("Deadline for sending an IP change alert")
                .env("CREDO_NOTIFY_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub access_token_secret: Option<SecretString>,
    pub access_token_ttl_seconds: i64,
    pub trusted_identity_token: Option<SecretString>,
    pub store_timeout_seconds: u64,
    pub notify_timeout_seconds: u64,
}

impl Options {
    /// # Errors
    /// Does not fail today; kept fallible like the other option groups.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let secret = |id: &str| {
            matches
                .get_one::<String>(id)
                .map(|value| SecretString::from(value.clone()))
        };

        Ok(Self {
            access_token_secret: secret(ARG_ACCESS_TOKEN_SECRET),
            access_token_ttl_seconds: matches
                .get_one::<i64>(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_ACCESS_TOKEN_TTL_SECONDS),
            trusted_identity_token: secret(ARG_TRUSTED_IDENTITY_TOKEN),
            store_timeout_seconds: matches
                .get_one::<u64>(ARG_STORE_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_STORE_TIMEOUT_SECONDS),
            notify_timeout_seconds: matches
                .get_one::<u64>(ARG_NOTIFY_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_NOTIFY_TIMEOUT_SECONDS),
        })
    }
}
