use crate::{
    api::{self, handlers::ApiState},
    cli::{commands::vault::Options as VaultOptions, globals::GlobalArgs, telemetry},
    hasher::Argon2Hasher,
    notify::LogNotifier,
    session::{SessionConfig, SessionService},
    store::PgStore,
    token::TokenCodec,
    vault,
};
use anyhow::{anyhow, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub access_token_secret: Option<SecretString>,
    pub access_token_ttl_seconds: i64,
    pub trusted_identity_token: Option<SecretString>,
    pub store_timeout_seconds: u64,
    pub notify_timeout_seconds: u64,
    pub vault: Option<VaultOptions>,
}

/// Resolve the access token key from the command line or, failing that, Vault.
async fn access_token_secret(
    secret: Option<SecretString>,
    vault_opts: Option<&VaultOptions>,
) -> Result<SecretString> {
    if let Some(secret) = secret {
        return Ok(secret);
    }

    let opts =
        vault_opts.ok_or_else(|| anyhow!("an access token secret or a Vault URL is required"))?;

    let mut globals = GlobalArgs::new(opts.url.clone());
    vault::login(
        &mut globals,
        &opts.role_id,
        opts.secret_id.as_ref(),
        opts.wrapped_token.as_ref(),
    )
    .await
    .context("Vault login failed")?;

    debug!("Global args: {:?}", globals);

    vault::kv::read_access_token_secret(&globals, &opts.kv_mount, &opts.kv_path)
        .await
        .context("Failed to load the access token secret from Vault")
}

/// Execute the server action.
/// # Errors
/// Returns an error if the key is unusable, the database is unreachable, or the server fails.
pub async fn execute(args: Args) -> Result<()> {
    let secret = access_token_secret(args.access_token_secret, args.vault.as_ref()).await?;
    let codec = TokenCodec::from_base64(secret.expose_secret())
        .context("Invalid access token secret")?;

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&args.dsn)
        .await
        .context("Failed to connect to database")?;

    let store = PgStore::new(pool);
    store
        .ensure_schema()
        .await
        .context("Failed to apply database schema")?;

    let config = SessionConfig::new()
        .with_access_token_ttl_seconds(args.access_token_ttl_seconds)
        .with_store_timeout_seconds(args.store_timeout_seconds)
        .with_notify_timeout_seconds(args.notify_timeout_seconds);

    let sessions = Arc::new(SessionService::new(
        Arc::new(store),
        Arc::new(Argon2Hasher::new()),
        Arc::new(LogNotifier),
        codec,
        config,
    ));

    if args.trusted_identity_token.is_none() {
        info!("No trusted identity token configured; identity login is disabled");
    }

    let state = Arc::new(
        ApiState::new(sessions).with_trusted_identity_token(args.trusted_identity_token),
    );

    let result = api::new(args.port, state).await;
    telemetry::shutdown_tracer();
    result
}
