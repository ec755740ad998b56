//! Maps validated CLI matches to the action the binary runs.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{tokens, vault};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let token_opts = tokens::Options::parse(matches)?;
    let vault_opts = vault::Options::parse(matches)?;

    if token_opts.access_token_secret.is_none() && vault_opts.is_none() {
        anyhow::bail!(
            "missing required argument: --{} or --{}",
            tokens::ARG_ACCESS_TOKEN_SECRET,
            vault::ARG_VAULT_URL
        );
    }

    Ok(Action::Server(Args {
        port,
        dsn,
        access_token_secret: token_opts.access_token_secret,
        access_token_ttl_seconds: token_opts.access_token_ttl_seconds,
        trusted_identity_token: token_opts.trusted_identity_token,
        store_timeout_seconds: token_opts.store_timeout_seconds,
        notify_timeout_seconds: token_opts.notify_timeout_seconds,
        vault: vault_opts,
    }))
}
