//! Minimal Vault client: AppRole login (optionally through a wrapped secret id)
//! and KV v2 reads.

pub mod kv;

use crate::{cli::globals::GlobalArgs, APP_USER_AGENT};
use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, info_span, instrument, Instrument};
use url::Url;

const DEFAULT_LEASE_SECONDS: u64 = 1800;

/// Join `path` onto the scheme, host and port of the Vault base URL.
///
/// # Errors
/// Returns an error if the URL cannot be parsed or has no host.
pub fn endpoint_url(vault_url: &str, path: &str) -> Result<String> {
    let url = Url::parse(vault_url).with_context(|| format!("invalid Vault URL: {vault_url}"))?;

    let scheme = url.scheme();
    let host = url
        .host()
        .ok_or_else(|| anyhow!("Error parsing URL: no host specified"))?;
    let port = match url.port() {
        Some(p) => p,
        None => match scheme {
            "http" => 80,
            "https" => 443,
            _ => return Err(anyhow!("Error parsing URL: unsupported scheme {}", scheme)),
        },
    };

    let endpoint_url = format!("{scheme}://{host}:{port}{path}");
    debug!("endpoint URL: {}", endpoint_url);
    Ok(endpoint_url)
}

fn client() -> Result<Client> {
    Ok(Client::builder().user_agent(APP_USER_AGENT).build()?)
}

/// Turn a non-2xx Vault response into an error carrying Vault's first message.
async fn check(url: &str, response: Response) -> Result<Value> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body: Value = response.json().await.unwrap_or(Value::Null);
    let message = body["errors"][0].as_str().unwrap_or("");
    Err(anyhow!("{url} - {status}, {message}"))
}

/// Unwrap a response-wrapping token and return the AppRole secret id inside.
///
/// # Errors
/// Returns an error if Vault rejects the token or the reply has no `secret_id`.
#[instrument(skip(token))]
pub async fn unwrap(vault_url: &str, token: &str) -> Result<String> {
    let url = endpoint_url(vault_url, "/v1/sys/wrapping/unwrap")?;

    let response = client()?
        .post(&url)
        .header("X-Vault-Token", token)
        .send()
        .instrument(info_span!("vault.unwrap", http.method = "POST"))
        .await?;

    let body = check(&url, response).await?;
    body["data"]["secret_id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no secret_id found"))
}

/// AppRole login; returns the client token and its lease in seconds.
///
/// # Errors
/// Returns an error if Vault rejects the credentials or the reply has no token.
#[instrument(skip(sid))]
pub async fn approle_login(vault_url: &str, sid: &str, rid: &str) -> Result<(String, u64)> {
    let url = endpoint_url(vault_url, "/v1/auth/approle/login")?;

    let response = client()?
        .post(&url)
        .json(&json!({ "role_id": rid, "secret_id": sid }))
        .send()
        .instrument(info_span!("vault.approle.login", http.method = "POST"))
        .await?;

    let body = check(&url, response).await?;
    let token = body["auth"]["client_token"]
        .as_str()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no client_token found"))?;
    let lease_duration = body["auth"]["lease_duration"]
        .as_u64()
        .unwrap_or(DEFAULT_LEASE_SECONDS);

    Ok((token.to_string(), lease_duration))
}

/// Log in with either a plain or a wrapped secret id and store the token in `globals`.
///
/// # Errors
/// Returns an error if neither secret is given or Vault rejects the login.
pub async fn login(
    globals: &mut GlobalArgs,
    role_id: &str,
    secret_id: Option<&SecretString>,
    wrapped_token: Option<&SecretString>,
) -> Result<()> {
    let secret_id = match (wrapped_token, secret_id) {
        (Some(wrapped), _) => unwrap(&globals.vault_url, wrapped.expose_secret()).await?,
        (None, Some(secret_id)) => secret_id.expose_secret().to_string(),
        (None, None) => return Err(anyhow!("Vault secret-id is required")),
    };

    let (token, lease) = approle_login(&globals.vault_url, &secret_id, role_id).await?;
    debug!("vault login ok, lease {}s", lease);
    globals.set_token(SecretString::from(token));
    Ok(())
}
