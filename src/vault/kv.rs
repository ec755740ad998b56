use crate::{cli::globals::GlobalArgs, vault, APP_USER_AGENT};
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{info_span, instrument, Instrument};

pub const ACCESS_TOKEN_SECRET_FIELD: &str = "access_token_secret_b64";

/// Read the base64 access token key from a KV v2 secret.
///
/// # Errors
/// Returns an error if the request fails or the field is missing or empty.
#[instrument(skip(globals))]
pub async fn read_access_token_secret(
    globals: &GlobalArgs,
    kv_mount: &str,
    kv_path: &str,
) -> Result<SecretString> {
    let client = Client::builder().user_agent(APP_USER_AGENT).build()?;
    let path = format!("/v1/{kv_mount}/data/{kv_path}");
    let url = vault::endpoint_url(&globals.vault_url, &path)?;

    let span = info_span!("vault.kv.read", http.method = "GET", url = %url);
    let response = client
        .get(&url)
        .header("X-Vault-Token", globals.vault_token.expose_secret())
        .send()
        .instrument(span)
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("vault kv read failed: {status} {body}"));
    }

    let json: Value = response.json().await?;
    let secret = json
        .get("data")
        .and_then(|data| data.get("data"))
        .and_then(|data| data.get(ACCESS_TOKEN_SECRET_FIELD))
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .with_context(|| format!("{ACCESS_TOKEN_SECRET_FIELD} missing from vault response"))?;

    Ok(SecretString::from(secret.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::tests::spawn_mock;
    use axum::{http::HeaderMap, http::StatusCode, routing::get, Json, Router};
    use serde_json::json;

    fn mock_kv() -> Router {
        Router::new()
            .route(
                "/v1/secret/data/credo",
                get(|headers: HeaderMap| async move {
                    let token = headers.get("x-vault-token").and_then(|v| v.to_str().ok());
                    if token != Some("s.client") {
                        return (
                            StatusCode::FORBIDDEN,
                            Json(json!({"errors": ["permission denied"]})),
                        );
                    }
                    (
                        StatusCode::OK,
                        Json(json!({"data": {"data": {ACCESS_TOKEN_SECRET_FIELD: "c2VjcmV0"}}})),
                    )
                }),
            )
            .route(
                "/v1/secret/data/empty",
                get(|| async { Json(json!({"data": {"data": {}}})) }),
            )
    }

    fn globals(url: String) -> GlobalArgs {
        let mut globals = GlobalArgs::new(url);
        globals.set_token(SecretString::from("s.client"));
        globals
    }

    #[tokio::test]
    async fn reads_secret_field() {
        let url = spawn_mock(mock_kv()).await;
        let secret = read_access_token_secret(&globals(url), "secret", "credo").await;
        assert_eq!(
            secret.ok().map(|s| s.expose_secret().to_string()),
            Some("c2VjcmV0".to_string())
        );
    }

    #[tokio::test]
    async fn missing_field_is_an_error() {
        let url = spawn_mock(mock_kv()).await;
        let err = read_access_token_secret(&globals(url), "secret", "empty").await.err();
        assert!(err.is_some_and(|e| e.to_string().contains(ACCESS_TOKEN_SECRET_FIELD)));
    }

    #[tokio::test]
    async fn rejected_token_is_an_error() {
        let url = spawn_mock(mock_kv()).await;
        let mut globals = GlobalArgs::new(url);
        globals.set_token(SecretString::from("s.other"));
        let err = read_access_token_secret(&globals, "secret", "credo").await.err();
        assert!(err.is_some_and(|e| e.to_string().contains("403")));
    }
}
