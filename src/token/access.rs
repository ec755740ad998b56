use super::TokenError;
use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretSlice};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use uuid::Uuid;

type HmacSha512 = Hmac<Sha512>;

pub const ACCESS_TOKEN_ALG: &str = "HS512";

/// Shortest accepted HMAC key.
pub const MIN_KEY_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct AccessTokenHeader {
    alg: String,
    typ: String,
}

impl AccessTokenHeader {
    fn hs512() -> Self {
        Self {
            alg: ACCESS_TOKEN_ALG.to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Claims carried by every access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessTokenClaims {
    /// Pair identifier, shared with the refresh token and its stored record.
    pub jti: Uuid,
    /// User id.
    pub sub: Uuid,
    /// Caller IP at issue time, empty when unknown.
    pub ip: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signs and verifies access tokens with a process-wide HMAC key.
#[derive(Debug)]
pub struct TokenCodec {
    key: SecretSlice<u8>,
}

impl TokenCodec {
    /// # Errors
    /// Returns [`TokenError::KeyTooShort`] if the key is shorter than [`MIN_KEY_LEN`].
    pub fn new(key: SecretSlice<u8>) -> Result<Self, TokenError> {
        if key.expose_secret().len() < MIN_KEY_LEN {
            return Err(TokenError::KeyTooShort);
        }
        Ok(Self { key })
    }

    /// Build a codec from a standard base64 encoded key.
    ///
    /// # Errors
    /// Returns an error if the value is not base64 or decodes to a short key.
    pub fn from_base64(encoded: &str) -> Result<Self, TokenError> {
        let bytes = Base64::decode_vec(encoded.trim()).map_err(|_| TokenError::KeyEncoding)?;
        Self::new(SecretSlice::from(bytes))
    }

    fn mac(&self) -> Result<HmacSha512, TokenError> {
        HmacSha512::new_from_slice(self.key.expose_secret()).map_err(|_| TokenError::KeyTooShort)
    }

    /// Encode and sign `claims` as a compact JWT.
    ///
    /// # Errors
    /// Returns an error if the header or claims cannot be serialized.
    pub fn issue_access_token(&self, claims: &AccessTokenClaims) -> Result<String, TokenError> {
        let header_b64 = b64e_json(&AccessTokenHeader::hs512())?;
        let claims_b64 = b64e_json(claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Verify structure, algorithm, signature and expiry, then decode the claims.
    ///
    /// # Errors
    /// - [`TokenError::Malformed`] for anything that is not a three part JWT,
    /// - [`TokenError::UnsupportedAlg`] when the header does not say `HS512`,
    /// - [`TokenError::InvalidSignature`] when the MAC does not match,
    /// - [`TokenError::InvalidClaims`] when a claim is missing or mistyped,
    /// - [`TokenError::Expired`] when `exp <= now_unix_seconds`.
    pub fn parse_access_token(
        &self,
        token: &str,
        now_unix_seconds: i64,
    ) -> Result<AccessTokenClaims, TokenError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(TokenError::Malformed)?;
        let claims_b64 = parts.next().ok_or(TokenError::Malformed)?;
        let sig_b64 = parts.next().ok_or(TokenError::Malformed)?;
        if parts.next().is_some() {
            return Err(TokenError::Malformed);
        }

        let header: AccessTokenHeader =
            b64d_json(header_b64).map_err(|_| TokenError::Malformed)?;
        if header.alg != ACCESS_TOKEN_ALG {
            return Err(TokenError::UnsupportedAlg(header.alg));
        }

        let signature =
            Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims_json =
            Base64UrlUnpadded::decode_vec(claims_b64).map_err(|_| TokenError::Malformed)?;
        let claims: AccessTokenClaims =
            serde_json::from_slice(&claims_json).map_err(TokenError::InvalidClaims)?;

        if claims.exp <= now_unix_seconds {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(TokenError::InvalidClaims)
}
