use super::TokenError;
use base64ct::{Base64, Encoding};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use uuid::Uuid;

const JTI_LEN: usize = 16;

/// Contents of an opaque refresh token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTokenPayload {
    /// Must equal the `jti` of the access token it was issued with.
    pub jti: Uuid,
    pub ip: Option<IpAddr>,
}

/// Encode as standard base64 of `jti || ip`, where the IP part is 0, 4 or 16 bytes.
#[must_use]
pub fn issue_refresh_token(payload: &RefreshTokenPayload) -> String {
    let mut bytes = Vec::with_capacity(JTI_LEN + 16);
    bytes.extend_from_slice(payload.jti.as_bytes());
    match payload.ip {
        Some(IpAddr::V4(ip)) => bytes.extend_from_slice(&ip.octets()),
        Some(IpAddr::V6(ip)) => bytes.extend_from_slice(&ip.octets()),
        None => {}
    }
    Base64::encode_string(&bytes)
}

/// # Errors
/// Returns [`TokenError::Malformed`] for bad base64 or an unexpected length.
pub fn parse_refresh_token(token: &str) -> Result<RefreshTokenPayload, TokenError> {
    let bytes = Base64::decode_vec(token).map_err(|_| TokenError::Malformed)?;
    if bytes.len() < JTI_LEN {
        return Err(TokenError::Malformed);
    }
    let (jti, ip) = bytes.split_at(JTI_LEN);
    let jti = Uuid::from_slice(jti).map_err(|_| TokenError::Malformed)?;

    let ip = match ip.len() {
        0 => None,
        4 => {
            let octets: [u8; 4] = ip.try_into().map_err(|_| TokenError::Malformed)?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = ip.try_into().map_err(|_| TokenError::Malformed)?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => return Err(TokenError::Malformed),
    };

    Ok(RefreshTokenPayload { jti, ip })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_ipv4() -> Result<(), TokenError> {
        let payload = RefreshTokenPayload {
            jti: Uuid::new_v4(),
            ip: Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10))),
        };
        let token = issue_refresh_token(&payload);
        assert_eq!(parse_refresh_token(&token)?, payload);
        Ok(())
    }

    #[test]
    fn round_trip_with_ipv6() -> Result<(), TokenError> {
        let payload = RefreshTokenPayload {
            jti: Uuid::new_v4(),
            ip: "2001:db8::1".parse().ok(),
        };
        assert!(payload.ip.is_some());
        let token = issue_refresh_token(&payload);
        assert_eq!(parse_refresh_token(&token)?, payload);
        Ok(())
    }

    #[test]
    fn round_trip_without_ip() -> Result<(), TokenError> {
        let payload = RefreshTokenPayload {
            jti: Uuid::new_v4(),
            ip: None,
        };
        let token = issue_refresh_token(&payload);
        assert_eq!(Base64::decode_vec(&token).map(|b| b.len()).ok(), Some(16));
        assert_eq!(parse_refresh_token(&token)?, payload);
        Ok(())
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            parse_refresh_token("not base64 at all"),
            Err(TokenError::Malformed)
        ));
        // 8 bytes, shorter than a jti
        assert!(matches!(
            parse_refresh_token(&Base64::encode_string(&[1u8; 8])),
            Err(TokenError::Malformed)
        ));
        // jti plus a 5 byte tail is neither v4 nor v6
        assert!(matches!(
            parse_refresh_token(&Base64::encode_string(&[1u8; 21])),
            Err(TokenError::Malformed)
        ));
    }
}
