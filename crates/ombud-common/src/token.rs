//! HMAC-SHA256 signed-token minting and verification.
//!
//! A token is `base64url(claims JSON) "." base64url(HMAC-SHA256 tag)`,
//! where the tag is computed over the encoded claims segment. The login
//! service mints tokens; the relay only verifies them.

use crate::identity::{Identity, Role};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Claims carried inside a signed token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Stable user id.
    pub id: String,
    /// Display name shown to chat peers.
    pub name: String,
    /// Role granted to the user.
    pub role: Role,
    /// Expiry as Unix seconds; tokens at or past this instant are rejected.
    pub exp: u64,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.id,
            display_name: claims.name,
            role: claims.role,
        }
    }
}

/// Errors that can occur while verifying a presented token.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// The token is not two base64url segments carrying a claims object.
    #[error("malformed token")]
    Malformed,
    /// The HMAC tag does not match the claims segment.
    #[error("signature verification failed")]
    BadSignature,
    /// The `exp` claim is in the past.
    #[error("token expired")]
    Expired,
}

/// Mints a signed token for the given claims.
///
/// # Errors
///
/// Returns [`TokenError::Malformed`] if the claims cannot be encoded.
pub fn mint(secret: &[u8], claims: &Claims) -> Result<String, TokenError> {
    let body = serde_json::to_vec(claims).map_err(|_| TokenError::Malformed)?;
    let body_b64 = URL_SAFE_NO_PAD.encode(body);
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::Malformed)?;
    mac.update(body_b64.as_bytes());
    let tag = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("{body_b64}.{tag}"))
}

/// Verifies a presented token against the shared secret and returns its
/// claims.
///
/// The MAC is checked in constant time before the claims segment is
/// decoded, then `exp` is compared against `now` (Unix seconds).
///
/// # Errors
///
/// Returns [`TokenError::Malformed`] for structural problems,
/// [`TokenError::BadSignature`] when the tag does not verify, and
/// [`TokenError::Expired`] when the token is past its expiry.
pub fn verify(secret: &[u8], token: &str, now: u64) -> Result<Claims, TokenError> {
    let (body_b64, tag_b64) = token.split_once('.').ok_or(TokenError::Malformed)?;
    let tag = URL_SAFE_NO_PAD
        .decode(tag_b64)
        .map_err(|_| TokenError::Malformed)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::Malformed)?;
    mac.update(body_b64.as_bytes());
    mac.verify_slice(&tag)
        .map_err(|_| TokenError::BadSignature)?;

    let body = URL_SAFE_NO_PAD
        .decode(body_b64)
        .map_err(|_| TokenError::Malformed)?;
    let claims: Claims = serde_json::from_slice(&body).map_err(|_| TokenError::Malformed)?;

    if claims.exp <= now {
        return Err(TokenError::Expired);
    }
    Ok(claims)
}

/// Returns the current Unix timestamp in seconds.
///
/// Returns 0 if the system clock is before the Unix epoch (indicates a
/// misconfigured system clock).
#[must_use]
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn claims(exp: u64) -> Claims {
        Claims {
            id: "u-1".to_string(),
            name: "Alice".to_string(),
            role: Role::User,
            exp,
        }
    }

    #[test]
    fn mint_then_verify_round_trips_claims() {
        let now = unix_now();
        let minted = claims(now + 3600);
        let token = mint(SECRET, &minted).unwrap();
        let verified = verify(SECRET, &token, now).unwrap();
        assert_eq!(verified, minted);
    }

    #[test]
    fn verified_claims_convert_to_identity() {
        let identity: Identity = claims(1).into();
        assert_eq!(identity.id, "u-1");
        assert_eq!(identity.display_name, "Alice");
        assert_eq!(identity.role, Role::User);
    }

    #[test]
    fn tampered_body_fails_signature_check() {
        let token = mint(SECRET, &claims(unix_now() + 3600)).unwrap();
        let (_, tag) = token.split_once('.').unwrap();
        let forged_body = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&Claims {
                role: Role::Admin,
                ..claims(unix_now() + 3600)
            })
            .unwrap(),
        );
        let forged = format!("{forged_body}.{tag}");
        assert_eq!(
            verify(SECRET, &forged, unix_now()),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn wrong_secret_fails_signature_check() {
        let token = mint(SECRET, &claims(unix_now() + 3600)).unwrap();
        assert_eq!(
            verify(b"another-secret-entirely-32-bytes", &token, unix_now()),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = unix_now();
        let token = mint(SECRET, &claims(now - 1)).unwrap();
        assert_eq!(verify(SECRET, &token, now), Err(TokenError::Expired));
    }

    #[test]
    fn expiry_is_exclusive_at_the_boundary() {
        let now = unix_now();
        let token = mint(SECRET, &claims(now)).unwrap();
        assert_eq!(verify(SECRET, &token, now), Err(TokenError::Expired));
    }

    #[test]
    fn token_without_separator_is_malformed() {
        assert_eq!(
            verify(SECRET, "not-a-token", 0),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn garbage_segments_are_malformed() {
        assert_eq!(
            verify(SECRET, "!!!.???", 0),
            Err(TokenError::Malformed)
        );
    }
}
