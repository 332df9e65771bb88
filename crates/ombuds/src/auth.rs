//! Identity verification seam.
//!
//! The relay treats credential verification as a narrow external
//! contract: an opaque token string in, an authenticated identity out.

use ombud_common::{token, Identity, TokenError};

/// Turns a presented credential into an authenticated identity.
pub trait IdentityVerifier: Send + Sync {
    /// Verifies the opaque token.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] when the token is missing required
    /// structure, fails signature verification, or has expired.
    fn verify(&self, token: &str) -> Result<Identity, TokenError>;
}

/// Production verifier over HMAC-SHA256 signed tokens minted by the
/// login service with a shared secret.
pub struct HmacTokenVerifier {
    secret: Vec<u8>,
}

impl HmacTokenVerifier {
    /// Creates a verifier for tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }
}

impl IdentityVerifier for HmacTokenVerifier {
    fn verify(&self, presented: &str) -> Result<Identity, TokenError> {
        token::verify(&self.secret, presented, token::unix_now()).map(Identity::from)
    }
}
