//! PKCE (RFC 7636, `S256`) verifier/challenge pairs and CSRF state tokens.
//!
//! Every value comes from the operating system RNG. When that source fails the
//! caller gets `PortalError::RandomUnavailable` and must abort the login; there
//! is no weaker fallback.

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tracing::error;

use crate::error::PortalError;

/// Raw bytes drawn for a verifier; encodes to 43 url-safe characters.
const VERIFIER_BYTES: usize = 32;
/// Raw bytes drawn for a state token (256 bits, above the 128-bit floor).
const STATE_BYTES: usize = 32;
pub const VERIFIER_MIN_LEN: usize = 43;
pub const VERIFIER_MAX_LEN: usize = 128;
pub const CHALLENGE_METHOD: &str = "S256";

/// Verifier plus its derived challenge. The verifier never leaves
/// attempt-scoped storage except for the token exchange.
#[derive(Clone)]
pub struct PkcePair {
    verifier: SecretString,
    challenge: String,
}

impl PkcePair {
    /// Draw a new verifier and derive its challenge.
    ///
    /// # Errors
    /// Returns `PortalError::RandomUnavailable` if the OS RNG fails.
    pub fn generate() -> Result<Self, PortalError> {
        let verifier = generate_verifier()?;
        let challenge = derive_challenge(verifier.expose_secret())?;
        Ok(Self {
            verifier,
            challenge,
        })
    }

    #[must_use]
    pub fn verifier(&self) -> &SecretString {
        &self.verifier
    }

    #[must_use]
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    #[must_use]
    pub fn into_verifier(self) -> SecretString {
        self.verifier
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Create a new code verifier from the OS RNG.
///
/// # Errors
/// Returns `PortalError::RandomUnavailable` if the OS RNG fails.
pub fn generate_verifier() -> Result<SecretString, PortalError> {
    generate_verifier_with(&mut OsRng)
}

/// Create a new CSRF state token, independent from any verifier.
///
/// # Errors
/// Returns `PortalError::RandomUnavailable` if the OS RNG fails.
pub fn generate_state() -> Result<SecretString, PortalError> {
    generate_state_with(&mut OsRng)
}

pub(crate) fn generate_verifier_with(rng: &mut impl RngCore) -> Result<SecretString, PortalError> {
    random_token(rng, VERIFIER_BYTES).map(SecretString::from)
}

pub(crate) fn generate_state_with(rng: &mut impl RngCore) -> Result<SecretString, PortalError> {
    random_token(rng, STATE_BYTES).map(SecretString::from)
}

/// `base64url(SHA-256(verifier))` without padding.
///
/// # Errors
/// Returns `PortalError::InvalidInput` when the verifier is not 43–128
/// unreserved characters.
pub fn derive_challenge(verifier: &str) -> Result<String, PortalError> {
    if !valid_verifier(verifier) {
        return Err(PortalError::InvalidInput(
            "code verifier must be 43-128 unreserved characters".to_string(),
        ));
    }
    let digest = Sha256::digest(verifier.as_bytes());
    Ok(Base64UrlUnpadded::encode_string(&digest))
}

/// RFC 7636 `unreserved` alphabet and length bounds.
#[must_use]
pub fn valid_verifier(verifier: &str) -> bool {
    (VERIFIER_MIN_LEN..=VERIFIER_MAX_LEN).contains(&verifier.len())
        && verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
}

fn random_token(rng: &mut impl RngCore, len: usize) -> Result<String, PortalError> {
    let mut bytes = vec![0u8; len];
    rng.try_fill_bytes(&mut bytes).map_err(|err| {
        error!("Secure random source failed: {err}");
        PortalError::RandomUnavailable
    })?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}
