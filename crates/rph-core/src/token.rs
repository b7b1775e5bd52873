//! Bearer tokens identifying the calling teacher.
//!
//! Tokens are HMAC-SHA256 signatures over the user ID.
//! Format: `rph_ut_<user_id>_<hmac_hex>`

use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_PREFIX: &str = "rph_ut_";

/// Length of a hyphenated UUID.
const UUID_LEN: usize = 36;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token format: {0}")]
    InvalidFormat(String),

    #[error("invalid user ID in token: {0}")]
    InvalidUserId(String),

    #[error("token HMAC verification failed")]
    HmacMismatch,

    #[error("missing token secret")]
    MissingSecret,
}

/// Secret used to issue and verify tokens.
#[derive(Clone)]
pub struct TokenConfig {
    secret: Vec<u8>,
}

impl TokenConfig {
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }

    /// Build from a hex-encoded secret (as written by `rph init`).
    pub fn from_hex(secret_hex: &str) -> Result<Self, TokenError> {
        if secret_hex.is_empty() {
            return Err(TokenError::MissingSecret);
        }
        let secret = hex::decode(secret_hex)
            .map_err(|e| TokenError::InvalidFormat(format!("secret is not valid hex: {e}")))?;
        Ok(Self::new(secret))
    }
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Issue a token for `user_id`.
pub fn issue_token(config: &TokenConfig, user_id: Uuid) -> String {
    let mac = compute_hmac(&config.secret, user_id.to_string().as_bytes());
    format!("{TOKEN_PREFIX}{user_id}_{}", hex::encode(mac))
}

/// Validate a token and return the user it was issued for.
pub fn validate_token(config: &TokenConfig, token: &str) -> Result<Uuid, TokenError> {
    let rest = token
        .strip_prefix(TOKEN_PREFIX)
        .ok_or_else(|| TokenError::InvalidFormat(format!("token must start with {TOKEN_PREFIX:?}")))?;

    if rest.len() < UUID_LEN || !rest.is_char_boundary(UUID_LEN) {
        return Err(TokenError::InvalidFormat(
            "token too short to contain a user ID".to_string(),
        ));
    }
    let (id_str, after) = rest.split_at(UUID_LEN);
    let user_id = Uuid::parse_str(id_str).map_err(|e| TokenError::InvalidUserId(e.to_string()))?;

    let hmac_hex = after
        .strip_prefix('_')
        .ok_or_else(|| TokenError::InvalidFormat("expected underscore after user ID".to_string()))?;
    let provided = hex::decode(hmac_hex)
        .map_err(|e| TokenError::InvalidFormat(format!("invalid hex in hmac: {e}")))?;

    let mut mac = new_mac(&config.secret);
    mac.update(user_id.to_string().as_bytes());
    mac.verify_slice(&provided)
        .map_err(|_| TokenError::HmacMismatch)?;

    Ok(user_id)
}

fn new_mac(key: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length, so this cannot fail.
    match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC can take a key of any size"),
    }
}

fn compute_hmac(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = new_mac(key);
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}
