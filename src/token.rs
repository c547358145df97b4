//! Resumption credential codec.
//!
//! A token is `base64url(claims JSON) "." hex(HMAC-SHA256(secret, payload))`.
//! It binds the issuing endpoint, the session id, and the session's private
//! topic, and expires by age. Tokens are opaque to clients; they echo them
//! back verbatim on every poll.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Current claims layout version.
pub const TOKEN_VERSION: u8 = 1;

// ============================================================================
// Claims
// ============================================================================

/// What a verified token proves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub v: u8,
    /// Identity of the endpoint instance that minted the token. Direct
    /// addressing is only attempted when this matches the current process.
    pub endpoint: String,
    /// Session id, resolvable to an in-process handle on the origin endpoint.
    pub session: String,
    /// The session's private bus topic, valid across process restarts.
    pub topic: String,
    /// Issue time, unix seconds.
    pub iat: i64,
}

impl Claims {
    pub fn new(endpoint: &str, session: &str, topic: &str) -> Self {
        Self {
            v: TOKEN_VERSION,
            endpoint: endpoint.to_string(),
            session: session.to_string(),
            topic: topic.to_string(),
            iat: Utc::now().timestamp(),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,

    #[error("token signature mismatch")]
    BadSignature,

    #[error("token has expired")]
    Expired,
}

// ============================================================================
// Codec
// ============================================================================

/// Signs and verifies resumption credentials with a process-wide secret.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
}

impl TokenCodec {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn sign(&self, claims: &Claims) -> String {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap_or_default());
        let signature = hex::encode(self.mac(payload.as_bytes()));
        format!("{payload}.{signature}")
    }

    /// Verify signature, layout, and age. The signature check runs in
    /// constant time via `Mac::verify_slice`.
    pub fn verify(&self, token: &str, max_age: Duration) -> Result<Claims, TokenError> {
        let (payload, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let signature = hex::decode(signature).map_err(|_| TokenError::Malformed)?;

        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::Malformed)?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        let claims: Claims =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;
        if claims.v != TOKEN_VERSION {
            return Err(TokenError::Malformed);
        }

        let age = Utc::now().timestamp().saturating_sub(claims.iat);
        if age > max_age.as_secs() as i64 {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    fn mac(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

// ============================================================================
// Tests
// ============================================================================
