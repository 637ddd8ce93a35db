//! Reading the unsigned claim payload of a bearer token.
//!
//! Only the expiry (and subject, when present) are read, to schedule the local
//! expiry action. The signature is never checked here: a token that decodes
//! cleanly proves nothing about its authenticity, and the backend re-verifies
//! it on every request.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::api::ApiError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    /// Expiry as seconds since the Unix epoch
    pub exp: i64,
    #[serde(default)]
    pub sub: Option<String>,
}

impl TokenClaims {
    pub fn expires_at(&self) -> Result<DateTime<Utc>, ApiError> {
        DateTime::from_timestamp(self.exp, 0)
            .ok_or_else(|| ApiError::TokenInvalid(format!("exp out of range: {}", self.exp)))
    }
}

/// Decode the claim segment of a `header.payload.signature` token.
pub fn decode_claims(token: &str) -> Result<TokenClaims, ApiError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
        _ => return Err(ApiError::TokenInvalid("expected three dot-separated segments".into())),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.as_bytes())
        .or_else(|_| URL_SAFE.decode(payload.as_bytes()))
        .map_err(|e| ApiError::TokenInvalid(format!("payload is not base64url: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::TokenInvalid(format!("payload is not a claim object: {}", e)))
}
