use chrono::{DateTime, Duration, Utc};

use super::token::decode_claims;
use crate::api::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Restoring,
    Unauthenticated,
    Authenticated,
}

/// Credentials and validity window of a logged-in principal.
///
/// Token and subject always travel together; `expires_at` comes from the
/// token's own claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionData {
    token: String,
    subject: String,
    expires_at: DateTime<Utc>,
}

impl SessionData {
    /// Decode `token` and pair it with `subject`.
    pub fn from_token(token: String, subject: String) -> Result<Self, ApiError> {
        let expires_at = decode_claims(&token)?.expires_at()?;
        Ok(Self { token, subject, expires_at })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }
}

/// The client's current belief about who is logged in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Session {
    #[default]
    Restoring,
    Unauthenticated,
    Authenticated(SessionData),
}

impl Session {
    pub fn state(&self) -> AuthState {
        match self {
            Session::Restoring => AuthState::Restoring,
            Session::Unauthenticated => AuthState::Unauthenticated,
            Session::Authenticated(_) => AuthState::Authenticated,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Session::Authenticated(_))
    }

    pub fn data(&self) -> Option<&SessionData> {
        match self {
            Session::Authenticated(data) => Some(data),
            _ => None,
        }
    }

    /// Get the bearer token if a principal is logged in
    pub fn token(&self) -> Option<&str> {
        self.data().map(SessionData::token)
    }

    pub fn subject(&self) -> Option<&str> {
        self.data().map(SessionData::subject)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.data().map(SessionData::expires_at)
    }
}
