//! Authentication module for managing user sessions.
//!
//! This module provides:
//! - `SessionManager`: login, registration, logout, restoration and expiry
//! - `Session`: the published authentication state
//! - `SessionStore`: durable storage for the token and username (file,
//!   OS keychain, or memory)
//!
//! Token expiry is read from the token's own claim; the backend remains the
//! authority on whether a token is genuine.

pub mod manager;
pub mod session;
pub mod storage;
pub mod token;

pub use manager::{EndReason, SessionManager};
pub use session::{AuthState, Session, SessionData};
pub use storage::{FileStore, KeyringStore, MemoryStore, SessionStore};
pub use token::{decode_claims, TokenClaims};
