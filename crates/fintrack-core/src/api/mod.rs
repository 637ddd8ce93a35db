//! REST API gateway for the fintrack backend.
//!
//! This module provides the `ApiClient` through which every backend call
//! flows, and the `ApiError` taxonomy those calls fail with.
//!
//! The backend uses bearer token authentication; the token is obtained from
//! the form-encoded `/token` endpoint and held by the session manager.

pub mod client;
pub mod error;

pub use client::{ApiClient, DEFAULT_CATEGORIES};
pub use error::ApiError;
