//! Core library for fintrack, a personal finance client.
//!
//! - `auth`: the session manager and persisted session storage
//! - `api`: the gateway every backend call flows through
//! - `dashboard`: six-month summaries shaped for charts and tables
//! - `models`: wire types for users, categories, transactions and summaries
//! - `notify`: user-visible notices
//! - `config`: configuration file and environment overrides

pub mod api;
pub mod auth;
pub mod config;
pub mod dashboard;
pub mod models;
pub mod notify;
pub mod utils;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthState, EndReason, Session, SessionManager};
pub use config::Config;
pub use dashboard::Dashboard;
pub use notify::{Notice, NoticeLevel, Notifier};
