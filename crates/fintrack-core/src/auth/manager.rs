//! Session manager: the single owner of "who is logged in".
//!
//! The manager restores the persisted session on startup, performs login,
//! registration and logout, and ends the session on its own when the token's
//! expiry claim passes. The current [`Session`] is published through a watch
//! channel; the API gateway and any UI layer hold receivers and only read it.
//!
//! Every transition runs under one lock, which also guards the single pending
//! expiry task. Entering `Authenticated` replaces that task; leaving it
//! cancels the task. A task that still fires after being replaced finds a
//! newer generation and does nothing.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::session::{Session, SessionData};
use super::storage::{SessionStore, TOKEN_KEY, USERNAME_KEY};
use crate::api::{ApiClient, ApiError};
use crate::config::Config;
use crate::models::User;
use crate::notify::{Notice, Notifier};

pub const LOGIN_SUCCESS_NOTICE: &str = "Successfully logged in";
pub const LOGIN_FAILED_NOTICE: &str = "Failed to login. Please check your credentials.";
pub const REGISTER_SUCCESS_NOTICE: &str = "Registration successful. Please log in.";
pub const LOGOUT_NOTICE: &str = "Successfully logged out";
pub const SESSION_EXPIRED_NOTICE: &str = "Your session has expired. Please log in again.";
pub const TOKEN_INVALID_NOTICE: &str = "Your session could not be read. Please log in again.";
pub const SESSION_REJECTED_NOTICE: &str = "Your session is no longer valid. Please log in again.";
pub const MISSING_FIELDS_NOTICE: &str = "Please fill in all fields";
pub const SESSION_NOT_SAVED_NOTICE: &str =
    "Your session could not be saved. You will need to log in again next time.";

/// Why a session left the `Authenticated` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    UserLogout,
    Expired,
    TokenInvalid,
    Rejected,
}

impl EndReason {
    pub fn notice(&self) -> Notice {
        match self {
            EndReason::UserLogout => Notice::success(LOGOUT_NOTICE),
            EndReason::Expired => Notice::warning(SESSION_EXPIRED_NOTICE),
            EndReason::TokenInvalid => Notice::warning(TOKEN_INVALID_NOTICE),
            EndReason::Rejected => Notice::warning(SESSION_REJECTED_NOTICE),
        }
    }
}

struct ExpiryTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Transitions {
    timer: Option<ExpiryTimer>,
    generation: u64,
}

struct Shared {
    session: watch::Sender<Session>,
    store: Arc<dyn SessionStore>,
    notifier: Arc<dyn Notifier>,
    transitions: Mutex<Transitions>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Transitions> {
        self.transitions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        self.store.get(key)
    }

    /// Returns whether the session was written to storage.
    fn persist(&self, data: &SessionData) -> bool {
        let result = self
            .store
            .set(TOKEN_KEY, data.token())
            .and_then(|_| self.store.set(USERNAME_KEY, data.subject()));
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to persist session");
                false
            }
        }
    }

    fn clear_store(&self) {
        for key in [TOKEN_KEY, USERNAME_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!(error = %e, key, "Failed to clear persisted session entry");
            }
        }
    }

    /// Publish `data` as the current session and arm its expiry task,
    /// replacing any task still pending.
    fn enter_authenticated(self: &Arc<Self>, guard: &mut Transitions, data: SessionData) {
        if let Some(old) = guard.timer.take() {
            old.handle.abort();
        }
        guard.generation += 1;
        let generation = guard.generation;

        let delay = data.time_until_expiry().to_std().unwrap_or(Duration::ZERO);
        debug!(generation, delay_secs = delay.as_secs(), "Scheduling session expiry");

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.fire_expiry(generation);
            }
        });
        guard.timer = Some(ExpiryTimer { generation, handle });
        self.session.send_replace(Session::Authenticated(data));
    }

    /// Clear the session in memory and in storage, cancelling any pending
    /// expiry task. Returns whether a session was active.
    fn clear(&self, guard: &mut Transitions) -> bool {
        if let Some(timer) = guard.timer.take() {
            timer.handle.abort();
        }
        let previous = self.session.send_replace(Session::Unauthenticated);
        self.clear_store();
        previous.is_authenticated()
    }

    fn fire_expiry(&self, generation: u64) {
        let mut guard = self.lock();
        match guard.timer {
            Some(ref timer) if timer.generation == generation => {}
            _ => {
                debug!(generation, "Ignoring superseded expiry task");
                return;
            }
        }
        // Detach rather than abort: this is the task being taken.
        guard.timer = None;
        let was_authenticated = self.clear(&mut guard);
        drop(guard);

        if was_authenticated {
            info!("Session expired");
            self.notifier.notify(EndReason::Expired.notice());
        }
    }

    fn end(&self, reason: EndReason) -> bool {
        let was_authenticated = {
            let mut guard = self.lock();
            self.clear(&mut guard)
        };
        if was_authenticated {
            info!(?reason, "Session ended");
            self.notifier.notify(reason.notice());
        } else {
            debug!(?reason, "No active session to end");
        }
        was_authenticated
    }

    /// End the session only if it still holds `token`. A rejection for a
    /// token that has since been replaced leaves the new session alone.
    fn reject(&self, token: &str) -> bool {
        let was_authenticated = {
            let mut guard = self.lock();
            let current = self.session.borrow().token() == Some(token);
            if !current {
                debug!("Rejected token is no longer current");
                return false;
            }
            self.clear(&mut guard)
        };
        if was_authenticated {
            info!(reason = ?EndReason::Rejected, "Session ended");
            self.notifier.notify(EndReason::Rejected.notice());
        }
        was_authenticated
    }

    /// Move out of `Restoring` based on what storage holds.
    fn restore(self: &Arc<Self>) {
        let mut guard = self.lock();
        let ended = match (self.read(TOKEN_KEY), self.read(USERNAME_KEY)) {
            (Ok(Some(token)), Ok(Some(username))) => match SessionData::from_token(token, username) {
                Ok(data) if !data.is_expired() => {
                    info!(
                        username = data.subject(),
                        expires_at = %data.expires_at(),
                        "Restored session"
                    );
                    self.enter_authenticated(&mut guard, data);
                    None
                }
                Ok(data) => {
                    info!(expired_at = %data.expires_at(), "Persisted session has expired");
                    self.clear(&mut guard);
                    Some(EndReason::Expired)
                }
                Err(e) => {
                    warn!(error = %e, "Persisted token is malformed");
                    self.clear(&mut guard);
                    Some(EndReason::TokenInvalid)
                }
            },
            (Ok(None), Ok(None)) => {
                debug!("No persisted session");
                self.session.send_replace(Session::Unauthenticated);
                None
            }
            (Ok(_), Ok(_)) => {
                warn!("Persisted session is incomplete, clearing it");
                self.clear(&mut guard);
                None
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to read persisted session");
                self.session.send_replace(Session::Unauthenticated);
                None
            }
        };
        drop(guard);

        if let Some(reason) = ended {
            self.notifier.notify(reason.notice());
        }
    }
}

pub struct SessionManager {
    shared: Arc<Shared>,
    api: ApiClient,
}

impl SessionManager {
    /// Build the manager and restore any persisted session.
    ///
    /// Must be called from within a Tokio runtime; a restored session
    /// schedules its expiry task immediately.
    pub fn restore(
        config: &Config,
        store: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let (tx, rx) = watch::channel(Session::Restoring);
        let shared = Arc::new(Shared {
            session: tx,
            store,
            notifier: notifier.clone(),
            transitions: Mutex::new(Transitions::default()),
        });

        let weak = Arc::downgrade(&shared);
        let api = ApiClient::new(config, rx, notifier)?.with_rejection_hook(Arc::new(move |token: &str| {
            weak.upgrade().is_some_and(|shared| shared.reject(token))
        }));

        shared.restore();
        Ok(Self { shared, api })
    }

    /// Restore using the storage backend named in `config`.
    pub fn from_config(config: &Config, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let store = config.session_store()?;
        Self::restore(config, store, notifier)
    }

    /// Gateway that authenticates with this manager's token.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> Session {
        self.shared.session.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.shared.session.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.shared.session.borrow().is_authenticated()
    }

    pub fn username(&self) -> Option<String> {
        self.shared.session.borrow().subject().map(str::to_owned)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.shared.session.borrow().expires_at()
    }

    pub fn has_pending_expiry(&self) -> bool {
        self.shared.lock().timer.is_some()
    }

    fn notify(&self, notice: Notice) {
        self.shared.notifier.notify(notice);
    }

    fn require_fields(&self, username: &str, password: &str) -> Result<(), ApiError> {
        if username.trim().is_empty() || password.is_empty() {
            self.notify(Notice::error(MISSING_FIELDS_NOTICE));
            return Err(ApiError::Validation(MISSING_FIELDS_NOTICE.to_string()));
        }
        Ok(())
    }

    /// Log in, replacing any current session.
    ///
    /// On success the new session is published before this returns, so the
    /// next gateway call already carries the new token.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        self.require_fields(username, password)?;

        let response = match self.api.request_token(username, password).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, username, "Login failed");
                self.notify(Notice::error(login_failure_message(&e)));
                return Err(e);
            }
        };
        if !response.token_type.eq_ignore_ascii_case("bearer") {
            debug!(token_type = %response.token_type, "Unexpected token type");
        }

        let data = match SessionData::from_token(response.access_token, username.to_string()) {
            Ok(data) if !data.is_expired() => data,
            Ok(_) => {
                warn!(username, "Backend issued an already expired token");
                self.notify(EndReason::Expired.notice());
                return Err(ApiError::SessionExpired);
            }
            Err(e) => {
                warn!(error = %e, username, "Backend issued an unreadable token");
                self.notify(EndReason::TokenInvalid.notice());
                return Err(e);
            }
        };

        let saved = {
            let mut guard = self.shared.lock();
            let saved = self.shared.persist(&data);
            self.shared.enter_authenticated(&mut guard, data);
            saved
        };
        info!(username, saved, "Login successful");
        self.notify(Notice::success(LOGIN_SUCCESS_NOTICE));
        if !saved {
            self.notify(Notice::warning(SESSION_NOT_SAVED_NOTICE));
        }
        Ok(())
    }

    /// Create an account. The caller logs in separately afterwards.
    pub async fn register(&self, username: &str, password: &str) -> Result<User, ApiError> {
        self.require_fields(username, password)?;

        // The gateway has already reported any failure; only reclassify here.
        match self.api.register(username, password).await {
            Ok(user) => {
                info!(username, "Registration successful");
                self.notify(Notice::success(REGISTER_SUCCESS_NOTICE));
                Ok(user)
            }
            Err(ApiError::Api { status, message }) if status.is_client_error() => {
                debug!(%status, %message, "Registration refused");
                Err(ApiError::UsernameTaken)
            }
            Err(e) => Err(e),
        }
    }

    /// End the session. Calling this with no active session does nothing
    /// beyond making sure storage is empty.
    pub fn logout(&self) {
        self.shared.end(EndReason::UserLogout);
    }

    /// End the session if `err` shows the backend rejected our token.
    /// Returns whether a session was ended.
    ///
    /// Calls made through [`Self::api`] already do this for the token they
    /// sent, so this only matters for errors from elsewhere.
    pub fn handle_rejection(&self, err: &ApiError) -> bool {
        if err.is_unauthorized() {
            self.shared.end(EndReason::Rejected)
        } else {
            false
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(timer) = self.shared.lock().timer.take() {
            timer.handle.abort();
        }
    }
}

fn login_failure_message(err: &ApiError) -> String {
    match err {
        ApiError::InvalidCredentials => LOGIN_FAILED_NOTICE.to_string(),
        ApiError::Network(_) => "Unable to connect to server. Check your internet connection.".to_string(),
        ApiError::Api { status, .. } if *status == StatusCode::TOO_MANY_REQUESTS => {
            "Server is busy. Please wait a moment and try again.".to_string()
        }
        other => format!("Login failed: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::{FileStore, MemoryStore};
    use crate::auth::token::testing::{token_expiring_in, token_with_claims};
    use crate::auth::AuthState;
    use crate::notify::testing::RecordingNotifier;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const WAIT: Duration = Duration::from_secs(10);

    fn config_for(base_url: &str) -> Config {
        Config {
            api_base_url: base_url.to_string(),
            ..Config::default()
        }
    }

    fn manager_with(store: Arc<dyn SessionStore>, base_url: &str) -> (SessionManager, RecordingNotifier) {
        let notifier = RecordingNotifier::default();
        let manager = SessionManager::restore(&config_for(base_url), store, Arc::new(notifier.clone()))
            .expect("manager builds");
        (manager, notifier)
    }

    fn persisted(token: &str, username: &str) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.set(TOKEN_KEY, token).expect("set token");
        store.set(USERNAME_KEY, username).expect("set username");
        store
    }

    async fn mount_token(server: &MockServer, token: &str) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": token, "token_type": "bearer"})),
            )
            .mount(server)
            .await;
    }

    async fn wait_until_logged_out(manager: &SessionManager) {
        let mut rx = manager.subscribe();
        tokio::time::timeout(WAIT, rx.wait_for(|s| !s.is_authenticated()))
            .await
            .expect("session should expire in time")
            .expect("sender alive");
    }

    #[tokio::test]
    async fn test_restore_valid_session() {
        let token = token_expiring_in("alice", 3600);
        let store = persisted(&token, "alice");
        let (manager, notifier) = manager_with(store, "http://127.0.0.1:9");

        assert!(manager.is_authenticated());
        assert_eq!(manager.session().state(), AuthState::Authenticated);
        assert_eq!(manager.username().as_deref(), Some("alice"));
        assert!(manager.expires_at().is_some());
        assert!(manager.has_pending_expiry());
        assert!(notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_restore_expired_session_clears_storage() {
        let store = persisted(&token_expiring_in("alice", -60), "alice");
        let (manager, notifier) = manager_with(store.clone(), "http://127.0.0.1:9");

        assert!(!manager.is_authenticated());
        assert!(!manager.has_pending_expiry());
        assert_eq!(store.get(TOKEN_KEY).expect("read"), None);
        assert_eq!(store.get(USERNAME_KEY).expect("read"), None);
        assert_eq!(notifier.count(SESSION_EXPIRED_NOTICE), 1);
    }

    #[tokio::test]
    async fn test_restore_malformed_token_clears_storage() {
        let store = persisted("definitely-not-a-token", "alice");
        let (manager, notifier) = manager_with(store.clone(), "http://127.0.0.1:9");

        assert!(!manager.is_authenticated());
        assert_eq!(store.get(TOKEN_KEY).expect("read"), None);
        assert_eq!(notifier.count(TOKEN_INVALID_NOTICE), 1);
    }

    #[tokio::test]
    async fn test_restore_without_session() {
        let (manager, notifier) = manager_with(Arc::new(MemoryStore::new()), "http://127.0.0.1:9");
        assert_eq!(manager.session(), Session::Unauthenticated);
        assert_eq!(manager.username(), None);
        assert!(notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_restore_incomplete_session_is_cleared() {
        let store = Arc::new(MemoryStore::new());
        store.set(TOKEN_KEY, &token_expiring_in("alice", 3600)).expect("set");
        let (manager, _) = manager_with(store.clone(), "http://127.0.0.1:9");

        assert!(!manager.is_authenticated());
        assert_eq!(store.get(TOKEN_KEY).expect("read"), None);
    }

    #[tokio::test]
    async fn test_session_survives_restart_with_file_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = MockServer::start().await;
        let token = token_expiring_in("alice", 3600);
        mount_token(&server, &token).await;

        {
            let store = Arc::new(FileStore::new(dir.path().to_path_buf()));
            let (manager, _) = manager_with(store, &server.uri());
            manager.login("alice", "pw").await.expect("login");
        }

        let store = Arc::new(FileStore::new(dir.path().to_path_buf()));
        let (restarted, _) = manager_with(store, &server.uri());
        assert!(restarted.is_authenticated());
        assert_eq!(restarted.username().as_deref(), Some("alice"));
        assert_eq!(restarted.session().token(), Some(token.as_str()));
    }

    #[tokio::test]
    async fn test_login_persists_and_authenticates_next_call() {
        let server = MockServer::start().await;
        let token = token_expiring_in("alice", 3600);
        mount_token(&server, &token).await;
        Mock::given(method("GET"))
            .and(path("/expenses"))
            .and(header("authorization", format!("Bearer {}", token).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let (manager, notifier) = manager_with(store.clone(), &server.uri());
        manager.login("alice", "pw").await.expect("login");

        assert!(manager.is_authenticated());
        assert_eq!(store.get(TOKEN_KEY).expect("read").as_deref(), Some(token.as_str()));
        assert_eq!(store.get(USERNAME_KEY).expect("read").as_deref(), Some("alice"));
        assert_eq!(notifier.count(LOGIN_SUCCESS_NOTICE), 1);

        let expenses = manager.api().list_expenses().await.expect("authenticated call");
        assert!(expenses.is_empty());
    }

    #[tokio::test]
    async fn test_login_with_bad_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"detail": "Incorrect username or password"})),
            )
            .mount(&server)
            .await;

        let (manager, notifier) = manager_with(Arc::new(MemoryStore::new()), &server.uri());
        let err = manager.login("alice", "wrong").await.expect_err("rejected");

        assert!(matches!(err, ApiError::InvalidCredentials));
        assert!(!manager.is_authenticated());
        assert_eq!(notifier.notices(), vec![Notice::error(LOGIN_FAILED_NOTICE)]);
    }

    #[tokio::test]
    async fn test_login_when_backend_unreachable() {
        let (manager, notifier) = manager_with(Arc::new(MemoryStore::new()), "http://127.0.0.1:9");
        let err = manager.login("alice", "pw").await.expect_err("no backend");
        assert!(matches!(err, ApiError::Network(_)));
        assert_eq!(notifier.notices().len(), 1);
    }

    #[tokio::test]
    async fn test_login_requires_both_fields() {
        let server = MockServer::start().await;
        let (manager, notifier) = manager_with(Arc::new(MemoryStore::new()), &server.uri());

        let err = manager.login("  ", "pw").await.expect_err("blank username");
        assert!(matches!(err, ApiError::Validation(_)));
        assert_eq!(notifier.count(MISSING_FIELDS_NOTICE), 1);
        assert!(server.received_requests().await.expect("recording").is_empty());
    }

    #[tokio::test]
    async fn test_login_with_unreadable_token() {
        let server = MockServer::start().await;
        mount_token(&server, "opaque-but-not-jwt").await;

        let store = Arc::new(MemoryStore::new());
        let (manager, notifier) = manager_with(store.clone(), &server.uri());
        let err = manager.login("alice", "pw").await.expect_err("unreadable token");

        assert!(matches!(err, ApiError::TokenInvalid(_)));
        assert!(!manager.is_authenticated());
        assert_eq!(store.get(TOKEN_KEY).expect("read"), None);
        assert_eq!(notifier.count(TOKEN_INVALID_NOTICE), 1);
    }

    #[tokio::test]
    async fn test_logout_twice_is_a_no_op() {
        let store = persisted(&token_expiring_in("alice", 3600), "alice");
        let (manager, notifier) = manager_with(store.clone(), "http://127.0.0.1:9");
        assert!(manager.is_authenticated());

        manager.logout();
        manager.logout();

        assert!(!manager.is_authenticated());
        assert!(!manager.has_pending_expiry());
        assert_eq!(store.get(TOKEN_KEY).expect("read"), None);
        assert_eq!(notifier.count(LOGOUT_NOTICE), 1);
        assert_eq!(notifier.notices().len(), 1);
    }

    #[tokio::test]
    async fn test_expiry_fires_once_and_clears_session() {
        let store = persisted(&token_expiring_in("alice", 2), "alice");
        let (manager, notifier) = manager_with(store.clone(), "http://127.0.0.1:9");
        assert!(manager.is_authenticated());

        wait_until_logged_out(&manager).await;

        assert!(!manager.has_pending_expiry());
        assert_eq!(store.get(TOKEN_KEY).expect("read"), None);
        assert_eq!(notifier.count(SESSION_EXPIRED_NOTICE), 1);

        // A later logout is a no-op rather than a second notice
        manager.logout();
        assert_eq!(notifier.notices().len(), 1);
    }

    #[tokio::test]
    async fn test_login_expire_login_expire_gives_two_notices() {
        let server = MockServer::start().await;
        let (manager, notifier) = manager_with(Arc::new(MemoryStore::new()), &server.uri());

        for round in 1..=2 {
            server.reset().await;
            mount_token(&server, &token_expiring_in("alice", 2)).await;

            manager.login("alice", "pw").await.expect("login");
            assert!(manager.has_pending_expiry());

            wait_until_logged_out(&manager).await;
            assert_eq!(notifier.count(SESSION_EXPIRED_NOTICE), round);
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(notifier.count(SESSION_EXPIRED_NOTICE), 2);
        assert_eq!(notifier.count(LOGIN_SUCCESS_NOTICE), 2);
    }

    #[tokio::test]
    async fn test_relogin_replaces_pending_expiry() {
        let server = MockServer::start().await;
        let (manager, notifier) = manager_with(Arc::new(MemoryStore::new()), &server.uri());

        mount_token(&server, &token_expiring_in("alice", 2)).await;
        manager.login("alice", "pw").await.expect("first login");

        server.reset().await;
        let second = token_expiring_in("alice", 3);
        mount_token(&server, &second).await;
        manager.login("alice", "pw").await.expect("second login");
        assert_eq!(manager.session().token(), Some(second.as_str()));

        wait_until_logged_out(&manager).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(notifier.count(SESSION_EXPIRED_NOTICE), 1);
    }

    #[tokio::test]
    async fn test_logout_cancels_pending_expiry() {
        let store = persisted(&token_expiring_in("alice", 2), "alice");
        let (manager, notifier) = manager_with(store, "http://127.0.0.1:9");
        manager.logout();

        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(notifier.count(SESSION_EXPIRED_NOTICE), 0);
        assert_eq!(notifier.count(LOGOUT_NOTICE), 1);
    }

    #[tokio::test]
    async fn test_rejection_ends_session() {
        let store = persisted(&token_expiring_in("alice", 3600), "alice");
        let (manager, notifier) = manager_with(store, "http://127.0.0.1:9");

        let not_auth = ApiError::Api {
            status: StatusCode::UNAUTHORIZED,
            message: "Could not validate credentials".into(),
        };
        let server_error = ApiError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "boom".into(),
        };

        assert!(!manager.handle_rejection(&server_error));
        assert!(manager.is_authenticated());

        assert!(manager.handle_rejection(&not_auth));
        assert!(!manager.is_authenticated());
        assert_eq!(notifier.count(SESSION_REJECTED_NOTICE), 1);

        assert!(!manager.handle_rejection(&not_auth));
        assert_eq!(notifier.count(SESSION_REJECTED_NOTICE), 1);
    }

    #[tokio::test]
    async fn test_register_success_does_not_authenticate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 5, "username": "bob"})))
            .expect(1)
            .mount(&server)
            .await;

        let (manager, notifier) = manager_with(Arc::new(MemoryStore::new()), &server.uri());
        let user = manager.register("bob", "pw").await.expect("registered");

        assert_eq!(user, User { id: 5, username: "bob".into() });
        assert!(!manager.is_authenticated());
        assert_eq!(notifier.count(REGISTER_SUCCESS_NOTICE), 1);
    }

    #[tokio::test]
    async fn test_register_taken_username_notifies_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"detail": "Username already registered"})),
            )
            .mount(&server)
            .await;

        let (manager, notifier) = manager_with(Arc::new(MemoryStore::new()), &server.uri());
        let err = manager.register("bob", "pw").await.expect_err("taken");

        assert!(matches!(err, ApiError::UsernameTaken));
        assert_eq!(notifier.notices(), vec![Notice::error("Username already registered")]);
    }

    #[tokio::test]
    async fn test_register_server_error_stays_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"detail": "Database unavailable"})))
            .mount(&server)
            .await;

        let (manager, notifier) = manager_with(Arc::new(MemoryStore::new()), &server.uri());
        let err = manager.register("bob", "pw").await.expect_err("server error");

        assert!(
            matches!(err, ApiError::Api { status, ref message } if status == StatusCode::INTERNAL_SERVER_ERROR && message == "Database unavailable")
        );
        assert_eq!(notifier.notices(), vec![Notice::error("Database unavailable")]);
    }

    #[tokio::test]
    async fn test_register_when_backend_unreachable() {
        let (manager, notifier) = manager_with(Arc::new(MemoryStore::new()), "http://127.0.0.1:9");
        let err = manager.register("bob", "pw").await.expect_err("no backend");

        assert!(matches!(err, ApiError::Network(_)));
        let notices = notifier.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, crate::notify::NoticeLevel::Error);
    }

    /// Storage that accepts reads but refuses every write.
    struct ReadOnlyStore;

    impl SessionStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(anyhow::anyhow!("disk full"))
        }

        fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_login_warns_when_session_cannot_be_saved() {
        let server = MockServer::start().await;
        mount_token(&server, &token_expiring_in("alice", 3600)).await;

        let (manager, notifier) = manager_with(Arc::new(ReadOnlyStore), &server.uri());
        manager.login("alice", "pw").await.expect("login still succeeds");

        assert!(manager.is_authenticated());
        assert_eq!(
            notifier.notices(),
            vec![Notice::success(LOGIN_SUCCESS_NOTICE), Notice::warning(SESSION_NOT_SAVED_NOTICE)]
        );
    }

    #[tokio::test]
    async fn test_unauthorized_call_ends_session_with_one_notice() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/expenses"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"detail": "Could not validate credentials"})),
            )
            .mount(&server)
            .await;

        let store = persisted(&token_expiring_in("alice", 3600), "alice");
        let (manager, notifier) = manager_with(store.clone(), &server.uri());
        assert!(manager.is_authenticated());

        let err = manager.api().list_expenses().await.expect_err("rejected");
        assert!(err.is_unauthorized());
        assert!(!manager.is_authenticated());
        assert!(!manager.has_pending_expiry());
        assert_eq!(store.get(TOKEN_KEY).expect("read"), None);
        assert_eq!(notifier.notices(), vec![Notice::warning(SESSION_REJECTED_NOTICE)]);

        // The caller's own follow-up finds nothing left to end.
        assert!(!manager.handle_rejection(&err));
        assert_eq!(notifier.notices().len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_of_replaced_token_keeps_new_session() {
        let server = MockServer::start().await;
        let fresh = token_expiring_in("alice", 7200);
        mount_token(&server, &fresh).await;

        let stale = token_expiring_in("alice", 3600);
        let (manager, notifier) = manager_with(persisted(&stale, "alice"), &server.uri());
        manager.login("alice", "pw").await.expect("login");

        assert!(!manager.shared.reject(&stale));
        assert!(manager.is_authenticated());
        assert_eq!(manager.session().token(), Some(fresh.as_str()));
        assert_eq!(notifier.count(SESSION_REJECTED_NOTICE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_session_expires_on_schedule() {
        let store = persisted(&token_expiring_in("alice", 3600), "alice");
        let (manager, notifier) = manager_with(store.clone(), "http://127.0.0.1:9");
        assert!(manager.has_pending_expiry());

        // Paused clock: the runtime skips ahead to the expiry timer.
        let mut rx = manager.subscribe();
        tokio::time::timeout(Duration::from_secs(7200), rx.wait_for(|s| !s.is_authenticated()))
            .await
            .expect("expires within the hour")
            .expect("sender alive");

        assert!(!manager.has_pending_expiry());
        assert_eq!(store.get(TOKEN_KEY).expect("read"), None);
        assert_eq!(notifier.count(SESSION_EXPIRED_NOTICE), 1);
    }

    #[tokio::test]
    async fn test_subject_comes_from_login_username() {
        let server = MockServer::start().await;
        let token = token_with_claims(json!({"sub": "user-17", "exp": Utc::now().timestamp() + 600}));
        mount_token(&server, &token).await;

        let (manager, _) = manager_with(Arc::new(MemoryStore::new()), &server.uri());
        manager.login("alice", "pw").await.expect("login");
        assert_eq!(manager.username().as_deref(), Some("alice"));
    }

    #[test]
    fn test_login_failure_messages() {
        assert_eq!(login_failure_message(&ApiError::InvalidCredentials), LOGIN_FAILED_NOTICE);
        let busy = ApiError::Api {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: "slow down".into(),
        };
        assert!(login_failure_message(&busy).contains("busy"));
        let other = ApiError::Api {
            status: StatusCode::BAD_GATEWAY,
            message: "upstream".into(),
        };
        assert_eq!(login_failure_message(&other), "Login failed: upstream");
    }
}
