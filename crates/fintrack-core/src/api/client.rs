//! API gateway for the fintrack backend.
//!
//! Every backend call goes through [`ApiClient`]. It attaches the bearer
//! token held by the session manager, decodes JSON responses, and reports
//! each failure to the user exactly once before handing it back.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Local, NaiveDate};
use reqwest::{header, Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::auth::Session;
use crate::config::Config;
use crate::models::{
    Category, CategoryTotal, Credentials, MonthlySummary, NewCategory, NewTransaction,
    TokenResponse, Transaction, TransactionKind, User,
};
use crate::notify::{Notice, Notifier};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Expense categories created for a brand new account.
pub const DEFAULT_CATEGORIES: [&str; 4] = ["Food & Dining", "Transportation", "Housing", "Entertainment"];

const TOKEN_ENDPOINT: &str = "/token";
const USERS_ENDPOINT: &str = "/users";
const INCOME_EXPENSE_SUMMARY_ENDPOINT: &str = "/summary/income-expenses";
const EXPENSES_BY_CATEGORY_ENDPOINT: &str = "/summary/expenses-by-category";

/// Called with the bearer token the backend refused; returns whether that
/// ended the current session.
pub(crate) type RejectionHook = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// API client for the fintrack backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: watch::Receiver<Session>,
    notifier: Arc<dyn Notifier>,
    on_rejected: Option<RejectionHook>,
}

impl ApiClient {
    /// Create a client that reads its bearer token from `session`.
    pub fn new(
        config: &Config,
        session: watch::Receiver<Session>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            session,
            notifier,
            on_rejected: None,
        })
    }

    pub(crate) fn with_rejection_hook(mut self, hook: RejectionHook) -> Self {
        self.on_rejected = Some(hook);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Snapshot of the current token. Taken once per request so a concurrent
    /// logout cannot change credentials halfway through building it.
    fn bearer_token(&self) -> Option<String> {
        self.session.borrow().token().map(str::to_owned)
    }

    // ===== Dispatch =====

    /// Issue one call against `endpoint`.
    ///
    /// Returns `None` for a success response without content and the parsed
    /// JSON otherwise. Failures are reported to the notifier before being
    /// returned, so callers must not report them again.
    pub async fn call(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<Option<Value>, ApiError> {
        let token = self.bearer_token();
        let result = match self.dispatch(endpoint, method, body, token.as_deref()).await {
            Ok((status, text)) => Self::parse(endpoint, status, &text),
            Err(e) => Err(e),
        };
        self.surface(token.as_deref(), result)
    }

    async fn request<T, B>(&self, method: Method, endpoint: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let token = self.bearer_token();
        let result = match self.dispatch(endpoint, method, body, token.as_deref()).await {
            Ok((status, text)) => Self::parse(endpoint, status, &text).and_then(|v| Self::decode(endpoint, v)),
            Err(e) => Err(e),
        };
        self.surface(token.as_deref(), result)
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        self.request::<T, ()>(Method::GET, endpoint, None).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, endpoint: &str, body: &B) -> Result<T, ApiError> {
        self.request(Method::POST, endpoint, Some(body)).await
    }

    /// Any success response counts; its body is never decoded.
    async fn delete(&self, endpoint: &str) -> Result<(), ApiError> {
        let token = self.bearer_token();
        let result = self
            .dispatch::<()>(endpoint, Method::DELETE, None, token.as_deref())
            .await
            .map(|_| ());
        self.surface(token.as_deref(), result)
    }

    /// Send the request and check the status. Returns the raw success body.
    async fn dispatch<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&B>,
        token: Option<&str>,
    ) -> Result<(StatusCode, String), ApiError> {
        let mut request = self
            .client
            .request(method.clone(), self.url(endpoint))
            .header(header::CONTENT_TYPE, "application/json");

        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(%method, endpoint, "Sending request");
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            warn!(%method, endpoint, %status, body = %ApiError::truncate_body(&text), "Request failed");
            return Err(ApiError::from_status(status, &text));
        }
        Ok((status, text))
    }

    fn parse(endpoint: &str, status: StatusCode, text: &str) -> Result<Option<Value>, ApiError> {
        if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(text)
            .map(Some)
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", endpoint, e)))
    }

    fn decode<T: DeserializeOwned>(endpoint: &str, value: Option<Value>) -> Result<T, ApiError> {
        serde_json::from_value(value.unwrap_or(Value::Null))
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", endpoint, e)))
    }

    /// Report a failure once, then pass the result through unchanged.
    ///
    /// A 401 for the token the session still holds ends that session
    /// through the rejection hook, whose notice replaces the generic one.
    fn surface<T>(&self, token: Option<&str>, result: Result<T, ApiError>) -> Result<T, ApiError> {
        if let Err(ref e) = result {
            let session_ended = match (token, &self.on_rejected) {
                (Some(token), Some(hook)) if e.is_unauthorized() => hook(token),
                _ => false,
            };
            if !session_ended {
                self.notifier.notify(Notice::error(e.to_string()));
            }
        }
        result
    }

    fn reject<T>(&self, message: &str) -> Result<T, ApiError> {
        self.surface(None, Err(ApiError::Validation(message.to_string())))
    }

    // ===== Authentication =====

    /// Exchange credentials for a bearer token.
    ///
    /// The body is form-encoded, unlike every other endpoint. Failures are not
    /// reported to the notifier here; the session manager owns the login notice.
    pub async fn request_token(&self, username: &str, password: &str) -> Result<TokenResponse, ApiError> {
        let response = self
            .client
            .post(self.url(TOKEN_ENDPOINT))
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, username, "Token request rejected");
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    ApiError::InvalidCredentials
                }
                _ => ApiError::from_status(status, &body),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", TOKEN_ENDPOINT, e)))
    }

    /// Create an account. Does not log in.
    pub async fn register(&self, username: &str, password: &str) -> Result<User, ApiError> {
        self.post(USERS_ENDPOINT, &Credentials { username, password }).await
    }

    // ===== Categories =====

    pub async fn list_categories_for(&self, kind: TransactionKind) -> Result<Vec<Category>, ApiError> {
        self.get(kind.categories_path()).await
    }

    pub async fn create_category_for(&self, kind: TransactionKind, name: &str) -> Result<Category, ApiError> {
        let category = match NewCategory::parse(name) {
            Ok(category) => category,
            Err(message) => return self.reject(message),
        };
        self.post(kind.categories_path(), &category).await
    }

    pub async fn list_categories(&self) -> Result<Vec<Category>, ApiError> {
        self.list_categories_for(TransactionKind::Expense).await
    }

    pub async fn create_category(&self, name: &str) -> Result<Category, ApiError> {
        self.create_category_for(TransactionKind::Expense, name).await
    }

    pub async fn list_income_categories(&self) -> Result<Vec<Category>, ApiError> {
        self.list_categories_for(TransactionKind::Income).await
    }

    pub async fn create_income_category(&self, name: &str) -> Result<Category, ApiError> {
        self.create_category_for(TransactionKind::Income, name).await
    }

    /// Seed the default expense categories for an account that has none.
    ///
    /// Each create is awaited before the next so the categories appear in a
    /// stable order.
    pub async fn ensure_default_categories(&self) -> Result<Vec<Category>, ApiError> {
        let existing = self.list_categories().await?;
        if !existing.is_empty() {
            return Ok(existing);
        }

        let mut created = Vec::with_capacity(DEFAULT_CATEGORIES.len());
        for name in DEFAULT_CATEGORIES {
            created.push(self.create_category(name).await?);
        }
        debug!(count = created.len(), "Created default categories");
        self.notifier
            .notify(Notice::success("Default expense categories have been created"));
        Ok(created)
    }

    // ===== Transactions =====

    pub async fn list_transactions(&self, kind: TransactionKind) -> Result<Vec<Transaction>, ApiError> {
        self.get(kind.path()).await
    }

    pub async fn create_transaction(
        &self,
        kind: TransactionKind,
        record: &NewTransaction,
    ) -> Result<Transaction, ApiError> {
        if let Err(message) = record.validate(Local::now().date_naive()) {
            return self.reject(message);
        }
        self.post(kind.path(), record).await
    }

    pub async fn delete_transaction(&self, kind: TransactionKind, id: i64) -> Result<(), ApiError> {
        self.delete(&format!("{}/{}", kind.path(), id)).await
    }

    pub async fn list_expenses(&self) -> Result<Vec<Transaction>, ApiError> {
        self.list_transactions(TransactionKind::Expense).await
    }

    pub async fn create_expense(&self, expense: &NewTransaction) -> Result<Transaction, ApiError> {
        self.create_transaction(TransactionKind::Expense, expense).await
    }

    pub async fn delete_expense(&self, id: i64) -> Result<(), ApiError> {
        self.delete_transaction(TransactionKind::Expense, id).await
    }

    pub async fn list_income(&self) -> Result<Vec<Transaction>, ApiError> {
        self.list_transactions(TransactionKind::Income).await
    }

    pub async fn create_income(&self, income: &NewTransaction) -> Result<Transaction, ApiError> {
        self.create_transaction(TransactionKind::Income, income).await
    }

    pub async fn delete_income(&self, id: i64) -> Result<(), ApiError> {
        self.delete_transaction(TransactionKind::Income, id).await
    }

    // ===== Summaries =====

    pub async fn income_expense_summary(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<MonthlySummary>, ApiError> {
        self.get(&date_range_endpoint(INCOME_EXPENSE_SUMMARY_ENDPOINT, start, end)).await
    }

    pub async fn expenses_by_category(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<CategoryTotal>, ApiError> {
        self.get(&date_range_endpoint(EXPENSES_BY_CATEGORY_ENDPOINT, start, end)).await
    }
}

/// Append `start_date`/`end_date` query parameters, only those that are set.
fn date_range_endpoint(path: &str, start: Option<NaiveDate>, end: Option<NaiveDate>) -> String {
    let params: Vec<String> = [("start_date", start), ("end_date", end)]
        .into_iter()
        .filter_map(|(name, date)| date.map(|d| format!("{}={}", name, d.format("%Y-%m-%d"))))
        .collect();

    if params.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, params.join("&"))
    }
}
