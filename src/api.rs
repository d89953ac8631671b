//! API Client Module
//!
//! HTTP communication with the loyalty backend: credential injection on
//! the request path and 401-triggered token refresh on the response path.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::storage::SessionStore;

/// Side-channel header carrying the Telegram identity payload.
pub const TELEGRAM_INIT_DATA_HEADER: &str = "X-Telegram-Init-Data";

/// Whether a call carries the stored access token.
///
/// Login, refresh, and registration endpoints are `NoAuth` so they never
/// depend on a soon-to-be-replaced token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthMode {
    Bearer,
    NoAuth,
}

/// A caller suspended on the in-flight refresh; settled exactly once.
type Waiter = oneshot::Sender<Result<String, ApiError>>;

/// Single-flight gate for token refresh, owned by the client instance.
///
/// Invariant: at most one refresh call is in flight. Every 401 observed
/// while `Refreshing` enqueues a waiter instead of refreshing again.
enum RefreshState {
    Idle,
    Refreshing(Vec<Waiter>),
}

/// API client for the loyalty backend
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
    store: Arc<SessionStore>,
    refresh: Mutex<RefreshState>,
}

impl ApiClient {
    /// Create a new API client with the default request timeout.
    pub fn new(base_url: &str, store: Arc<SessionStore>) -> Self {
        Self::with_timeout(base_url, store, Duration::from_secs(30))
    }

    /// Create a new API client.
    ///
    /// The timeout bounds every call including the refresh, so waiters
    /// queued behind a hung refresh always settle.
    pub fn with_timeout(base_url: &str, store: Arc<SessionStore>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            store,
            refresh: Mutex::new(RefreshState::Idle),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach credentials from the store.
    ///
    /// The Telegram identity payload rides along whenever it is stored,
    /// regardless of auth mode; the bearer token only on `Bearer` calls.
    fn decorate(&self, builder: reqwest::RequestBuilder, auth: AuthMode) -> reqwest::RequestBuilder {
        let session = self.store.session();

        let builder = match (auth, session.access_token) {
            (AuthMode::Bearer, Some(token)) => builder.bearer_auth(token),
            _ => builder,
        };

        match session.telegram_init_data {
            Some(init_data) => builder.header(TELEGRAM_INIT_DATA_HEADER, init_data),
            None => builder,
        }
    }

    /// Send a request, recovering once from an expired access token.
    ///
    /// A 401 on a `Bearer` call runs (or joins) the refresh protocol and
    /// retries the original request once with the new token. The retried
    /// response is returned as-is, so a second 401 propagates.
    async fn execute<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        auth: AuthMode,
    ) -> Result<T, ApiError> {
        let request = self
            .decorate(builder, auth)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let retry = request.try_clone();

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if response.status() != StatusCode::UNAUTHORIZED || auth == AuthMode::NoAuth {
            return Self::decode(response).await;
        }

        let original = Self::error_from(response).await;
        debug!("Access token rejected, entering refresh");
        let access = self.refresh_access_token(original).await?;

        let Some(mut request) = retry else {
            return Err(ApiError::Network("request cannot be retried".into()));
        };
        let bearer: HeaderValue = format!("Bearer {access}")
            .parse()
            .map_err(|_| ApiError::Network("access token is not a valid header value".into()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::decode(response).await
    }

    /// Run the refresh, or wait for the one already in flight.
    ///
    /// Returns the new access token. `original` is the 401 error that
    /// triggered the protocol; it is what callers see when no refresh
    /// token is stored.
    async fn refresh_access_token(&self, original: ApiError) -> Result<String, ApiError> {
        let waiter = {
            let mut state = self.refresh.lock().unwrap();
            match &mut *state {
                RefreshState::Refreshing(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing(Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            debug!("Refresh already in flight, waiting for its outcome");
            return match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(ApiError::Network("token refresh was abandoned".into())),
            };
        }

        let outcome = self.run_refresh(original).await;

        // Back to idle before any waiter observes the outcome.
        let waiters = {
            let mut state = self.refresh.lock().unwrap();
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Refreshing(waiters) => waiters,
                RefreshState::Idle => Vec::new(),
            }
        };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }

        outcome
    }

    async fn run_refresh(&self, original: ApiError) -> Result<String, ApiError> {
        let Some(refresh_token) = self.store.refresh_token() else {
            warn!("No refresh token stored, logging out");
            self.store.clear();
            return Err(original);
        };

        // The refresh endpoint is itself a no-auth call and must never
        // re-enter the 401 recovery, so it bypasses `execute`.
        let builder = self
            .client
            .post(self.url("/token/refresh/"))
            .json(&RefreshRequest {
                refresh: &refresh_token,
            });
        let result = async {
            let request = self
                .decorate(builder, AuthMode::NoAuth)
                .build()
                .map_err(|e| ApiError::Network(e.to_string()))?;
            let response = self
                .client
                .execute(request)
                .await
                .map_err(|e| ApiError::Network(e.to_string()))?;
            Self::decode::<TokenPair>(response).await
        }
        .await;

        match result {
            Ok(pair) => {
                info!("Access token refreshed");
                self.store.set_tokens(pair.access.clone(), pair.refresh);
                Ok(pair.access)
            }
            Err(e) => {
                warn!("Token refresh failed, logging out: {e}");
                self.store.clear();
                Err(e)
            }
        }
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }

    /// Build a [`ApiError::Server`] from an error response, surfacing the
    /// backend's `detail` message when it sent one.
    async fn error_from(response: reqwest::Response) -> ApiError {
        let status = response.status().as_u16();
        let detail = match response.json::<ErrorDetail>().await {
            Ok(body) => body.detail,
            Err(_) => format!("status {status}"),
        };
        ApiError::Server { status, detail }
    }

    // === Authentication ===

    /// Obtain a token pair with username/password credentials.
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair, ApiError> {
        debug!("Logging in as: {username}");
        let builder = self
            .client
            .post(self.url("/token/"))
            .json(&LoginRequest { username, password });
        self.execute(builder, AuthMode::NoAuth).await
    }

    /// Staff login with a one-time code.
    pub async fn login_barista_with_code(
        &self,
        username: &str,
        code: &str,
    ) -> Result<TokenPair, ApiError> {
        debug!("Logging in staff member: {username}");
        let builder = self
            .client
            .post(self.url("/barista/login-with-code/"))
            .json(&CodeLoginRequest { username, code });
        self.execute(builder, AuthMode::NoAuth).await
    }

    /// Exchange a Telegram identity payload for a token pair.
    pub async fn telegram_auth(&self, init_data: &str) -> Result<TokenPair, ApiError> {
        debug!("Exchanging Telegram identity payload");
        let builder = self
            .client
            .post(self.url("/telegram-auth/"))
            .json(&TelegramAuthRequest { init_data });
        self.execute(builder, AuthMode::NoAuth).await
    }

    /// Fetch the authenticated user with their role flags.
    pub async fn get_me(&self) -> Result<CurrentUser, ApiError> {
        let builder = self.client.get(self.url("/me/"));
        self.execute(builder, AuthMode::Bearer).await
    }

    // === Profile ===

    pub async fn get_profile(&self) -> Result<UserProfile, ApiError> {
        let builder = self.client.get(self.url("/user/profile/"));
        self.execute(builder, AuthMode::Bearer).await
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile, ApiError> {
        let builder = self
            .client
            .patch(self.url("/user/profile/"))
            .json(update);
        self.execute(builder, AuthMode::Bearer).await
    }

    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> Result<ActionResponse, ApiError> {
        let builder = self
            .client
            .post(self.url("/change_password/"))
            .json(&ChangePasswordRequest {
                old_password,
                new_password,
            });
        self.execute(builder, AuthMode::Bearer).await
    }

    // === Loyalty ===

    /// Query the loyalty card for a username.
    pub async fn loyalty_status(&self, username: &str) -> Result<LoyaltyStatus, ApiError> {
        let builder = self
            .client
            .get(self.url("/loyalty/status/"))
            .query(&[("username", username)]);
        self.execute(builder, AuthMode::Bearer).await
    }

    /// Query the loyalty card by Telegram username (staff panel lookup).
    pub async fn loyalty_status_by_telegram(
        &self,
        telegram_username: &str,
    ) -> Result<LoyaltyStatus, ApiError> {
        let path = format!("/loyalty/status-by-telegram/{telegram_username}/");
        let builder = self.client.get(self.url(&path));
        self.execute(builder, AuthMode::Bearer).await
    }

    /// Add stamps to a customer's card.
    pub async fn add_stamp(&self, username: &str, amount: u32) -> Result<StampResponse, ApiError> {
        info!("Adding {amount} stamp(s) for {username}");
        let builder = self
            .client
            .post(self.url("/loyalty/add-stamp/"))
            .json(&AddStampRequest { username, amount });
        self.execute(builder, AuthMode::Bearer).await
    }

    /// Add stamps to a customer's card, addressed by Telegram username.
    pub async fn add_stamp_by_telegram(
        &self,
        telegram_username: &str,
        amount: u32,
    ) -> Result<StampResponse, ApiError> {
        info!("Adding {amount} stamp(s) for telegram user {telegram_username}");
        let builder = self
            .client
            .post(self.url("/loyalty/add-stamp-by-telegram/"))
            .json(&AddStampByTelegramRequest {
                telegram_username,
                amount,
            });
        self.execute(builder, AuthMode::Bearer).await
    }

    /// Generate a one-time redemption code for the current customer.
    pub async fn generate_code(&self) -> Result<CodeResponse, ApiError> {
        let builder = self.client.post(self.url("/loyalty/generate-code/"));
        self.execute(builder, AuthMode::Bearer).await
    }

    /// Redeem a customer's code (staff side).
    pub async fn redeem_code(&self, code: &str) -> Result<CodeStatus, ApiError> {
        let builder = self
            .client
            .post(self.url("/loyalty/redeem-code/"))
            .json(&CodeRequest { code });
        self.execute(builder, AuthMode::Bearer).await
    }

    /// Check a code without consuming it.
    pub async fn check_code(&self, code: &str) -> Result<CodeStatus, ApiError> {
        let builder = self
            .client
            .post(self.url("/loyalty/check-code/"))
            .json(&CodeRequest { code });
        self.execute(builder, AuthMode::Bearer).await
    }

    /// Reset the current customer's card.
    pub async fn reset_loyalty(&self) -> Result<ActionResponse, ApiError> {
        let builder = self.client.post(self.url("/loyalty/reset/"));
        self.execute(builder, AuthMode::Bearer).await
    }

    // === Registration ===

    pub async fn register_user(&self, request: &RegisterRequest<'_>) -> Result<ActionResponse, ApiError> {
        info!("Registering user: {}", request.username);
        let builder = self.client.post(self.url("/register/")).json(request);
        self.execute(builder, AuthMode::NoAuth).await
    }

    pub async fn register_barista(
        &self,
        request: &RegisterRequest<'_>,
    ) -> Result<ActionResponse, ApiError> {
        info!("Registering staff member: {}", request.username);
        let builder = self
            .client
            .post(self.url("/barista/register/"))
            .json(request);
        self.execute(builder, AuthMode::NoAuth).await
    }

    /// Confirm a staff registration with the verification code.
    pub async fn barista_verify_code(
        &self,
        username: &str,
        code: &str,
    ) -> Result<ActionResponse, ApiError> {
        let builder = self
            .client
            .post(self.url("/barista/verify-code/"))
            .json(&CodeLoginRequest { username, code });
        self.execute(builder, AuthMode::NoAuth).await
    }
}

// Request/Response types

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct CodeLoginRequest<'a> {
    username: &'a str,
    code: &'a str,
}

#[derive(Serialize)]
struct TelegramAuthRequest<'a> {
    init_data: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Serialize)]
struct ChangePasswordRequest<'a> {
    old_password: &'a str,
    new_password: &'a str,
}

#[derive(Serialize)]
struct AddStampRequest<'a> {
    username: &'a str,
    amount: u32,
}

#[derive(Serialize)]
struct AddStampByTelegramRequest<'a> {
    telegram_username: &'a str,
    amount: u32,
}

#[derive(Serialize)]
struct CodeRequest<'a> {
    code: &'a str,
}

#[derive(Debug, Serialize)]
pub struct RegisterRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telegram_username: Option<&'a str>,
}

/// Access/refresh pair returned by the token endpoints.
///
/// The refresh endpoint may omit `refresh` when it does not rotate.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentUser {
    pub username: String,
    #[serde(default)]
    pub is_barista: bool,
    #[serde(default)]
    pub is_staff: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub telegram_username: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telegram_username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoyaltyStatus {
    #[serde(default)]
    pub username: String,
    pub stamps: u32,
    #[serde(default)]
    pub stamps_required: Option<u32>,
    #[serde(default)]
    pub rewards_available: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StampResponse {
    #[serde(default)]
    pub stamps: u32,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodeResponse {
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodeStatus {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionResponse {
    #[serde(default)]
    pub detail: String,
}

#[derive(Deserialize)]
struct ErrorDetail {
    detail: String,
}

/// API errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {detail}")]
    Server { status: u16, detail: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),
}

impl ApiError {
    /// True for an HTTP 401/403 authorization failure.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ApiError::Server {
                status: 401 | 403,
                ..
            }
        )
    }
}
