//! Loyalty Companion Library
//!
//! Client-side session management for the loyalty backend: persisted
//! token store, auto-refreshing API client, and startup bootstrap.

pub mod api;
pub mod auth;
pub mod config;
pub mod guard;
pub mod logging;
pub mod storage;
pub mod telegram;

use std::sync::Arc;

use api::ApiClient;
use auth::AuthSession;
use config::Config;
use storage::SessionStore;
use telegram::HostEnvironment;

/// Application state shared across commands
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub api: Arc<ApiClient>,
    pub auth: AuthSession,
}

impl AppState {
    /// Wire the client components together for the given host.
    ///
    /// A Telegram host's identity payload is deposited into the store
    /// here, before any bootstrap runs.
    pub fn new(config: &Config, host: HostEnvironment) -> Self {
        let store = Arc::new(SessionStore::open(&config.data_dir));
        host.deposit(&store);

        let api = Arc::new(ApiClient::with_timeout(
            &config.api_base_url,
            Arc::clone(&store),
            config.http_timeout,
        ));
        let auth = AuthSession::new(Arc::clone(&store), Arc::clone(&api), host);

        Self { store, api, auth }
    }
}
