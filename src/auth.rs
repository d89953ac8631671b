//! Auth Session Module
//!
//! Establishes a valid session at startup and on explicit login.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::api::{ApiClient, ApiError};
use crate::guard::Route;
use crate::storage::{Role, SessionStore};
use crate::telegram::HostEnvironment;

/// Session readiness, advanced by [`AuthSession::bootstrap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    Unloaded,
    Loading,
    ReadyAuthenticated,
    ReadyAnonymous,
}

/// Orchestrates login, startup bootstrap, and logout.
pub struct AuthSession {
    store: Arc<SessionStore>,
    api: Arc<ApiClient>,
    host: HostEnvironment,
    phase: Mutex<BootstrapPhase>,
    gate: tokio::sync::Mutex<()>,
}

impl AuthSession {
    pub fn new(store: Arc<SessionStore>, api: Arc<ApiClient>, host: HostEnvironment) -> Self {
        Self {
            store,
            api,
            host,
            phase: Mutex::new(BootstrapPhase::Unloaded),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn phase(&self) -> BootstrapPhase {
        *self.phase.lock().unwrap()
    }

    /// Establish a session at startup.
    ///
    /// Inside the Telegram host, a stored identity payload is exchanged
    /// for a token pair first (failure is swallowed: the user may not be
    /// registered yet, and the payload is retained for registration).
    /// A stored access token is then validated by fetching the profile,
    /// which also resolves the role.
    ///
    /// Only one bootstrap runs at a time; a concurrent call is a no-op.
    pub async fn bootstrap(&self) {
        let Ok(_guard) = self.gate.try_lock() else {
            return;
        };
        *self.phase.lock().unwrap() = BootstrapPhase::Loading;

        if self.host.is_telegram() && self.store.access_token().is_none() {
            if let Some(init_data) = self.store.telegram_init_data() {
                match self.api.telegram_auth(&init_data).await {
                    Ok(pair) => {
                        info!("Authenticated via Telegram identity");
                        self.store.set_tokens(pair.access, pair.refresh);
                    }
                    Err(e) => {
                        warn!("Telegram authentication failed: {e}");
                    }
                }
            }
        }

        let phase = if self.store.access_token().is_some() {
            self.load_profile().await
        } else {
            BootstrapPhase::ReadyAnonymous
        };
        *self.phase.lock().unwrap() = phase;
    }

    async fn load_profile(&self) -> BootstrapPhase {
        match self.api.get_me().await {
            Ok(user) => {
                let role = if user.is_barista || user.is_staff {
                    Role::Staff
                } else {
                    Role::Customer
                };
                self.store.set_role(role);
                info!("Session ready for {} ({role})", user.username);
                BootstrapPhase::ReadyAuthenticated
            }
            Err(e) if e.is_auth_failure() => {
                warn!("Stored credentials rejected, clearing session");
                self.store.clear();
                BootstrapPhase::ReadyAnonymous
            }
            Err(e) => {
                // Transient failure: the session stays untouched so the
                // caller can retry later.
                warn!("Profile fetch failed: {e}");
                BootstrapPhase::ReadyAnonymous
            }
        }
    }

    /// Password login.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let pair = self.api.login(username, password).await?;
        self.store.set_tokens(pair.access, pair.refresh);
        Ok(())
    }

    /// Staff login with a one-time code.
    pub async fn login_barista(&self, username: &str, code: &str) -> Result<(), ApiError> {
        let pair = self.api.login_barista_with_code(username, code).await?;
        self.store.set_tokens(pair.access, pair.refresh);
        Ok(())
    }

    /// Login with the stored Telegram identity payload.
    pub async fn login_telegram(&self) -> Result<(), ApiError> {
        let Some(init_data) = self.store.telegram_init_data() else {
            return Err(ApiError::MissingCredential(
                "no Telegram identity payload stored".into(),
            ));
        };
        let pair = self.api.telegram_auth(&init_data).await?;
        self.store.set_tokens(pair.access, pair.refresh);
        Ok(())
    }

    /// Clear the session and report where to navigate.
    ///
    /// Returns `Some(Route::Login)` unless already on the login route.
    pub fn logout(&self, current: Route) -> Option<Route> {
        info!("Logging out");
        self.store.clear();
        *self.phase.lock().unwrap() = BootstrapPhase::Unloaded;
        (current != Route::Login).then_some(Route::Login)
    }
}
