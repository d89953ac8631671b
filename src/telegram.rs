//! Telegram Host Module
//!
//! Detects the embedding host and hands its identity payload to the
//! session store before bootstrap.

use tracing::{debug, info};

use crate::storage::SessionStore;

/// Environment the client runs inside, injected at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEnvironment {
    /// Plain standalone process, no embedding host.
    Standalone,
    /// Running inside the Telegram host, with its signed identity payload.
    Telegram { init_data: String },
}

impl HostEnvironment {
    /// Detect the host from the embedder hand-off.
    ///
    /// The Telegram shell passes the signed `initData` string through the
    /// `TELEGRAM_INIT_DATA` environment variable.
    pub fn detect() -> Self {
        match std::env::var("TELEGRAM_INIT_DATA") {
            Ok(init_data) if !init_data.is_empty() => {
                info!("Running inside the Telegram host");
                Self::Telegram { init_data }
            }
            _ => Self::Standalone,
        }
    }

    pub fn is_telegram(&self) -> bool {
        matches!(self, Self::Telegram { .. })
    }

    /// Deposit the identity payload into the store.
    ///
    /// The payload is validated server-side on every call that carries it,
    /// so it is stored opaquely.
    pub fn deposit(&self, store: &SessionStore) {
        if let Self::Telegram { init_data } = self {
            debug!("Storing Telegram identity payload");
            store.set_telegram_init_data(init_data);
        }
    }
}
