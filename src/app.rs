//! Wiring for the whole client: one bus, one API client, one cart store, one
//! session, all sharing the same instances.

use std::sync::Arc;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::http::ApiClient;
use crate::notify::NotificationBus;
use crate::realtime::{CartStore, ConnectionSettings};
use crate::session::SessionStore;
use crate::storage::{FileStorage, TokenStorage};

pub struct App {
    pub config: ClientConfig,
    pub notifications: NotificationBus,
    pub api: Arc<ApiClient>,
    pub carts: Arc<CartStore>,
    pub session: Arc<SessionStore>,
}

impl App {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ClientConfig, storage: Arc<dyn TokenStorage>) -> Result<Self, ClientError> {
        let notifications = NotificationBus::with_default_timeout(config.notification_timeout());
        let api = Arc::new(ApiClient::new(&config)?);
        let carts = Arc::new(CartStore::new(
            Arc::clone(&api),
            notifications.clone(),
            ConnectionSettings::from_config(&config),
        ));
        let session = SessionStore::new(Arc::clone(&api), Arc::clone(&carts), notifications.clone(), storage);

        tracing::debug!(api_url = %config.api_url, ws_url = %config.ws_url, "client assembled");
        Ok(Self { config, notifications, api, carts, session })
    }

    /// Assemble with tokens persisted at `config.token_file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the token file cannot be opened or the HTTP
    /// client cannot be built.
    pub fn from_config(config: ClientConfig) -> Result<Self, ClientError> {
        let storage = FileStorage::open(&config.token_file)?;
        Self::new(config, Arc::new(storage))
    }

    /// Restore any persisted session.
    pub async fn start(&self) {
        self.session.initialize().await;
    }
}

#[cfg(test)]
#[path = "app_test.rs"]
mod tests;
