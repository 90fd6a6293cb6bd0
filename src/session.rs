//! Token and user lifecycle.
//!
//! DESIGN
//! ======
//! The store is the single owner of the token pair. It persists the pair
//! before exposing it, hands the access token to the realtime client, and
//! serves as the [`AuthBridge`] the API client calls back into on a 401.
//!
//! Clearing the session bumps a generation counter. Work that started under
//! an older generation (a refresh or profile fetch racing a logout) discards
//! its result instead of resurrecting the session.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::ClientError;
use crate::http::{ApiClient, AuthBridge};
use crate::notify::{NotificationBus, Variant};
use crate::realtime::CartStore;
use crate::storage::{ACCESS_KEY, REFRESH_KEY, TokenStorage};
use crate::types::{AuthResponse, Credentials, RefreshRequest, RegisterPayload, User};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<User>,
}

impl Session {
    /// Both tokens and a loaded profile.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some() && self.refresh_token.is_some() && self.user.is_some()
    }
}

pub struct SessionStore {
    api: Arc<ApiClient>,
    carts: Arc<CartStore>,
    notifications: NotificationBus,
    storage: Arc<dyn TokenStorage>,
    state: RwLock<Session>,
    generation: AtomicU64,
    initialized: AtomicBool,
    loading: AtomicBool,
}

impl SessionStore {
    /// Build the store from persisted tokens and register it with `api`.
    #[must_use]
    pub fn new(
        api: Arc<ApiClient>,
        carts: Arc<CartStore>,
        notifications: NotificationBus,
        storage: Arc<dyn TokenStorage>,
    ) -> Arc<Self> {
        let restored = Session {
            access_token: storage.get(ACCESS_KEY),
            refresh_token: storage.get(REFRESH_KEY),
            user: None,
        };
        tracing::debug!(
            has_access = restored.access_token.is_some(),
            has_refresh = restored.refresh_token.is_some(),
            "session restored from storage"
        );

        let store = Arc::new(Self {
            api,
            carts,
            notifications,
            storage,
            state: RwLock::new(restored),
            generation: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            loading: AtomicBool::new(false),
        });
        let bridge = Arc::clone(&store) as Arc<dyn AuthBridge>;
        store.api.install_auth_bridge(Arc::downgrade(&bridge));
        store
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    /// # Errors
    ///
    /// Propagates the login or profile error. A rejected login leaves the
    /// session as it was.
    pub async fn login(&self, credentials: &Credentials) -> Result<User, ClientError> {
        let _loading = LoadingGuard::raise(&self.loading);
        let auth: AuthResponse = self.api.post_without_refresh("/auth/login", credentials).await?;
        tracing::info!(user_id = %auth.user.id, "logged in");

        self.set_session(auth)?;
        self.notifications.push(Variant::Success, "Welcome!");
        self.fetch_profile().await
    }

    /// # Errors
    ///
    /// Propagates the registration or profile error.
    pub async fn register(&self, payload: &RegisterPayload) -> Result<User, ClientError> {
        let _loading = LoadingGuard::raise(&self.loading);
        let auth: AuthResponse = self.api.post_without_refresh("/auth/register", payload).await?;
        tracing::info!(user_id = %auth.user.id, "registered");

        self.set_session(auth)?;
        self.notifications.push(Variant::Success, "Registration complete");
        self.fetch_profile().await
    }

    /// Invalidate the session remotely if possible, then clear it locally.
    pub async fn logout(&self) {
        if self.access_token().is_some()
            && let Err(error) = self.api.post_empty_without_refresh("/auth/logout").await
        {
            tracing::debug!(%error, "remote logout failed; clearing locally");
        }
        self.clear_session();
        tracing::info!("logged out");
    }

    /// Exchange the refresh token for a new pair and return the access token.
    ///
    /// # Errors
    ///
    /// - [`ClientError::MissingRefreshToken`] when there is nothing to exchange
    /// - [`ClientError::SessionChanged`] when the session was cleared meanwhile
    /// - the remote error otherwise
    ///
    /// Every failure except `SessionChanged` clears the session.
    pub async fn refresh_session(&self) -> Result<String, ClientError> {
        let Some(refresh_token) = self.refresh_token() else {
            self.clear_session();
            return Err(ClientError::MissingRefreshToken);
        };

        let generation = self.generation.load(Ordering::SeqCst);
        let result: Result<AuthResponse, ClientError> = self
            .api
            .post_without_refresh("/auth/refresh", &RefreshRequest { refresh_token: &refresh_token })
            .await;

        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::warn!("session cleared during refresh; discarding result");
            return Err(ClientError::SessionChanged);
        }

        match result {
            Ok(auth) => {
                let token = auth.access_token.clone();
                self.set_session(auth)?;
                tracing::info!("session refreshed");
                Ok(token)
            }
            Err(error) => {
                tracing::warn!(%error, "session refresh rejected");
                self.clear_session();
                Err(error)
            }
        }
    }

    /// Restore a persisted session. Runs at most once per store.
    pub async fn initialize(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }

        let Session { access_token: Some(access_token), refresh_token: Some(_), .. } = self.session() else {
            self.clear_session();
            return;
        };

        self.carts.set_auth_token(Some(access_token));
        match self.fetch_profile().await {
            Ok(_) | Err(ClientError::SessionChanged) => {}
            Err(error) => {
                tracing::warn!(%error, "stored session could not be restored");
                self.clear_session();
            }
        }
    }

    /// # Errors
    ///
    /// Propagates the API error, or [`ClientError::SessionChanged`] if the
    /// session was cleared while the request was in flight.
    pub async fn fetch_profile(&self) -> Result<User, ClientError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let user: User = self.api.get("/users/me").await?;

        if self.generation.load(Ordering::SeqCst) != generation {
            return Err(ClientError::SessionChanged);
        }
        self.write_state().user = Some(user.clone());
        Ok(user)
    }

    /// Persist and install a token pair plus user.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] if the tokens cannot be persisted; the
    /// in-memory session is then left unchanged.
    pub fn set_session(&self, auth: AuthResponse) -> Result<(), ClientError> {
        self.storage.set(ACCESS_KEY, &auth.access_token)?;
        self.storage.set(REFRESH_KEY, &auth.refresh_token)?;

        let access_token = auth.access_token.clone();
        *self.write_state() = Session {
            access_token: Some(auth.access_token),
            refresh_token: Some(auth.refresh_token),
            user: Some(auth.user),
        };
        self.carts.set_auth_token(Some(access_token));
        Ok(())
    }

    pub fn clear_session(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.write_state() = Session::default();

        for key in [ACCESS_KEY, REFRESH_KEY] {
            if let Err(error) = self.storage.remove(key) {
                tracing::warn!(%error, key, "failed to remove stored token");
            }
        }
        self.carts.reset();
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[must_use]
    pub fn session(&self) -> Session {
        self.read_state().clone()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.read_state().access_token.clone()
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.read_state().refresh_token.clone()
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.read_state().user.clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.read_state().is_authenticated()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, Session> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, Session> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl AuthBridge for SessionStore {
    fn access_token(&self) -> Option<String> {
        SessionStore::access_token(self)
    }

    fn refresh_token(&self) -> Option<String> {
        SessionStore::refresh_token(self)
    }

    async fn refresh_session(&self) -> Result<String, ClientError> {
        SessionStore::refresh_session(self).await
    }

    async fn force_logout(&self) {
        self.logout().await;
    }
}

/// Holds the loading flag up until dropped.
struct LoadingGuard<'a>(&'a AtomicBool);

impl<'a> LoadingGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
