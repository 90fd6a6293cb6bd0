//! Cart state plus the realtime link that keeps it fresh.
//!
//! DESIGN
//! ======
//! Carts are whole snapshots keyed by id. REST responses and realtime pushes
//! both go through [`replace_cart`], so whichever snapshot arrives last wins.
//!
//! The link is keyed by access token. Asking for a connection with the token
//! already in use is a no-op; a different token, or a task that has exited,
//! replaces the connection.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::connection::{Connection, ConnectionSettings};
use super::protocol::{ClientEvent, ServerEvent};
use crate::error::ClientError;
use crate::http::ApiClient;
use crate::notify::{NotificationBus, Variant};
use crate::types::{
    AddCartItemPayload, Cart, CreateCartPayload, ShareCartPayload, UpdateCartItemPayload, replace_cart,
};

/// State the connection task writes into.
pub(crate) struct CartShared {
    carts: RwLock<Vec<Cart>>,
    active_cart_id: RwLock<Option<String>>,
    notifications: NotificationBus,
}

impl CartShared {
    pub(crate) fn new(notifications: NotificationBus) -> Self {
        Self { carts: RwLock::new(Vec::new()), active_cart_id: RwLock::new(None), notifications }
    }

    pub(crate) fn apply(&self, event: ServerEvent) {
        match event {
            ServerEvent::CartUpdate(cart) => {
                let text = format!("{} updated", cart.name);
                tracing::debug!(cart_id = %cart.id, "cart:update received");
                self.replace(cart);
                self.notifications.push(Variant::Info, text);
            }
            ServerEvent::CartRefresh(cart) => {
                tracing::debug!(cart_id = %cart.id, "cart:refresh received");
                self.replace(cart);
            }
            ServerEvent::Other(event) => tracing::debug!(%event, "ignoring realtime event"),
        }
    }

    pub(crate) fn active_cart_id(&self) -> Option<String> {
        self.active_cart_id.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_active(&self, cart_id: Option<String>) {
        *self.active_cart_id.write().unwrap_or_else(PoisonError::into_inner) = cart_id;
    }

    fn replace(&self, cart: Cart) {
        replace_cart(&mut self.carts.write().unwrap_or_else(PoisonError::into_inner), cart);
    }

    fn replace_all(&self, carts: Vec<Cart>) {
        *self.carts.write().unwrap_or_else(PoisonError::into_inner) = carts;
    }

    fn snapshot(&self) -> Vec<Cart> {
        self.carts.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[derive(Default)]
struct Link {
    auth_token: Option<String>,
    connection: Option<Connection>,
}

pub struct CartStore {
    api: Arc<ApiClient>,
    shared: Arc<CartShared>,
    link: Mutex<Link>,
    settings: ConnectionSettings,
}

impl CartStore {
    #[must_use]
    pub fn new(api: Arc<ApiClient>, notifications: NotificationBus, settings: ConnectionSettings) -> Self {
        Self {
            api,
            shared: Arc::new(CartShared::new(notifications)),
            link: Mutex::new(Link::default()),
            settings,
        }
    }

    // =========================================================================
    // CONNECTION
    // =========================================================================

    /// Install or clear the realtime credential.
    ///
    /// `None` tears everything down. A token (re)connects unless a live
    /// connection already uses it, then re-joins the active cart.
    pub fn set_auth_token(&self, token: Option<String>) {
        let Some(token) = token else {
            self.reset();
            return;
        };

        let mut link = self.lock_link();
        link.auth_token = Some(token);
        let spawned = self.ensure_connection(&mut link);
        if !spawned && let Some(cart_id) = self.shared.active_cart_id() {
            announce(&link, cart_id);
        }
    }

    /// Make `cart_id` the active cart and join its room.
    ///
    /// The previously active room is not left.
    pub fn join_cart(&self, cart_id: &str) {
        self.shared.set_active(Some(cart_id.to_owned()));

        let mut link = self.lock_link();
        if !self.ensure_connection(&mut link) {
            announce(&link, cart_id.to_owned());
        }
    }

    /// Drop carts, the active selection, the connection, and the credential.
    pub fn reset(&self) {
        let connection = {
            let mut link = self.lock_link();
            link.auth_token = None;
            link.connection.take()
        };
        if let Some(connection) = connection {
            connection.close();
        }
        self.shared.replace_all(Vec::new());
        self.shared.set_active(None);
        tracing::debug!("cart state reset");
    }

    /// Returns whether a new connection was started. A new connection joins
    /// the active cart itself once the socket is up.
    fn ensure_connection(&self, link: &mut Link) -> bool {
        let Some(token) = link.auth_token.clone() else {
            return false;
        };

        if let Some(existing) = &link.connection
            && existing.token() == token
            && !existing.is_finished()
        {
            return false;
        }

        if let Some(stale) = link.connection.take() {
            stale.close();
        }
        link.connection = Connection::spawn(&self.settings, token, Arc::clone(&self.shared));
        link.connection.is_some()
    }

    fn lock_link(&self) -> std::sync::MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // REST
    // =========================================================================

    /// Load every cart visible to the user.
    ///
    /// The first cart becomes active when none is, and the active cart's room
    /// is joined.
    ///
    /// # Errors
    ///
    /// Propagates the API error; state is left untouched.
    pub async fn fetch_carts(&self) -> Result<Vec<Cart>, ClientError> {
        let carts: Vec<Cart> = self.api.get("/carts").await?;
        tracing::debug!(count = carts.len(), "carts fetched");

        let first = carts.first().map(|cart| cart.id.clone());
        self.shared.replace_all(carts.clone());

        match self.shared.active_cart_id().or(first) {
            Some(cart_id) => self.join_cart(&cart_id),
            None => {
                self.ensure_connection(&mut self.lock_link());
            }
        }
        Ok(carts)
    }

    /// # Errors
    ///
    /// Propagates the API error.
    pub async fn create_cart(&self, name: &str, family_id: &str) -> Result<Cart, ClientError> {
        let payload = CreateCartPayload { name: name.to_owned(), family_id: family_id.to_owned() };
        let cart: Cart = self.api.post("/carts", &payload).await?;

        self.shared.replace(cart.clone());
        self.shared.notifications.push(Variant::Success, "New cart created");
        self.join_cart(&cart.id);
        Ok(cart)
    }

    /// # Errors
    ///
    /// Propagates the API error.
    pub async fn share_cart(&self, cart_id: &str, user_ids: &[String]) -> Result<Cart, ClientError> {
        let cart: Cart = self
            .api
            .put(&format!("/carts/{cart_id}/share"), &ShareCartPayload { user_ids })
            .await?;

        self.shared.replace(cart.clone());
        self.shared.notifications.push(Variant::Success, "Cart shared");
        Ok(cart)
    }

    /// # Errors
    ///
    /// Propagates the API error.
    pub async fn add_item(&self, cart_id: &str, payload: &AddCartItemPayload) -> Result<Cart, ClientError> {
        let cart: Cart = self.api.post(&format!("/carts/{cart_id}/items"), payload).await?;

        self.shared.replace(cart.clone());
        self.shared.notifications.push(Variant::Success, "Item added to cart");
        Ok(cart)
    }

    /// Failures are logged and surfaced as an error notification as well as
    /// returned.
    ///
    /// # Errors
    ///
    /// Propagates the API error.
    pub async fn update_item(
        &self,
        cart_id: &str,
        item_id: &str,
        payload: &UpdateCartItemPayload,
    ) -> Result<Cart, ClientError> {
        let result: Result<Cart, ClientError> =
            self.api.patch(&format!("/carts/{cart_id}/items/{item_id}"), payload).await;

        match result {
            Ok(cart) => {
                self.shared.replace(cart.clone());
                self.shared.notifications.push(Variant::Success, "Item updated");
                Ok(cart)
            }
            Err(error) => {
                tracing::error!(%error, cart_id, item_id, "cart item update failed");
                self.shared.notifications.push(Variant::Error, "Update failed");
                Err(error)
            }
        }
    }

    /// # Errors
    ///
    /// Propagates the API error.
    pub async fn remove_item(&self, cart_id: &str, item_id: &str) -> Result<Cart, ClientError> {
        let cart: Cart = self.api.delete(&format!("/carts/{cart_id}/items/{item_id}")).await?;

        self.shared.replace(cart.clone());
        self.shared.notifications.push(Variant::Info, "Item removed from cart");
        Ok(cart)
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[must_use]
    pub fn carts(&self) -> Vec<Cart> {
        self.shared.snapshot()
    }

    #[must_use]
    pub fn active_cart_id(&self) -> Option<String> {
        self.shared.active_cart_id()
    }

    #[must_use]
    pub fn active_cart(&self) -> Option<Cart> {
        let active = self.shared.active_cart_id()?;
        self.shared.snapshot().into_iter().find(|cart| cart.id == active)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock_link().connection.as_ref().is_some_and(Connection::is_connected)
    }

    #[must_use]
    pub fn is_connecting(&self) -> bool {
        self.lock_link().connection.as_ref().is_some_and(Connection::is_connecting)
    }

    #[must_use]
    pub fn auth_token(&self) -> Option<String> {
        self.lock_link().auth_token.clone()
    }

    #[must_use]
    pub fn notifications(&self) -> &NotificationBus {
        &self.shared.notifications
    }
}

fn announce(link: &Link, cart_id: String) {
    if let Some(connection) = &link.connection {
        tracing::debug!(%cart_id, "joining cart room");
        connection.send(ClientEvent::JoinCart { cart_id });
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
