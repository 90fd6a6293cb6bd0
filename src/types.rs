//! Wire types shared by the REST and realtime APIs.
//!
//! Field names follow the server's camelCase JSON. Carts are always handled
//! as whole snapshots; nothing here supports partial updates of a cart.

use serde::{Deserialize, Serialize};

// =============================================================================
// AUTH
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: String,
}

/// Token pair plus user returned by login, register, and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterPayload {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

// =============================================================================
// CARTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Family {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub members: Vec<Member>,
}

/// Product price as sent by the server: a JSON number or a decimal string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Price {
    Number(f64),
    Text(String),
}

impl Price {
    /// Numeric value, if the price parses.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(raw) => raw.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: Price,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: String,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchased: Option<bool>,
    pub product: Product,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub id: String,
    pub name: String,
    pub family: Family,
    pub created_by: Member,
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub participants: Vec<Member>,
    pub created_at: String,
    pub updated_at: String,
}

impl Cart {
    #[must_use]
    pub fn item(&self, item_id: &str) -> Option<&CartItem> {
        self.items.iter().find(|item| item.id == item_id)
    }
}

// =============================================================================
// REQUEST PAYLOADS
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCartPayload {
    pub name: String,
    pub family_id: String,
}

/// New cart line, identified either by catalog product or by free-text name.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCartItemPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub quantity: u32,
}

impl AddCartItemPayload {
    #[must_use]
    pub fn product(product_id: impl Into<String>, quantity: u32) -> Self {
        Self { product_id: Some(product_id.into()), name: None, quantity }
    }

    #[must_use]
    pub fn named(name: impl Into<String>, quantity: u32) -> Self {
        Self { product_id: None, name: Some(name.into()), quantity }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateCartItemPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchased: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ShareCartPayload<'a> {
    pub user_ids: &'a [String],
}

/// Replace the snapshot with the same id, or append it if unseen.
///
/// Used for HTTP responses and realtime pushes alike: the newest snapshot
/// always wins, and fields are never merged.
pub fn replace_cart(carts: &mut Vec<Cart>, cart: Cart) {
    match carts.iter_mut().find(|existing| existing.id == cart.id) {
        Some(existing) => *existing = cart,
        None => carts.push(cart),
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
