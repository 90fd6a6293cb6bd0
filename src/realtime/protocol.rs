//! JSON envelope codec for the cart realtime channel.
//!
//! Every WS text message is `{"event": <name>, "data": <payload>}`. Inbound
//! events carry whole cart snapshots; the only outbound event announces
//! membership in a cart room.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::types::Cart;

pub const JOIN_CART: &str = "joinCart";
pub const CART_UPDATE: &str = "cart:update";
pub const CART_REFRESH: &str = "cart:refresh";

/// Error returned by the decoders.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The message was not a JSON envelope, or its payload had the wrong shape.
    #[error("malformed realtime message: {0}")]
    Json(#[from] serde_json::Error),
    /// The envelope named an event this side does not accept.
    #[error("unexpected realtime event: {0}")]
    UnexpectedEvent(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Server → client events.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    /// Another member changed the cart; surface it to the user.
    CartUpdate(Cart),
    /// Snapshot resync; apply without notifying.
    CartRefresh(Cart),
    /// Any event this client does not handle.
    Other(String),
}

impl ServerEvent {
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] when the text is not an envelope or a
    /// cart payload does not parse.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        match envelope.event.as_str() {
            CART_UPDATE => Ok(Self::CartUpdate(serde_json::from_value(envelope.data)?)),
            CART_REFRESH => Ok(Self::CartRefresh(serde_json::from_value(envelope.data)?)),
            _ => Ok(Self::Other(envelope.event)),
        }
    }

    /// Server-side encoding, used by the in-process test server.
    ///
    /// # Errors
    ///
    /// Returns an error only if the cart fails to serialize.
    #[cfg(test)]
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let envelope = match self {
            Self::CartUpdate(cart) => Envelope { event: CART_UPDATE.to_owned(), data: serde_json::to_value(cart)? },
            Self::CartRefresh(cart) => Envelope { event: CART_REFRESH.to_owned(), data: serde_json::to_value(cart)? },
            Self::Other(event) => Envelope { event: event.clone(), data: Value::Null },
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}

/// Client → server events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    JoinCart { cart_id: String },
}

impl ClientEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinCart { .. } => JOIN_CART,
        }
    }

    #[must_use]
    pub fn encode(&self) -> String {
        let data = match self {
            Self::JoinCart { cart_id } => json!({ "cartId": cart_id }),
        };
        json!({ "event": self.name(), "data": data }).to_string()
    }

    /// Server-side decoding, used by the in-process test server.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedEvent`] for anything but a join.
    #[cfg(test)]
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct JoinData {
            cart_id: String,
        }

        let envelope: Envelope = serde_json::from_str(text)?;
        if envelope.event != JOIN_CART {
            return Err(ProtocolError::UnexpectedEvent(envelope.event));
        }
        let JoinData { cart_id } = serde_json::from_value(envelope.data)?;
        Ok(Self::JoinCart { cart_id })
    }
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
