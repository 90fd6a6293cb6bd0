//! Client state and networking for the family shared-cart app.
//!
//! ARCHITECTURE
//! ============
//! - [`notify`]: auto-expiring user notifications
//! - [`http`]: REST client that refreshes the session on 401, once for all
//!   concurrent callers
//! - [`session`]: token pair and user, persisted through [`storage`]
//! - [`realtime`]: cart snapshots kept live over a WebSocket
//! - [`app`]: wires the above together from [`config`]

pub mod app;
pub mod config;
pub mod error;
pub mod http;
pub mod notify;
pub mod realtime;
pub mod session;
pub mod storage;
pub mod types;

#[cfg(test)]
mod test_support;

pub use app::App;
pub use config::ClientConfig;
pub use error::ClientError;
pub use http::{ApiClient, AuthBridge};
pub use notify::{Notification, NotificationBus, Variant};
pub use realtime::CartStore;
pub use session::{Session, SessionStore};
pub use storage::{FileStorage, MemoryStorage, TokenStorage};
