//! Realtime cart client: socket lifecycle, wire codec, and cart state.

mod connection;
pub mod protocol;
mod store;

pub use connection::{ConnectionSettings, carts_url};
pub use store::CartStore;
