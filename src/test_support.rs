//! Shared fixtures for unit tests: in-process axum servers and cart snapshots.

use std::time::Duration;

use axum::Router;
use serde_json::{Value, json};

use crate::types::Cart;

/// Serve `router` on an ephemeral local port and return its base URL.
pub(crate) async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Base URL of a port nothing listens on.
pub(crate) async fn unreachable_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

pub(crate) fn sample_cart_json(id: &str, name: &str, item_count: usize) -> Value {
    let items: Vec<Value> = (1..=item_count)
        .map(|n| {
            json!({
                "id": format!("item-{n}"),
                "quantity": 1,
                "purchased": false,
                "product": { "id": format!("product-{n}"), "name": format!("Product {n}"), "price": "2.50" }
            })
        })
        .collect();
    let owner = json!({ "id": "user-1", "name": "Ada", "email": "ada@example.test", "role": "parent" });

    json!({
        "id": id,
        "name": name,
        "family": { "id": "family-1", "name": "Lovelace", "members": [owner] },
        "createdBy": owner,
        "items": items,
        "participants": [owner],
        "createdAt": "2024-05-01T10:00:00.000Z",
        "updatedAt": "2024-05-01T10:00:00.000Z"
    })
}

pub(crate) fn sample_cart(id: &str, name: &str, item_count: usize) -> Cart {
    serde_json::from_value(sample_cart_json(id, name, item_count)).unwrap()
}

pub(crate) fn auth_json(access: &str, refresh: &str) -> Value {
    json!({
        "accessToken": access,
        "refreshToken": refresh,
        "user": { "id": "user-1", "name": "Ada", "email": "ada@example.test", "role": "parent" }
    })
}

/// Poll `check` until it holds or two seconds pass.
pub(crate) async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
