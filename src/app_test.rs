use axum::Router;
use axum::routing::get;
use serde_json::json;

use super::*;
use crate::storage::{ACCESS_KEY, MemoryStorage};
use crate::test_support::{spawn_server, unreachable_url};

async fn config_for(api_url: String) -> ClientConfig {
    ClientConfig { api_url, ws_url: unreachable_url().await, ..ClientConfig::default() }
}

#[tokio::test]
async fn start_restores_persisted_session() {
    let router = Router::new().route(
        "/users/me",
        get(|| async { axum::Json(json!({ "id": "user-1", "name": "Ada", "email": "ada@example.test" })) }),
    );
    let base = spawn_server(router).await;
    let app = App::new(config_for(base).await, Arc::new(MemoryStorage::with_tokens("acc-1", "ref-1"))).unwrap();

    app.start().await;

    assert!(app.session.is_authenticated());
    assert_eq!(app.session.user().unwrap().name, "Ada");
    assert_eq!(app.carts.auth_token().as_deref(), Some("acc-1"));
}

#[tokio::test]
async fn start_without_tokens_stays_signed_out() {
    let app = App::new(config_for(unreachable_url().await).await, Arc::new(MemoryStorage::new())).unwrap();

    app.start().await;

    assert!(!app.session.is_authenticated());
    assert!(app.session.is_initialized());
}

#[test]
fn components_share_one_api_client() {
    let app = App::new(ClientConfig::default(), Arc::new(MemoryStorage::new())).unwrap();
    assert_eq!(app.api.base_url(), "http://localhost:3000/api");
    assert_eq!(Arc::strong_count(&app.api), 3);
}

#[test]
fn from_config_reads_token_file() {
    let dir = std::env::temp_dir().join(format!("famcart-app-{}", uuid::Uuid::new_v4()));
    let path = dir.join("tokens.json");
    {
        let storage = FileStorage::open(&path).unwrap();
        storage.set(ACCESS_KEY, "persisted").unwrap();
    }

    let config = ClientConfig { token_file: path, ..ClientConfig::default() };
    let app = App::from_config(config).unwrap();
    assert_eq!(app.session.access_token().as_deref(), Some("persisted"));

    let _ = std::fs::remove_dir_all(dir);
}
