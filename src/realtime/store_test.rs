use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::sync::broadcast;

use super::*;
use crate::config::ReconnectPolicy;
use crate::test_support::{sample_cart, sample_cart_json, spawn_server, wait_until};

// =============================================================================
// fixtures
// =============================================================================

#[derive(Clone)]
struct Realtime {
    joins: Arc<StdMutex<Vec<String>>>,
    credentials: Arc<StdMutex<Vec<Option<String>>>>,
    connections: Arc<AtomicUsize>,
    push: broadcast::Sender<String>,
    drop_first: bool,
}

impl Realtime {
    fn new(drop_first: bool) -> Self {
        Self {
            joins: Arc::default(),
            credentials: Arc::default(),
            connections: Arc::default(),
            push: broadcast::channel(16).0,
            drop_first,
        }
    }

    fn joins(&self) -> Vec<String> {
        self.joins.lock().unwrap().clone()
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn send(&self, event: &str, data: Value) {
        self.push.send(json!({ "event": event, "data": data }).to_string()).unwrap();
    }
}

async fn upgrade(ws: WebSocketUpgrade, headers: HeaderMap, State(rt): State<Realtime>) -> Response {
    let credential = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    ws.on_upgrade(move |socket| serve_socket(socket, rt, credential))
}

async fn serve_socket(mut socket: WebSocket, rt: Realtime, credential: Option<String>) {
    let mut pushes = rt.push.subscribe();
    rt.credentials.lock().unwrap().push(credential);
    let number = rt.connections.fetch_add(1, Ordering::SeqCst) + 1;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(WsMessage::Text(text))) = incoming else {
                    return;
                };
                if let Ok(ClientEvent::JoinCart { cart_id }) = ClientEvent::decode(text.as_str()) {
                    rt.joins.lock().unwrap().push(cart_id);
                }
                if rt.drop_first && number == 1 {
                    return;
                }
            }
            outgoing = pushes.recv() => {
                let Ok(text) = outgoing else {
                    return;
                };
                if socket.send(WsMessage::Text(text.into())).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn list_carts() -> Json<Value> {
    Json(json!([sample_cart_json("cart-1", "Weekly", 2), sample_cart_json("cart-2", "Party", 0)]))
}

async fn create_cart(Json(body): Json<Value>) -> Json<Value> {
    let name = body["name"].as_str().unwrap_or_default().to_owned();
    Json(sample_cart_json("cart-new", &name, 0))
}

async fn share_cart(Path(id): Path<String>) -> Json<Value> {
    Json(sample_cart_json(&id, "Weekly", 2))
}

async fn add_item(Path(id): Path<String>) -> Json<Value> {
    Json(sample_cart_json(&id, "Weekly", 3))
}

async fn update_item() -> (StatusCode, Json<Value>) {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "message": "database unavailable" })))
}

async fn remove_item(Path((id, _item)): Path<(String, String)>) -> Json<Value> {
    Json(sample_cart_json(&id, "Weekly", 1))
}

async fn server(rt: &Realtime) -> String {
    let api = Router::new()
        .route("/carts", get(list_carts).post(create_cart))
        .route("/carts/{id}/share", put(share_cart))
        .route("/carts/{id}/items", post(add_item))
        .route("/carts/{id}/items/{item}", patch(update_item).delete(remove_item));
    let router = Router::new()
        .nest("/api", api)
        .route("/carts", get(upgrade))
        .with_state(rt.clone());
    spawn_server(router).await
}

fn store(base: &str) -> CartStore {
    let api = Arc::new(ApiClient::with_http(reqwest::Client::new(), &format!("{base}/api")));
    let settings = ConnectionSettings {
        ws_url: base.to_owned(),
        reconnect: ReconnectPolicy { initial_ms: 20, max_ms: 100 },
    };
    CartStore::new(api, NotificationBus::new(), settings)
}

fn texts(store: &CartStore) -> Vec<String> {
    store.notifications().messages().into_iter().map(|m| m.text).collect()
}

// =============================================================================
// connection
// =============================================================================

#[tokio::test]
async fn set_auth_token_connects_with_bearer_and_joins_active_cart() {
    let rt = Realtime::new(false);
    let base = server(&rt).await;
    let store = store(&base);

    store.join_cart("cart-1");
    assert_eq!(rt.connections(), 0);

    store.set_auth_token(Some("tok-1".to_owned()));

    assert!(wait_until(|| rt.joins() == vec!["cart-1"]).await);
    assert!(wait_until(|| store.is_connected()).await);
    assert_eq!(*rt.credentials.lock().unwrap(), vec![Some("Bearer tok-1".to_owned())]);
    assert_eq!(store.auth_token().as_deref(), Some("tok-1"));
}

#[tokio::test]
async fn same_token_does_not_reconnect() {
    let rt = Realtime::new(false);
    let base = server(&rt).await;
    let store = store(&base);

    store.set_auth_token(Some("tok-1".to_owned()));
    assert!(wait_until(|| store.is_connected()).await);
    store.set_auth_token(Some("tok-1".to_owned()));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(rt.connections(), 1);
}

#[tokio::test]
async fn new_token_replaces_connection() {
    let rt = Realtime::new(false);
    let base = server(&rt).await;
    let store = store(&base);

    store.set_auth_token(Some("tok-1".to_owned()));
    assert!(wait_until(|| rt.connections() == 1).await);
    store.set_auth_token(Some("tok-2".to_owned()));

    assert!(wait_until(|| rt.connections() == 2).await);
    let credentials = rt.credentials.lock().unwrap().clone();
    assert_eq!(credentials[1].as_deref(), Some("Bearer tok-2"));
}

#[tokio::test]
async fn reconnect_rejoins_active_cart() {
    let rt = Realtime::new(true);
    let base = server(&rt).await;
    let store = store(&base);

    store.join_cart("cart-1");
    store.set_auth_token(Some("tok-1".to_owned()));

    assert!(wait_until(|| rt.connections() >= 2).await);
    assert!(wait_until(|| rt.joins().len() >= 2).await);
    assert!(rt.joins().iter().all(|id| id == "cart-1"));
}

#[tokio::test]
async fn clearing_token_tears_everything_down() {
    let rt = Realtime::new(false);
    let base = server(&rt).await;
    let store = store(&base);

    store.set_auth_token(Some("tok-1".to_owned()));
    store.fetch_carts().await.unwrap();
    assert!(wait_until(|| store.is_connected()).await);

    store.set_auth_token(None);

    assert!(store.carts().is_empty());
    assert_eq!(store.active_cart_id(), None);
    assert_eq!(store.auth_token(), None);
    assert!(!store.is_connected());
    assert!(!store.is_connecting());
}

#[tokio::test]
async fn join_cart_on_live_connection_announces_membership() {
    let rt = Realtime::new(false);
    let base = server(&rt).await;
    let store = store(&base);

    store.set_auth_token(Some("tok-1".to_owned()));
    assert!(wait_until(|| store.is_connected()).await);

    store.join_cart("cart-1");
    store.join_cart("cart-2");

    assert!(wait_until(|| rt.joins() == vec!["cart-1", "cart-2"]).await);
    assert_eq!(store.active_cart_id().as_deref(), Some("cart-2"));
}

// =============================================================================
// inbound events
// =============================================================================

#[tokio::test]
async fn cart_update_replaces_snapshot_and_notifies() {
    let rt = Realtime::new(false);
    let base = server(&rt).await;
    let store = store(&base);

    store.set_auth_token(Some("tok-1".to_owned()));
    store.fetch_carts().await.unwrap();
    assert!(wait_until(|| rt.connections() == 1 && store.is_connected()).await);

    rt.send("cart:update", sample_cart_json("cart-1", "Weekly", 5));

    assert!(wait_until(|| store.active_cart().is_some_and(|cart| cart.items.len() == 5)).await);
    assert_eq!(texts(&store), vec!["Weekly updated"]);
    assert_eq!(store.carts().len(), 2);
}

#[tokio::test]
async fn cart_refresh_replaces_silently() {
    let rt = Realtime::new(false);
    let base = server(&rt).await;
    let store = store(&base);

    store.set_auth_token(Some("tok-1".to_owned()));
    assert!(wait_until(|| rt.connections() == 1 && store.is_connected()).await);

    rt.send("cart:refresh", sample_cart_json("cart-9", "Hardware", 1));

    assert!(wait_until(|| store.carts().len() == 1).await);
    assert_eq!(store.carts()[0].id, "cart-9");
    assert!(texts(&store).is_empty());
}

#[test]
fn apply_inserts_unknown_cart_and_ignores_other_events() {
    let shared = CartShared::new(NotificationBus::new());
    shared.apply(ServerEvent::Other("presence".to_owned()));
    assert!(shared.snapshot().is_empty());

    shared.apply(ServerEvent::CartRefresh(sample_cart("cart-1", "A", 2)));
    shared.apply(ServerEvent::CartRefresh(sample_cart("cart-1", "A", 0)));

    let carts = shared.snapshot();
    assert_eq!(carts.len(), 1);
    assert!(carts[0].items.is_empty());
}

// =============================================================================
// REST operations
// =============================================================================

#[tokio::test]
async fn fetch_carts_selects_first_and_joins_it() {
    let rt = Realtime::new(false);
    let base = server(&rt).await;
    let store = store(&base);
    store.set_auth_token(Some("tok-1".to_owned()));

    let carts = store.fetch_carts().await.unwrap();

    assert_eq!(carts.len(), 2);
    assert_eq!(store.active_cart_id().as_deref(), Some("cart-1"));
    assert!(wait_until(|| rt.joins().contains(&"cart-1".to_owned())).await);
}

#[tokio::test]
async fn fetch_carts_keeps_existing_selection() {
    let rt = Realtime::new(false);
    let base = server(&rt).await;
    let store = store(&base);

    store.join_cart("cart-2");
    store.fetch_carts().await.unwrap();

    assert_eq!(store.active_cart_id().as_deref(), Some("cart-2"));
    assert_eq!(store.active_cart().unwrap().name, "Party");
}

#[tokio::test]
async fn create_cart_becomes_active_and_notifies() {
    let rt = Realtime::new(false);
    let base = server(&rt).await;
    let store = store(&base);

    let cart = store.create_cart("Camping", "family-1").await.unwrap();

    assert_eq!(cart.name, "Camping");
    assert_eq!(store.active_cart_id().as_deref(), Some("cart-new"));
    assert_eq!(texts(&store), vec!["New cart created"]);
}

#[tokio::test]
async fn share_cart_replaces_snapshot() {
    let rt = Realtime::new(false);
    let base = server(&rt).await;
    let store = store(&base);

    store.share_cart("cart-1", &["user-2".to_owned()]).await.unwrap();

    assert_eq!(store.carts().len(), 1);
    assert_eq!(texts(&store), vec!["Cart shared"]);
}

#[tokio::test]
async fn add_and_remove_item_replace_cart() {
    let rt = Realtime::new(false);
    let base = server(&rt).await;
    let store = store(&base);
    store.fetch_carts().await.unwrap();

    store.add_item("cart-1", &AddCartItemPayload::named("Bread", 1)).await.unwrap();
    assert_eq!(store.active_cart().unwrap().items.len(), 3);

    store.remove_item("cart-1", "item-3").await.unwrap();
    assert_eq!(store.active_cart().unwrap().items.len(), 1);

    assert_eq!(texts(&store), vec!["Item added to cart", "Item removed from cart"]);
    let variants: Vec<Variant> = store.notifications().messages().into_iter().map(|m| m.variant).collect();
    assert_eq!(variants, vec![Variant::Success, Variant::Info]);
}

#[tokio::test]
async fn update_item_failure_notifies_and_propagates() {
    let rt = Realtime::new(false);
    let base = server(&rt).await;
    let store = store(&base);
    store.fetch_carts().await.unwrap();

    let payload = UpdateCartItemPayload { purchased: Some(true), price: None };
    let error = store.update_item("cart-1", "item-1", &payload).await.unwrap_err();

    assert_eq!(error.status(), Some(500));
    assert_eq!(store.active_cart().unwrap().items.len(), 2);
    let messages = store.notifications().messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].variant, Variant::Error);
    assert_eq!(messages[0].text, "Update failed");
}
