//! REST client with bearer auth and transparent session refresh.
//!
//! ARCHITECTURE
//! ============
//! Every request reads the current access token through an [`AuthBridge`]
//! and attaches it as `Authorization: Bearer <token>`. A 401 response enters
//! the refresh path once per request:
//!
//! - no refresh token → force logout, return the original 401
//! - token already rotated since the request was sent → replay with it
//! - otherwise → single-flight refresh through [`refresh::RefreshCoordinator`],
//!   then replay with the resulting token. The rotation check is repeated once
//!   leadership is granted, so a 401 that raced the previous refresh reuses
//!   its token instead of refreshing again.
//! - refresh abandoned because the session was replaced → return
//!   `SessionChanged` and leave the new session alone
//!
//! The replay is sent directly, never re-intercepted, so a second 401 reaches
//! the caller unchanged.
//!
//! Auth endpoints (login/register/refresh/logout) use the `*_without_refresh`
//! helpers so the refresh call can never queue behind itself.

mod refresh;

use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::ClientError;
use refresh::{RefreshCoordinator, Ticket};

/// Session hooks the interceptor needs: token reads, refresh, forced logout.
#[async_trait::async_trait]
pub trait AuthBridge: Send + Sync {
    fn access_token(&self) -> Option<String>;
    fn refresh_token(&self) -> Option<String>;

    /// Exchange the refresh token for a new pair and return the access token.
    async fn refresh_session(&self) -> Result<String, ClientError>;

    /// Drop the session after an unrecoverable auth failure.
    async fn force_logout(&self);
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    bridge: RwLock<Option<Weak<dyn AuthBridge>>>,
    refresh: RefreshCoordinator,
}

impl ApiClient {
    /// Build a client from typed config.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client fails to build.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()?;
        Ok(Self::with_http(http, &config.api_url))
    }

    #[must_use]
    pub fn with_http(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            bridge: RwLock::new(None),
            refresh: RefreshCoordinator::new(),
        }
    }

    /// Connect the interceptor to the session that owns the tokens.
    ///
    /// Held weakly: the session owns this client, not the other way round.
    pub fn install_auth_bridge(&self, bridge: Weak<dyn AuthBridge>) {
        *self.bridge.write().unwrap_or_else(PoisonError::into_inner) = Some(bridge);
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether a session refresh is currently in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.refresh.is_refreshing()
    }

    /// Requests parked behind the in-flight refresh.
    #[must_use]
    pub fn queued_requests(&self) -> usize {
        self.refresh.queued()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.execute(Method::GET, path, None).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(Method::POST, path, Some(serde_json::to_value(body)?)).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(Method::PUT, path, Some(serde_json::to_value(body)?)).await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(Method::PATCH, path, Some(serde_json::to_value(body)?)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.execute(Method::DELETE, path, None).await
    }

    /// POST that bypasses the 401 interceptor (auth endpoints).
    pub(crate) async fn post_without_refresh<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        let token = self.bridge().and_then(|bridge| bridge.access_token());
        let value = self.send_once(&Method::POST, path, Some(&body), token.as_deref()).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Body-less POST that bypasses the interceptor and ignores the response body.
    pub(crate) async fn post_empty_without_refresh(&self, path: &str) -> Result<(), ClientError> {
        let token = self.bridge().and_then(|bridge| bridge.access_token());
        self.send_once(&Method::POST, path, None, token.as_deref()).await?;
        Ok(())
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ClientError> {
        let value = self.send_intercepted(&method, path, body.as_ref()).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn send_intercepted(&self, method: &Method, path: &str, body: Option<&Value>) -> Result<Value, ClientError> {
        let bridge = self.bridge();
        let sent_with = bridge.as_ref().and_then(|bridge| bridge.access_token());

        match self.send_once(method, path, body, sent_with.as_deref()).await {
            Err(error) if error.is_unauthorized() => {
                let Some(bridge) = bridge else {
                    return Err(error);
                };
                self.recover_unauthorized(bridge, method, path, body, sent_with, error).await
            }
            other => other,
        }
    }

    async fn recover_unauthorized(
        &self,
        bridge: Arc<dyn AuthBridge>,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        sent_with: Option<String>,
        original: ClientError,
    ) -> Result<Value, ClientError> {
        if bridge.refresh_token().is_none() {
            tracing::warn!(%method, path, "401 without refresh token; forcing logout");
            bridge.force_logout().await;
            return Err(original);
        }

        let current = bridge.access_token();
        if current.is_some() && current != sent_with {
            tracing::debug!(%method, path, "401 with rotated token; replaying with current token");
            return self.send_once(method, path, body, current.as_deref()).await;
        }

        let token = match self.refresh.acquire() {
            Ticket::Leader(guard) => {
                // A previous leader may have rotated the token after the check above.
                let current = bridge.access_token();
                if let Some(current) = current.filter(|token| sent_with.as_ref() != Some(token)) {
                    tracing::debug!(%method, path, "token rotated before refresh started; replaying");
                    guard.succeed(&current);
                    return self.send_once(method, path, body, Some(&current)).await;
                }

                tracing::info!(%method, path, "401 received; refreshing session");
                match bridge.refresh_session().await {
                    Ok(token) => {
                        guard.succeed(&token);
                        token
                    }
                    Err(ClientError::SessionChanged) => {
                        // The session this request belonged to is gone; the current one stays.
                        guard.fail();
                        tracing::debug!(%method, path, "session replaced during refresh; dropping request");
                        return Err(ClientError::SessionChanged);
                    }
                    Err(error) => {
                        guard.fail();
                        tracing::warn!(%error, "session refresh failed; forcing logout");
                        bridge.force_logout().await;
                        return Err(ClientError::RefreshFailed(Box::new(error)));
                    }
                }
            }
            Ticket::Waiter(rx) => rx.await.map_err(|_| ClientError::RefreshRejected)?,
        };

        tracing::debug!(%method, path, "replaying request after refresh");
        self.send_once(method, path, body, Some(&token)).await
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<Value, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let request = self.http.request(method.clone(), &url);
        let request = match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let request = match body {
            Some(json) => request.json(json),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        tracing::debug!(%method, path, status = status.as_u16(), "api response");

        if !status.is_success() {
            return Err(ClientError::from_response(status.as_u16(), &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn bridge(&self) -> Option<Arc<dyn AuthBridge>> {
        self.bridge
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
