//! Transient user-facing notifications.
//!
//! DESIGN
//! ======
//! Messages live in a shared list that the UI renders. Every message gets an
//! id from a process-lifetime counter, so ids are never reused even after the
//! list empties. Auto-dismissal runs on a spawned timer holding a weak
//! reference to the list.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

const EVENT_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Success,
    Error,
    Info,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub id: u64,
    pub variant: Variant,
    pub text: String,
    /// When the message will be dismissed automatically, if ever.
    pub expires_at: Option<Instant>,
}

#[derive(Clone)]
pub struct NotificationBus {
    inner: Arc<Mutex<BusInner>>,
    events: broadcast::Sender<Notification>,
    default_timeout: Duration,
}

#[derive(Default)]
struct BusInner {
    messages: Vec<Notification>,
    counter: u64,
}

impl NotificationBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_default_timeout(DEFAULT_TIMEOUT)
    }

    #[must_use]
    pub fn with_default_timeout(default_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { inner: Arc::new(Mutex::new(BusInner::default())), events, default_timeout }
    }

    /// Push a message that expires after the bus default timeout.
    pub fn push(&self, variant: Variant, text: impl Into<String>) -> u64 {
        self.push_with_timeout(variant, text, self.default_timeout)
    }

    /// Push a message; a zero `timeout` keeps it until dismissed.
    ///
    /// Expiry needs a tokio runtime. Outside one the message simply stays
    /// until [`NotificationBus::dismiss`] is called.
    pub fn push_with_timeout(&self, variant: Variant, text: impl Into<String>, timeout: Duration) -> u64 {
        let notification = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.counter += 1;
            let notification = Notification {
                id: inner.counter,
                variant,
                text: text.into(),
                expires_at: (!timeout.is_zero()).then(|| Instant::now() + timeout),
            };
            inner.messages.push(notification.clone());
            notification
        };
        let id = notification.id;
        tracing::debug!(id, ?variant, text = %notification.text, "notification pushed");

        // No subscribers is fine.
        let _ = self.events.send(notification);

        if !timeout.is_zero() {
            self.schedule_dismiss(id, timeout);
        }
        id
    }

    /// Remove the message with `id`. Returns whether one was removed.
    pub fn dismiss(&self, id: u64) -> bool {
        dismiss_in(&self.inner, id)
    }

    /// Snapshot of the current messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<Notification> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .messages
            .clone()
    }

    /// Receive every notification pushed from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    fn schedule_dismiss(&self, id: u64, timeout: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(id, "no runtime; notification will not auto-expire");
            return;
        };
        let weak: Weak<Mutex<BusInner>> = Arc::downgrade(&self.inner);
        handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                dismiss_in(&inner, id);
            }
        });
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

fn dismiss_in(inner: &Mutex<BusInner>, id: u64) -> bool {
    let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
    let before = inner.messages.len();
    inner.messages.retain(|message| message.id != id);
    inner.messages.len() != before
}

#[cfg(test)]
#[path = "notify_test.rs"]
mod tests;
