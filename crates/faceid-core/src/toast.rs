//! Ephemeral user notifications with timed auto-dismiss.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Default time a toast stays visible.
pub const DEFAULT_TOAST_DURATION: Duration = Duration::from_millis(5000);

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Severity {
    Success,
    Error,
    Warning,
    #[default]
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Success => "success",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct Toast {
    pub id: String,
    pub message: String,
    pub severity: Severity,
    pub duration: Duration,
    pub shown_at: Instant,
}

impl Toast {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.shown_at) >= self.duration
    }
}

#[derive(Debug, Clone)]
pub enum ToastEvent {
    Shown(Toast),
    Dismissed(String),
}

struct Inner {
    toasts: Vec<Toast>,
    default_duration: Duration,
}

/// Cloneable handle to a shared toast queue.
///
/// Every clone sees the same queue. Front ends call
/// [`subscribe`](Self::subscribe) to render toasts as they appear and vanish.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<ToastEvent>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_TOAST_DURATION)
    }
}

impl Notifier {
    pub fn new(default_duration: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                toasts: Vec::new(),
                default_duration,
            })),
            events,
        }
    }

    /// Queue a toast with the default duration. Returns its id.
    pub fn show(&self, message: impl Into<String>, severity: Severity) -> String {
        let duration = self.lock().default_duration;
        self.show_for(message, severity, duration)
    }

    pub fn show_for(
        &self,
        message: impl Into<String>,
        severity: Severity,
        duration: Duration,
    ) -> String {
        let toast = Toast {
            id: uuid::Uuid::new_v4().to_string(),
            message: message.into(),
            severity,
            duration,
            shown_at: Instant::now(),
        };
        let id = toast.id.clone();
        tracing::debug!(id = %id, %severity, message = %toast.message, "toast shown");
        self.lock().toasts.push(toast.clone());
        // No subscribers is fine; the toast is still queued.
        let _ = self.events.send(ToastEvent::Shown(toast));
        id
    }

    pub fn remove(&self, id: &str) {
        let removed = {
            let mut inner = self.lock();
            let before = inner.toasts.len();
            inner.toasts.retain(|t| t.id != id);
            inner.toasts.len() != before
        };
        if removed {
            let _ = self.events.send(ToastEvent::Dismissed(id.to_string()));
        }
    }

    pub fn clear(&self) {
        let ids: Vec<String> = self.lock().toasts.drain(..).map(|t| t.id).collect();
        for id in ids {
            let _ = self.events.send(ToastEvent::Dismissed(id));
        }
    }

    /// Toasts currently queued, oldest first.
    pub fn active(&self) -> Vec<Toast> {
        self.lock().toasts.clone()
    }

    /// Dismiss every toast whose duration has elapsed at `now`.
    /// Returns the number dismissed.
    pub fn prune_expired(&self, now: Instant) -> usize {
        let expired: Vec<String> = {
            let mut inner = self.lock();
            let (gone, keep): (Vec<Toast>, Vec<Toast>) =
                inner.toasts.drain(..).partition(|t| t.is_expired(now));
            inner.toasts = keep;
            gone.into_iter().map(|t| t.id).collect()
        };
        let count = expired.len();
        for id in expired {
            let _ = self.events.send(ToastEvent::Dismissed(id));
        }
        count
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ToastEvent> {
        self.events.subscribe()
    }

    /// Spawn a task that dismisses expired toasts every `interval`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_expiry(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let notifier = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                notifier.prune_expired(Instant::now());
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The queue holds plain data; a panic mid-update leaves it usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
