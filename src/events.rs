//! Typed event model and the in-process event bus.
//!
//! Everything a UI needs arrives as a [`ServiceEvent`]: per-file pipeline
//! outcomes, status snapshots, config snapshots, and toasts. Handlers run
//! synchronously in registration order; the handler list is cloned out of
//! the lock before dispatch so a handler may subscribe or unsubscribe
//! without deadlocking.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::config::Config;
use crate::utils;

/// Status snapshot pushed after every lifecycle or config transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub running: bool,
    pub directories: Vec<String>,
    pub dry_run: bool,
    pub launch_on_login: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Warn,
    Error,
}

/// Short user-facing notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Toast {
    pub message: String,
    pub level: ToastLevel,
}

impl Toast {
    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: ToastLevel::Warn,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: ToastLevel::Error,
        }
    }
}

/// Outcome variants of a per-file pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FileEventKind {
    Preview { target: String },
    Applied { target: String },
    Skipped { message: String },
    Error { message: String },
    Converted { format: String },
    ConvertError { message: String },
    Trashed,
}

/// One per-file pipeline outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEvent {
    /// Basename of the file the pipeline ran on.
    pub file: String,
    /// Directory containing the file.
    pub directory: String,
    /// Milliseconds since UNIX_EPOCH at emission time.
    pub timestamp: u64,
    #[serde(flatten)]
    pub kind: FileEventKind,
}

impl FileEvent {
    /// Build an event for `path`, splitting it into basename + directory.
    pub fn for_path(path: &std::path::Path, kind: FileEventKind) -> Self {
        Self {
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            directory: path
                .parent()
                .map(|d| d.to_string_lossy().into_owned())
                .unwrap_or_default(),
            timestamp: utils::now_millis(),
            kind,
        }
    }
}

/// Everything the engine publishes.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    File(FileEvent),
    Status(StatusPayload),
    Config(Config),
    Toast(Toast),
}

impl ServiceEvent {
    /// Wire name of the event, matching the bridge protocol.
    pub fn name(&self) -> &'static str {
        match self {
            ServiceEvent::File(_) => "file",
            ServiceEvent::Status(_) => "status",
            ServiceEvent::Config(_) => "config",
            ServiceEvent::Toast(_) => "toast",
        }
    }

    /// JSON payload of the event for the bridge protocol.
    pub fn payload(&self) -> serde_json::Value {
        let result = match self {
            ServiceEvent::File(e) => serde_json::to_value(e),
            ServiceEvent::Status(s) => serde_json::to_value(s),
            ServiceEvent::Config(c) => serde_json::to_value(c),
            ServiceEvent::Toast(t) => serde_json::to_value(t),
        };
        result.unwrap_or(serde_json::Value::Null)
    }
}

/// RAII unsubscribe handle. Dropping it removes the handler.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Keep the handler registered for the rest of the process lifetime.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

type Handler = Arc<dyn Fn(&ServiceEvent) + Send + Sync>;

struct BusInner {
    handlers: Mutex<Vec<(u64, Handler)>>,
    next_id: AtomicU64,
}

/// Single-process typed pub/sub.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                handlers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a handler; it sees every subsequent event in order.
    pub fn on(&self, handler: impl Fn(&ServiceEvent) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        utils::lock(&self.inner.handlers).push((id, Arc::new(handler)));

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                utils::lock(&inner.handlers).retain(|(hid, _)| *hid != id);
            }
        })
    }

    /// Deliver an event to every registered handler, in registration order.
    pub fn emit(&self, event: ServiceEvent) {
        let handlers: Vec<Handler> = utils::lock(&self.inner.handlers)
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        let _s1 = bus.on(move |_| o1.lock().unwrap().push(1));
        let o2 = order.clone();
        let _s2 = bus.on(move |_| o2.lock().unwrap().push(2));

        bus.emit(ServiceEvent::Toast(Toast::warn("x")));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let sub = bus.on(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(ServiceEvent::Toast(Toast::warn("one")));
        drop(sub);
        bus.emit(ServiceEvent::Toast(Toast::warn("two")));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_file_event_wire_shape() {
        let event = FileEvent::for_path(
            Path::new("/shots/Screenshot 1.png"),
            FileEventKind::Applied {
                target: "Screenshot_2025-10-30_09-00-00.png".into(),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "applied");
        assert_eq!(json["file"], "Screenshot 1.png");
        assert_eq!(json["directory"], "/shots");
        assert_eq!(json["target"], "Screenshot_2025-10-30_09-00-00.png");

        let convert_error = FileEvent::for_path(
            Path::new("/shots/a.heic"),
            FileEventKind::ConvertError {
                message: "boom".into(),
            },
        );
        let json = serde_json::to_value(&convert_error).unwrap();
        assert_eq!(json["kind"], "convert-error");
    }
}
