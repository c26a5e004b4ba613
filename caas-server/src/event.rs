//! Lifecycle event bus
//!
//! A small synchronous multi-subscriber emitter keyed by event name.
//! Subscribers run in subscription order on the emitting thread. A panic
//! in a subscriber is caught, logged, and swallowed so it cannot corrupt
//! the emitter's state.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::error;

type Handler = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `handler` to `event`.
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.lock().expect("event bus lock poisoned");
        handlers
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Invokes every subscriber of `event` with `payload`, in
    /// subscription order.
    pub fn emit(&self, event: &str, payload: &str) {
        let subscribers = {
            let handlers = self.handlers.lock().expect("event bus lock poisoned");
            handlers.get(event).cloned().unwrap_or_default()
        };

        for handler in subscribers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(event, "event subscriber panicked: {message}");
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}
