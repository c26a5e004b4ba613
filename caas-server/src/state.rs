//! Server-wide state
//!
//! `Counters` summarise job lifecycles across the whole process and are
//! mutated only through job events; `AppState` bundles everything the
//! session layer and the REST handlers share.

use crate::config::ServerConfig;
use crate::job::{Job, EVENT_CANCEL, EVENT_COMPLETE, EVENT_ERROR, EVENT_RUN};
use crate::registry::{Registry, REGISTRY_CAPACITY};
use caas_core::dto::CounterSnapshot;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// The five process-wide lifecycle counters.
///
/// `running = total - (completed + cancelled + error)` holds at every
/// quiescent point because each job emits run exactly once and exactly
/// one terminal event.
#[derive(Debug, Default)]
pub struct Counters {
    total: AtomicI64,
    running: AtomicI64,
    completed: AtomicI64,
    cancelled: AtomicI64,
    error: AtomicI64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Incremented once per registry insertion.
    pub fn incr_total(&self) {
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total: self.total.load(Ordering::SeqCst),
            running: self.running.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
            error: self.error.load(Ordering::SeqCst),
        }
    }

    /// Subscribes the counter updates to a job's lifecycle events.
    ///
    /// The terminal split never double-decrements running: a job emits
    /// exactly one of complete/cancel/error, guarded by its terminal
    /// transition.
    pub fn track(self: &Arc<Self>, job: &Job) {
        let counters = self.clone();
        job.on(EVENT_RUN, move |_| {
            counters.running.fetch_add(1, Ordering::SeqCst);
        });

        let counters = self.clone();
        job.on(EVENT_COMPLETE, move |_| {
            counters.running.fetch_sub(1, Ordering::SeqCst);
            counters.completed.fetch_add(1, Ordering::SeqCst);
        });

        let counters = self.clone();
        job.on(EVENT_CANCEL, move |_| {
            counters.running.fetch_sub(1, Ordering::SeqCst);
            counters.cancelled.fetch_add(1, Ordering::SeqCst);
        });

        let counters = self.clone();
        job.on(EVENT_ERROR, move |_| {
            counters.running.fetch_sub(1, Ordering::SeqCst);
            counters.error.fetch_add(1, Ordering::SeqCst);
        });
    }
}

/// Shared server state handed to the session layer and REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<Registry>,
    pub counters: Arc<Counters>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let counters = Arc::new(Counters::new());
        Self {
            config: Arc::new(config),
            registry: Arc::new(Registry::new(REGISTRY_CAPACITY, counters.clone())),
            counters,
            started_at: Utc::now(),
        }
    }
}
