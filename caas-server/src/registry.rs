//! Job registry
//!
//! A bounded store of recent jobs: an id -> job map correlated with an
//! insertion-ordered id list, newest first. Inserting past capacity
//! evicts the oldest entry; the job object itself survives as long as a
//! session or handler still holds it.

use crate::job::Job;
use crate::state::Counters;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

pub const REGISTRY_CAPACITY: usize = 100;

pub struct Registry {
    inner: Mutex<RegistryInner>,
    capacity: usize,
    counters: Arc<Counters>,
}

struct RegistryInner {
    map: HashMap<String, Arc<Job>>,
    // Front = newest.
    order: VecDeque<String>,
}

impl Registry {
    pub fn new(capacity: usize, counters: Arc<Counters>) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
            counters,
        }
    }

    /// Registers a job: map set, id to list head, total + 1, all in one lock
    /// boundary. An id that already exists replaces the prior job and
    /// moves to the head.
    pub fn insert(&self, job: Arc<Job>) {
        let id = job.id().to_string();
        {
            let mut inner = self.inner.lock().expect("registry lock poisoned");
            if inner.map.insert(id.clone(), job).is_some() {
                inner.order.retain(|existing| existing != &id);
            }
            inner.order.push_front(id);
            while inner.order.len() > self.capacity {
                if let Some(evicted) = inner.order.pop_back() {
                    inner.map.remove(&evicted);
                }
            }
        }
        self.counters.incr_total();
    }

    pub fn get(&self, id: &str) -> Option<Arc<Job>> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .map
            .get(id)
            .cloned()
    }

    /// All retained jobs, newest first.
    pub fn list(&self) -> Vec<Arc<Job>> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner
            .order
            .iter()
            .filter_map(|id| inner.map.get(id).cloned())
            .collect()
    }

    /// The newest job with no terminal flag set.
    pub fn latest_running(&self) -> Option<Arc<Job>> {
        self.list().into_iter().find(|job| job.is_running())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry lock poisoned").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
