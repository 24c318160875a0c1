// src/cache.rs
//! Process-wide result cache: query fingerprint → assembled list.
//!
//! Entries are immutable once stored and expire at a fixed age (no sliding
//! refresh). Expired entries are swept at the start of every `get`.

use metrics::{counter, gauge};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::model::CanonicalEvent;
use crate::query::Fingerprint;

/// Time source, injectable so expiry can be tested without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut g = match self.now.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        *g += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        match self.now.lock() {
            Ok(g) => *g,
            Err(poison) => *poison.into_inner(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub events: Arc<Vec<CanonicalEvent>>,
    pub created_at: Instant,
}

pub struct ResultCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        gauge!("festival_cache_ttl_secs").set(ttl.as_secs_f64());
        Self {
            ttl,
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sweep expired entries, then look up `fp`.
    pub fn get(&self, fp: &Fingerprint) -> Option<Vec<CanonicalEvent>> {
        let now = self.clock.now();
        self.sweep(now);

        let guard = match self.entries.read() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        match guard.get(fp) {
            Some(entry) if now.saturating_duration_since(entry.created_at) < self.ttl => {
                counter!("festival_cache_hits_total").increment(1);
                debug!(target: "cache", fingerprint = %fp, events = entry.events.len(), "cache hit");
                Some(entry.events.as_ref().clone())
            }
            _ => {
                counter!("festival_cache_misses_total").increment(1);
                debug!(target: "cache", fingerprint = %fp, "cache miss");
                None
            }
        }
    }

    /// Store (or replace) the list for `fp`; the age restarts at zero.
    pub fn put(&self, fp: Fingerprint, events: Vec<CanonicalEvent>) {
        let entry = CacheEntry {
            fingerprint: fp.clone(),
            events: Arc::new(events),
            created_at: self.clock.now(),
        };
        let mut guard = match self.entries.write() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        guard.insert(fp, entry);
    }

    /// Entries currently held, expired ones included until the next sweep.
    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(g) => g.len(),
            Err(poison) => poison.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep(&self, now: Instant) {
        let mut guard = match self.entries.write() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        let before = guard.len();
        guard.retain(|_, e| now.saturating_duration_since(e.created_at) < self.ttl);
        let evicted = before - guard.len();
        if evicted > 0 {
            debug!(target: "cache", evicted, "expired entries swept");
        }
    }
}
