//! Shared notion of authoritative engine time (RFC 3414 section 3.2.7).
//!
//! A [`TimeWindow`] is shared between all sessions talking through the
//! same client engine, so several sessions targeting one agent agree
//! on its boots/time line. Entries are locked per engine; looking up
//! one engine never blocks traffic for another.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

/// Acceptable clock skew in seconds between the agent's notion of
/// time and ours.
pub const ENGINE_TIME_WINDOW: i64 = 150;

const MAX_BOOTS: i64 = i32::MAX as i64;

#[derive(Debug)]
struct EngineEntry {
    boots: i64,
    time: i64,
    /// Set once an authenticated message has confirmed the time line.
    synchronized: bool,
    updated: Instant,
}

impl EngineEntry {
    fn estimated_time(&self) -> i64 {
        self.time + self.updated.elapsed().as_secs() as i64
    }
}

#[derive(Debug, Default)]
struct DiscoveryMarker {
    in_flight: Mutex<HashSet<String>>,
    done: Condvar,
}

/// Time window store shared between sessions.
#[derive(Debug, Default)]
pub struct TimeWindow {
    engines: Mutex<HashMap<Vec<u8>, Arc<Mutex<EngineEntry>>>>,
    /// Which engine answers at a `host:port` target.
    targets: Mutex<HashMap<String, Vec<u8>>>,
    discovery: DiscoveryMarker,
}

impl TimeWindow {
    pub fn new() -> TimeWindow {
        TimeWindow::default()
    }

    fn entry(&self, engine_id: &[u8]) -> Option<Arc<Mutex<EngineEntry>>> {
        let engines = self.engines.lock().unwrap_or_else(|e| e.into_inner());
        engines.get(engine_id).cloned()
    }

    fn entry_or_insert(&self, engine_id: &[u8]) -> Arc<Mutex<EngineEntry>> {
        let mut engines = self.engines.lock().unwrap_or_else(|e| e.into_inner());
        engines
            .entry(engine_id.to_vec())
            .or_insert_with(|| {
                Arc::new(Mutex::new(EngineEntry {
                    boots: 0,
                    time: 0,
                    synchronized: false,
                    updated: Instant::now(),
                }))
            })
            .clone()
    }

    pub fn is_engine_known(&self, engine_id: &[u8]) -> bool {
        self.entry(engine_id).is_some()
    }

    pub fn is_synchronized(&self, engine_id: &[u8]) -> bool {
        match self.entry(engine_id) {
            Some(entry) => {
                let entry = entry.lock().unwrap_or_else(|e| e.into_inner());
                entry.synchronized
            }
            None => false,
        }
    }

    pub fn engine_boots(&self, engine_id: &[u8]) -> i64 {
        match self.entry(engine_id) {
            Some(entry) => entry.lock().unwrap_or_else(|e| e.into_inner()).boots,
            None => 0,
        }
    }

    /// Current estimate of the engine's time, advanced by the local
    /// monotonic clock since the last update.
    pub fn engine_time(&self, engine_id: &[u8]) -> i64 {
        match self.entry(engine_id) {
            Some(entry) => {
                let entry = entry.lock().unwrap_or_else(|e| e.into_inner());
                if entry.synchronized {
                    entry.estimated_time()
                } else {
                    0
                }
            }
            None => 0,
        }
    }

    /// Records boots/time received from an engine.
    ///
    /// Authenticated values only ever move the time line forward: a
    /// lower boots count is ignored, as is an older time within the
    /// same boot. Unauthenticated values may only seed an engine we
    /// know nothing about yet.
    pub fn update(&self, engine_id: &[u8], boots: i64, time: i64, authentic: bool) {
        let entry = self.entry_or_insert(engine_id);
        let mut entry = entry.lock().unwrap_or_else(|e| e.into_inner());
        if authentic {
            if boots > entry.boots || (boots == entry.boots && time > entry.estimated_time()) {
                entry.boots = boots;
                entry.time = time;
                entry.updated = Instant::now();
            }
            entry.synchronized = true;
        } else if !entry.synchronized && entry.boots == 0 && entry.time == 0 {
            entry.boots = boots;
            entry.time = time;
            entry.updated = Instant::now();
        }
    }

    /// Replay check for a received message claiming `boots`/`time`.
    pub fn is_outside_window(&self, engine_id: &[u8], boots: i64, time: i64) -> bool {
        let entry = match self.entry(engine_id) {
            Some(entry) => entry,
            None => return true,
        };
        let entry = entry.lock().unwrap_or_else(|e| e.into_inner());
        if !entry.synchronized || entry.boots == MAX_BOOTS {
            return true;
        }
        if boots < entry.boots {
            return true;
        }
        if boots == entry.boots && (time - entry.estimated_time()).abs() > ENGINE_TIME_WINDOW {
            return true;
        }
        false
    }

    /// Records which engine answers at a target, so later sessions to
    /// the same address skip the engine ID probe.
    pub fn record_engine(&self, target: &str, engine_id: &[u8]) {
        let mut targets = self.targets.lock().unwrap_or_else(|e| e.into_inner());
        targets.insert(target.to_owned(), engine_id.to_vec());
    }

    /// The engine ID previously discovered at a target, if any.
    pub fn engine_for_target(&self, target: &str) -> Option<Vec<u8>> {
        let targets = self.targets.lock().unwrap_or_else(|e| e.into_inner());
        targets.get(target).cloned()
    }

    /// Drops all knowledge of an engine, forcing rediscovery.
    pub fn forget(&self, engine_id: &[u8]) {
        let mut engines = self.engines.lock().unwrap_or_else(|e| e.into_inner());
        engines.remove(engine_id);
        drop(engines);
        let mut targets = self.targets.lock().unwrap_or_else(|e| e.into_inner());
        targets.retain(|_, id| id != engine_id);
    }

    /// Claims the discovery slot for a target, blocking while another
    /// session is already probing the same host and port. The slot is
    /// released when the returned guard drops.
    pub(crate) fn lock_discovery(&self, target: &str) -> DiscoveryGuard<'_> {
        let mut in_flight = self
            .discovery
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        while in_flight.contains(target) {
            in_flight = self
                .discovery
                .done
                .wait(in_flight)
                .unwrap_or_else(|e| e.into_inner());
        }
        in_flight.insert(target.to_owned());
        DiscoveryGuard {
            window: self,
            target: target.to_owned(),
        }
    }

    /// Non-blocking variant of [`lock_discovery`](Self::lock_discovery)
    /// for callers that must not park the thread.
    pub(crate) fn try_lock_discovery(&self, target: &str) -> Option<DiscoveryGuard<'_>> {
        let mut in_flight = self
            .discovery
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if in_flight.contains(target) {
            return None;
        }
        in_flight.insert(target.to_owned());
        Some(DiscoveryGuard {
            window: self,
            target: target.to_owned(),
        })
    }
}

pub(crate) struct DiscoveryGuard<'a> {
    window: &'a TimeWindow,
    target: String,
}

impl<'a> Drop for DiscoveryGuard<'a> {
    fn drop(&mut self) {
        let mut in_flight = self
            .window
            .discovery
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&self.target);
        self.window.discovery.done.notify_all();
    }
}
