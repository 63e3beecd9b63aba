//! The `Int`/`Float`/`Map` counter and gauge registry used by every
//! component in this crate (§2, "Stats / expvars").
//!
//! This is deliberately small: a string-keyed set of atomics behind a
//! `parking_lot::RwLock`, exposed as a plain `serde_json::Value` tree for
//! whatever external exposition surface a deployment wires up (an
//! HTTP `/debug/vars` endpoint, a metrics scraper — both out of scope
//! here). Edge depth, per-node error counts, ingress counters, batch
//! query-error counts, UDF keepalive misses, and autoscale cooldown-drop
//! counts all live here.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// A monotonically-adjustable integer counter or gauge.
#[derive(Debug, Default)]
pub struct IntStat(AtomicI64);

impl IntStat {
    pub fn add(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A monotonic counter, used for `collected`/`emitted` style edge stats
/// where callers must observe non-decreasing values.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn incr(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn add(&self, delta: u64) -> u64 {
        self.0.fetch_add(delta, Ordering::AcqRel) + delta
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// A single float gauge, stored as bits so it can live behind an atomic.
#[derive(Debug, Default)]
pub struct FloatStat(std::sync::atomic::AtomicU64);

impl FloatStat {
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// A named, hierarchical bag of stats. Each component (an edge, a node,
/// the task master) owns one and registers counters into it lazily.
#[derive(Default)]
pub struct StatsMap {
    ints: RwLock<HashMap<String, Arc<IntStat>>>,
    floats: RwLock<HashMap<String, Arc<FloatStat>>>,
    counters: RwLock<HashMap<String, Arc<Counter>>>,
}

impl StatsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn int(&self, name: &str) -> Arc<IntStat> {
        if let Some(s) = self.ints.read().get(name) {
            return s.clone();
        }
        self.ints.write().entry(name.to_string()).or_default().clone()
    }

    pub fn float(&self, name: &str) -> Arc<FloatStat> {
        if let Some(s) = self.floats.read().get(name) {
            return s.clone();
        }
        self.floats.write().entry(name.to_string()).or_default().clone()
    }

    pub fn counter(&self, name: &str) -> Arc<Counter> {
        if let Some(s) = self.counters.read().get(name) {
            return s.clone();
        }
        self.counters.write().entry(name.to_string()).or_default().clone()
    }

    /// A point-in-time export suitable for an external `/debug/vars`-style
    /// surface (not implemented here).
    pub fn snapshot(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for (k, v) in self.ints.read().iter() {
            out.insert(k.clone(), serde_json::json!(v.get()));
        }
        for (k, v) in self.floats.read().iter() {
            out.insert(k.clone(), serde_json::json!(v.get()));
        }
        for (k, v) in self.counters.read().iter() {
            out.insert(k.clone(), serde_json::json!(v.get()));
        }
        serde_json::Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotonic_and_shared() {
        let stats = StatsMap::new();
        let a = stats.counter("ingress");
        let b = stats.counter("ingress");
        a.incr();
        b.add(4);
        assert_eq!(stats.counter("ingress").get(), 5);
    }

    #[test]
    fn snapshot_includes_all_registered_stats() {
        let stats = StatsMap::new();
        stats.int("depth").set(3);
        stats.float("rate").set(1.5);
        stats.counter("errors").incr();
        let snap = stats.snapshot();
        assert_eq!(snap["depth"], 3);
        assert_eq!(snap["rate"], 1.5);
        assert_eq!(snap["errors"], 1);
    }
}
