use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// A single statistic value. Counters and runtimes are integers; coverage
/// percentages are floats. Serialized untagged so the snapshot is a flat
/// string-to-number JSON object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatValue {
    Count(i64),
    Metric(f64),
}

/// Run-wide counters and metrics, shared by every worker and the coverage
/// analyzer. All updates go through the internal mutex; keys are only ever
/// added or overwritten, never removed.
#[derive(Debug)]
pub struct RunStats {
    inner: Mutex<BTreeMap<String, StatValue>>,
}

impl RunStats {
    /// The aggregate report depends on these keys existing, so they are
    /// present from the start even for a run with zero suites.
    pub fn new() -> Self {
        let mut map = BTreeMap::new();
        for key in [
            "total.passes",
            "total.fails",
            "total.timeouts",
            "total.disabled",
        ] {
            map.insert(key.to_string(), StatValue::Count(0));
        }
        Self {
            inner: Mutex::new(map),
        }
    }

    fn guard(&self) -> MutexGuard<'_, BTreeMap<String, StatValue>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, key: &str, delta: i64) {
        let mut map = self.guard();
        let current = match map.get(key) {
            Some(StatValue::Count(n)) => *n,
            _ => 0,
        };
        map.insert(key.to_string(), StatValue::Count(current + delta));
    }

    pub fn set_count(&self, key: impl Into<String>, value: i64) {
        self.guard().insert(key.into(), StatValue::Count(value));
    }

    pub fn set_metric(&self, key: impl Into<String>, value: f64) {
        self.guard().insert(key.into(), StatValue::Metric(value));
    }

    pub fn get_count(&self, key: &str) -> Option<i64> {
        match self.guard().get(key) {
            Some(StatValue::Count(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn get_metric(&self, key: &str) -> Option<f64> {
        match self.guard().get(key) {
            Some(StatValue::Metric(m)) => Some(*m),
            _ => None,
        }
    }

    /// Point-in-time copy for serialization. `BTreeMap` keeps the JSON key
    /// order stable and sorted.
    pub fn snapshot(&self) -> BTreeMap<String, StatValue> {
        self.guard().clone()
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_are_zero_initialized() {
        let stats = RunStats::new();
        assert_eq!(stats.get_count("total.passes"), Some(0));
        assert_eq!(stats.get_count("total.fails"), Some(0));
        assert_eq!(stats.get_count("total.timeouts"), Some(0));
        assert_eq!(stats.get_count("total.disabled"), Some(0));
    }

    #[test]
    fn add_creates_and_accumulates() {
        let stats = RunStats::new();
        stats.add("total.fails", 1);
        stats.add("total.fails", 2);
        assert_eq!(stats.get_count("total.fails"), Some(3));

        stats.add("suite.new_runtime", 5);
        assert_eq!(stats.get_count("suite.new_runtime"), Some(5));
    }

    #[test]
    fn snapshot_serializes_flat_and_sorted() {
        let stats = RunStats::new();
        stats.set_metric("suite.tg_coverage.total", 40.0);
        stats.set_count("total.test_suites", 2);

        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        let fails = json.find("total.fails").unwrap();
        let suites = json.find("total.test_suites").unwrap();
        let cover = json.find("suite.tg_coverage.total").unwrap();
        assert!(cover < fails);
        assert!(fails < suites);
        assert!(json.contains("\"suite.tg_coverage.total\":40.0"));
        assert!(json.contains("\"total.test_suites\":2"));
    }
}
