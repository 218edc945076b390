//! Bounded signal history
//!
//! Ring buffer of [`SignalRecord`]s. Once full, each push evicts the oldest
//! record.

use std::collections::VecDeque;

use serde_json::Value;

use super::types::SignalRecord;

/// Default number of records kept
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct SignalHistory {
    records: VecDeque<SignalRecord>,
    capacity: usize,
}

impl SignalHistory {
    /// A capacity of zero is bumped to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
            capacity,
        }
    }

    pub fn push(&mut self, record: SignalRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Up to `limit` most recent records, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<SignalRecord> {
        let skip = self.records.len().saturating_sub(limit);
        self.records.iter().skip(skip).cloned().collect()
    }

    /// Most recent record for `signal_id`.
    pub fn find(&self, signal_id: &str) -> Option<&SignalRecord> {
        self.records.iter().rev().find(|r| r.signal_id == signal_id)
    }

    /// Response recorded for `signal_id`, if any.
    pub fn find_response(&self, signal_id: &str) -> Option<Value> {
        self.find(signal_id).and_then(|r| r.response.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SignalHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::types::{Signal, SignalType};
    use serde_json::json;

    fn record(n: usize) -> SignalRecord {
        let mut signal = Signal::new(SignalType::DataUpdate, format!("sender-{n}"), json!({}));
        signal.id = format!("sig-{n}");
        signal.processed = true;
        signal.response = Some(json!({ "n": n }));
        SignalRecord::from(&signal)
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut history = SignalHistory::with_capacity(3);
        for n in 0..5 {
            history.push(record(n));
        }
        assert_eq!(history.len(), 3);
        let ids: Vec<_> = history.recent(10).into_iter().map(|r| r.signal_id).collect();
        assert_eq!(ids, vec!["sig-2", "sig-3", "sig-4"]);
        assert!(history.find("sig-0").is_none());
    }

    #[test]
    fn test_recent_limit() {
        let mut history = SignalHistory::with_capacity(10);
        for n in 0..4 {
            history.push(record(n));
        }
        let ids: Vec<_> = history.recent(2).into_iter().map(|r| r.signal_id).collect();
        assert_eq!(ids, vec!["sig-2", "sig-3"]);
    }

    #[test]
    fn test_find_response() {
        let mut history = SignalHistory::default();
        history.push(record(7));
        assert_eq!(history.find_response("sig-7"), Some(json!({"n": 7})));
        assert_eq!(history.find_response("missing"), None);
    }

    #[test]
    fn test_zero_capacity_bumped() {
        let mut history = SignalHistory::with_capacity(0);
        history.push(record(1));
        history.push(record(2));
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.len(), 1);
    }
}
