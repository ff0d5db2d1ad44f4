//! Bounded insertion-order set of seen trading-log ids. At-least-once
//! delivery plus reconnect replay can hand the same event to a client
//! twice; ids are tracked until the set outgrows three full history
//! replays, then the oldest are evicted.

use crate::history::HISTORY_CAPACITY;
use std::collections::{HashSet, VecDeque};

pub const DEDUP_CAPACITY: usize = HISTORY_CAPACITY * 3;

#[derive(Debug, Default)]
pub struct DedupSet {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an id. Returns `true` if it was not seen before.
    pub fn insert(&mut self, id: &str) -> bool {
        if !self.seen.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > DEDUP_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_are_rejected() {
        let mut set = DedupSet::new();
        assert!(set.insert("msg_1"));
        assert!(!set.insert("msg_1"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn oldest_ids_are_evicted_past_capacity() {
        let mut set = DedupSet::new();
        for n in 0..=DEDUP_CAPACITY {
            set.insert(&format!("msg_{n}"));
        }

        assert_eq!(set.len(), DEDUP_CAPACITY);
        assert!(!set.contains("msg_0"));
        assert!(set.contains("msg_1"));
        // An evicted id is fresh again.
        assert!(set.insert("msg_0"));
    }
}
