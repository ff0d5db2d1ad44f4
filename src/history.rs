//! Bounded FIFO of recent trading-log events, replayed once to newly
//! registered connections.

use crate::types::TradingLogEntry;
use std::collections::VecDeque;
use std::sync::Mutex;

pub const HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Default)]
pub struct HistoryBuffer {
    entries: Mutex<VecDeque<TradingLogEntry>>,
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an accepted relay, evicting the oldest entry past capacity.
    pub fn append(&self, entry: TradingLogEntry) {
        let mut entries = self.entries.lock().expect("history buffer poisoned");
        Self::push_bounded(&mut entries, entry);
    }

    /// Bounded push on an already-locked buffer (see [`Self::with_lock`]).
    pub fn push_bounded(entries: &mut VecDeque<TradingLogEntry>, entry: TradingLogEntry) {
        entries.push_back(entry);
        if entries.len() > HISTORY_CAPACITY {
            entries.pop_front();
        }
    }

    /// Current ordered contents, oldest first.
    pub fn snapshot(&self) -> Vec<TradingLogEntry> {
        self.entries
            .lock()
            .expect("history buffer poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("history buffer poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` while holding the buffer lock. The hub uses this to make
    /// register-and-snapshot atomic with relay-and-append, so a new
    /// joiner neither misses nor duplicates entries relative to its
    /// replay.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut VecDeque<TradingLogEntry>) -> R) -> R {
        let mut entries = self.entries.lock().expect("history buffer poisoned");
        f(&mut entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: usize) -> TradingLogEntry {
        TradingLogEntry {
            id: format!("msg_{n}"),
            sender: "user_1".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            text: Some(format!("entry {n}")),
            trade_action: None,
            method: None,
            price: None,
        }
    }

    #[test]
    fn append_preserves_arrival_order() {
        let history = HistoryBuffer::new();
        for n in 0..5 {
            history.append(entry(n));
        }
        let ids: Vec<String> = history.snapshot().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["msg_0", "msg_1", "msg_2", "msg_3", "msg_4"]);
    }

    #[test]
    fn capacity_is_enforced_fifo() {
        let history = HistoryBuffer::new();
        for n in 0..=HISTORY_CAPACITY {
            history.append(entry(n));
        }

        assert_eq!(history.len(), HISTORY_CAPACITY);
        let snapshot = history.snapshot();
        // After 51 appends the oldest is gone and the 50 most recent
        // remain in arrival order.
        assert_eq!(snapshot.first().unwrap().id, "msg_1");
        assert_eq!(snapshot.last().unwrap().id, format!("msg_{HISTORY_CAPACITY}"));
    }
}
