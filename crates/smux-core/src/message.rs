//! Bounded in-memory message log.
//!
//! Each entry carries a monotonic sequence number and timestamp. Eviction
//! compares sequence numbers, not wall-clock time, so the retained window
//! is a total order independent of clock skew.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::debug;

/// One logged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEntry {
    /// Monotonic sequence number, unique for the process lifetime.
    pub num: u64,
    /// When the message was logged.
    pub time: DateTime<Utc>,
    /// Message text.
    pub text: String,
}

/// Ordered, bounded sequence of server messages.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: VecDeque<MessageEntry>,
    next_num: u64,
}

impl MessageLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message, evicting the oldest entries beyond `limit`.
    ///
    /// An entry is retained while `num + limit >= next_num`, i.e. it is
    /// among the last `limit` sequence numbers issued.
    pub fn add(&mut self, text: impl Into<String>, limit: usize, now: DateTime<Utc>) -> u64 {
        let text = text.into();
        debug!(message = %text, "message");

        let num = self.next_num;
        self.next_num += 1;
        self.entries.push_back(MessageEntry { num, time: now, text });

        let limit = limit as u64;
        while let Some(front) = self.entries.front() {
            if front.num + limit >= self.next_num {
                break;
            }
            self.entries.pop_front();
        }
        num
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &MessageEntry> {
        self.entries.iter()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_ordered_by_sequence() {
        let mut log = MessageLog::new();
        let now = Utc::now();
        for i in 0..5 {
            log.add(format!("msg {i}"), 100, now);
        }

        let nums: Vec<_> = log.iter().map(|m| m.num).collect();
        assert_eq!(nums, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_eviction_keeps_last_limit_entries() {
        let mut log = MessageLog::new();
        let now = Utc::now();
        for i in 0..25 {
            log.add(format!("msg {i}"), 10, now);
        }

        assert_eq!(log.len(), 10);
        let nums: Vec<_> = log.iter().map(|m| m.num).collect();
        assert_eq!(nums, (15..25).collect::<Vec<_>>());
        assert_eq!(log.iter().next().unwrap().text, "msg 15");
    }

    #[test]
    fn test_eviction_ignores_timestamps() {
        let mut log = MessageLog::new();
        // Later entries carry earlier timestamps; eviction must still be
        // by sequence number.
        let t0 = Utc::now();
        let earlier = t0 - chrono::Duration::hours(5);
        log.add("first", 2, t0);
        log.add("second", 2, earlier);
        log.add("third", 2, earlier);

        let texts: Vec<_> = log.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["second", "third"]);
    }

    #[test]
    fn test_sequence_numbers_survive_eviction() {
        let mut log = MessageLog::new();
        let now = Utc::now();
        for _ in 0..5 {
            log.add("x", 1, now);
        }
        assert_eq!(log.len(), 1);
        assert_eq!(log.iter().next().unwrap().num, 4);
        assert_eq!(log.add("y", 1, now), 5);
    }
}
