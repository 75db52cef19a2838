//! Message history tracking for debugging and diagnostics.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Direction of a recorded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Send,
    Receive,
}

/// A recorded frame in the history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub msg_type: MessageType,
    /// Command code, or `None` for pings and undecodable replies.
    pub code: Option<u16>,
    pub frame: String,
    /// Seconds since history creation
    pub timestamp: f64,
}

/// Bounded log of the frames a session exchanged.
#[derive(Debug, Clone)]
pub struct MessageHistory {
    counts: HashMap<MessageType, usize>,
    last_by_code: HashMap<u16, String>,
    last_error: Option<String>,
    failures: usize,
    start_time: Instant,
    entries: VecDeque<HistoryEntry>,
    max_entries: usize,
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageHistory {
    pub const DEFAULT_MAX_ENTRIES: usize = 100;

    pub fn new() -> Self {
        Self::with_max_entries(Self::DEFAULT_MAX_ENTRIES)
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            counts: HashMap::new(),
            last_by_code: HashMap::new(),
            last_error: None,
            failures: 0,
            start_time: Instant::now(),
            entries: VecDeque::new(),
            max_entries,
        }
    }

    pub fn record(&mut self, msg_type: MessageType, code: Option<u16>, frame: &str) {
        *self.counts.entry(msg_type).or_default() += 1;
        if let (MessageType::Receive, Some(code)) = (msg_type, code) {
            self.last_by_code.insert(code, frame.to_string());
        }

        if self.entries.len() == self.max_entries {
            self.entries.pop_front();
        }
        if self.max_entries > 0 {
            self.entries.push_back(HistoryEntry {
                msg_type,
                code,
                frame: frame.to_string(),
                timestamp: self.start_time.elapsed().as_secs_f64(),
            });
        }
    }

    pub fn record_error(&mut self, error: &str) {
        self.failures += 1;
        self.last_error = Some(error.to_string());
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// The most recent reply received for `code`.
    pub fn last_reply(&self, code: u16) -> Option<&str> {
        self.last_by_code.get(&code).map(String::as_str)
    }

    /// Recorded frames, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.counts.clear();
        self.last_by_code.clear();
        self.entries.clear();
        self.failures = 0;
        self.last_error = None;
    }

    pub fn summary(&self) -> HistorySummary {
        let count = |t: MessageType| self.counts.get(&t).copied().unwrap_or(0);
        HistorySummary {
            send_count: count(MessageType::Send),
            receive_count: count(MessageType::Receive),
            failure_count: self.failures,
            total_entries: self.entries.len(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Summary of message history for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySummary {
    pub send_count: usize,
    pub receive_count: usize,
    pub failure_count: usize,
    pub total_entries: usize,
    pub last_error: Option<String>,
}
