//! Bounded in-memory debug journal.
//!
//! Mirrors the manager's notable lifecycle events for display in a host
//! application's debug console. Every record is also emitted through
//! `tracing`.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::time::SystemTime;

use tracing::{Level, debug, error, info, trace, warn};

// ============================================================================
// Constants
// ============================================================================

/// Entries kept before the oldest is dropped.
pub const MAX_LOG_ENTRIES: usize = 100;

// ============================================================================
// LogEntry
// ============================================================================

/// One journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Monotonically increasing id.
    pub id: u64,
    /// Wall-clock time of the record.
    pub timestamp: SystemTime,
    /// Severity.
    pub level: Level,
    /// Message text.
    pub message: String,
}

// ============================================================================
// DebugLog
// ============================================================================

/// Ring of the most recent [`LogEntry`] records.
#[derive(Debug)]
pub struct DebugLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    next_id: u64,
}

impl Default for DebugLog {
    fn default() -> Self {
        Self::with_capacity(MAX_LOG_ENTRIES)
    }
}

impl DebugLog {
    /// Creates a journal holding at most `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 0,
        }
    }

    /// Records a message and emits it through `tracing`.
    ///
    /// Returns the entry id.
    pub fn record(&mut self, level: Level, message: impl Into<String>) -> u64 {
        let message = message.into();

        match level {
            Level::ERROR => error!("{message}"),
            Level::WARN => warn!("{message}"),
            Level::INFO => info!("{message}"),
            Level::DEBUG => debug!("{message}"),
            _ => trace!("{message}"),
        }

        let id = self.next_id;
        self.next_id += 1;

        if self.capacity == 0 {
            return id;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            id,
            timestamp: SystemTime::now(),
            level,
            message,
        });
        id
    }

    /// Returns the entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Removes every entry. Ids keep increasing.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_clear() {
        let mut log = DebugLog::default();
        assert_eq!(log.record(Level::INFO, "BLE link established"), 0);
        assert_eq!(log.record(Level::WARN, "BLE link dropped"), 1);

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].level, Level::WARN);
        assert_eq!(entries[1].message, "BLE link dropped");

        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.record(Level::DEBUG, "again"), 2);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut log = DebugLog::default();
        for n in 0..(MAX_LOG_ENTRIES + 5) {
            log.record(Level::DEBUG, format!("entry {n}"));
        }

        let entries = log.entries();
        assert_eq!(entries.len(), MAX_LOG_ENTRIES);
        assert_eq!(entries[0].id, 5);
        assert_eq!(entries[0].message, "entry 5");
    }
}
