use heapless::HistoryBuffer;
use serde::{Deserialize, Serialize};

pub const EVENT_LOG_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    StateChange,
    CommandAccepted,
    CommandRejected,
    FaultReported,
    FaultCleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: u32,
    pub kind: EventKind,
    pub data: [u8; 4],
}

/// Ring log of recent module events. The oldest entry is overwritten once
/// the log is full.
#[derive(Debug)]
pub struct EventLog {
    events: HistoryBuffer<EventRecord, EVENT_LOG_CAPACITY>,
    total: u32,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: HistoryBuffer::new(),
            total: 0,
        }
    }

    pub fn record(&mut self, timestamp: u32, kind: EventKind, data: [u8; 4]) {
        self.events.write(EventRecord { timestamp, kind, data });
        self.total = self.total.wrapping_add(1);
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.events.oldest_ordered()
    }

    pub fn latest(&self) -> Option<&EventRecord> {
        self.events.recent()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.len() == 0
    }

    /// Events written since start, including overwritten ones.
    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iterates_oldest_first() {
        let mut log = EventLog::new();
        log.record(10, EventKind::StateChange, [0, 1, 0, 0]);
        log.record(20, EventKind::CommandAccepted, [0x01, 0x00, 0, 0]);

        let stamps: Vec<u32> = log.iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![10, 20]);
        assert_eq!(log.latest().map(|e| e.kind), Some(EventKind::CommandAccepted));
    }

    #[test]
    fn test_overwrites_oldest_when_full() {
        let mut log = EventLog::new();
        for t in 0..(EVENT_LOG_CAPACITY as u32 + 5) {
            log.record(t, EventKind::FaultReported, [0; 4]);
        }

        assert_eq!(log.len(), EVENT_LOG_CAPACITY);
        assert_eq!(log.total(), EVENT_LOG_CAPACITY as u32 + 5);
        assert_eq!(log.iter().next().map(|e| e.timestamp), Some(5));
    }
}
