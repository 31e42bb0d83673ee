//! Windowed per-session event log.

use std::collections::VecDeque;

use ponder_core::{EventDraft, SessionEvent};

/// Events retained for replay, oldest first.
///
/// Sequence numbers start at 0 and are never reused. Once `capacity` events
/// are held, each append drops the oldest one and `first_sequence` advances.
#[derive(Debug)]
pub struct SessionEventLog {
    events: VecDeque<SessionEvent>,
    capacity: usize,
    next_sequence: u64,
    dropped: u64,
}

/// Result of reading the log from a cursor.
#[derive(Debug, Default)]
pub struct Replay {
    /// `(requested, first_available)` when the cursor predates the window.
    pub gap: Option<(u64, u64)>,
    /// Retained events at or after the cursor.
    pub events: Vec<SessionEvent>,
}

impl SessionEventLog {
    /// Empty log holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            next_sequence: 0,
            dropped: 0,
        }
    }

    /// Assign the next sequence and append. Returns the stored event.
    pub fn append(&mut self, draft: EventDraft) -> SessionEvent {
        let event = draft.into_event(self.next_sequence);
        self.next_sequence += 1;
        if self.events.len() == self.capacity {
            let _ = self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event.clone());
        event
    }

    /// Sequence the next append will get.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Oldest retained sequence (equals `next_sequence` when empty).
    pub fn first_sequence(&self) -> u64 {
        self.events
            .front()
            .map_or(self.next_sequence, |e| e.sequence)
    }

    /// Events evicted from the window so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Retained event count.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing has been retained.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Retained events with `sequence >= from`, flagging a gap when `from`
    /// has already been evicted.
    pub fn replay_from(&self, from: u64) -> Replay {
        let first = self.first_sequence();
        let gap = (self.dropped > 0 && from < first).then_some((from, first));
        let start = from.max(first);
        let skip = usize::try_from(start - first).unwrap_or(usize::MAX);
        Replay {
            gap,
            events: self.events.iter().skip(skip).cloned().collect(),
        }
    }

    /// All retained events.
    pub fn snapshot(&self) -> Vec<SessionEvent> {
        self.events.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ponder_core::EventKind;

    fn log_with(capacity: usize, n: usize) -> SessionEventLog {
        let mut log = SessionEventLog::new(capacity);
        for i in 0..n {
            let _ = log.append(EventDraft::new(EventKind::Thought, format!("e{i}")));
        }
        log
    }

    fn sequences(events: &[SessionEvent]) -> Vec<u64> {
        events.iter().map(|e| e.sequence).collect()
    }

    #[test]
    fn sequences_start_at_zero_and_increase() {
        let log = log_with(10, 4);
        assert_eq!(sequences(&log.snapshot()), vec![0, 1, 2, 3]);
        assert_eq!(log.next_sequence(), 4);
        assert_eq!(log.first_sequence(), 0);
        assert_eq!(log.dropped(), 0);
    }

    #[test]
    fn replay_from_cursor() {
        let log = log_with(10, 6);
        let replay = log.replay_from(4);
        assert!(replay.gap.is_none());
        assert_eq!(sequences(&replay.events), vec![4, 5]);
        assert!(log.replay_from(6).events.is_empty());
        assert!(log.replay_from(60).events.is_empty());
    }

    #[test]
    fn full_window_drops_oldest_without_renumbering() {
        let log = log_with(3, 5);
        assert_eq!(sequences(&log.snapshot()), vec![2, 3, 4]);
        assert_eq!(log.first_sequence(), 2);
        assert_eq!(log.dropped(), 2);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn replay_before_window_reports_gap() {
        let log = log_with(3, 5);
        let replay = log.replay_from(0);
        assert_eq!(replay.gap, Some((0, 2)));
        assert_eq!(sequences(&replay.events), vec![2, 3, 4]);

        let inside = log.replay_from(3);
        assert!(inside.gap.is_none());
        assert_eq!(sequences(&inside.events), vec![3, 4]);
    }

    #[test]
    fn empty_log() {
        let log = SessionEventLog::new(5);
        assert!(log.is_empty());
        assert_eq!(log.first_sequence(), 0);
        let replay = log.replay_from(0);
        assert!(replay.gap.is_none());
        assert!(replay.events.is_empty());
    }
}
