//! The single synchronized owner of every active session.
//!
//! Each session lives in a [`SessionSlot`] whose one mutex covers the record,
//! the event log, and the subscriber list. Publishing and attaching both take
//! that lock, which is what makes replay-then-live gapless: a subscriber's
//! snapshot and its registration happen atomically with respect to appends.
//!
//! Fan-out never blocks the producer. Each subscriber has a bounded queue;
//! one that fills up is dropped and told it lagged.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use ponder_core::{
    EventDraft, EventKind, SessionEvent, SessionId, SessionRecord, SessionStatus, SubscriptionId,
};
use ponder_settings::BrokerSettings;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, instrument, warn};

use super::log::SessionEventLog;
use super::subscription::{Subscription, SubscriptionItem};
use crate::errors::BrokerError;
use crate::history::HistoryStore;
use crate::metrics::{
    SESSION_EVENTS_EVICTED_TOTAL, SESSION_EVENTS_PUBLISHED_TOTAL, SESSIONS_ACTIVE,
    SESSIONS_FINISHED_TOTAL, SUBSCRIBER_LAGGED_TOTAL,
};

/// Broker limits.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Sessions accepted before `register` fails.
    pub max_active_sessions: usize,
    /// Events retained per session for replay.
    pub event_buffer_capacity: usize,
    /// Queued events per subscriber before it is disconnected.
    pub subscriber_queue_capacity: usize,
    /// Time a finished session stays readable before eviction.
    pub eviction_grace: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::from(&BrokerSettings::default())
    }
}

impl From<&BrokerSettings> for BrokerConfig {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            max_active_sessions: settings.max_active_sessions,
            event_buffer_capacity: settings.event_buffer_capacity,
            subscriber_queue_capacity: settings.subscriber_queue_capacity.max(1),
            eviction_grace: Duration::from_millis(settings.eviction_grace_ms),
        }
    }
}

/// How a session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Final answer produced.
    Completed,
    /// Aborted by a fatal error.
    Failed(String),
}

/// Read-only view of a registered session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSnapshot {
    /// Session record.
    #[serde(flatten)]
    pub record: SessionRecord,
    /// Attached live subscribers.
    pub subscriber_count: usize,
    /// Sequence the next event will get.
    pub next_sequence: u64,
    /// Oldest event still available for replay.
    pub first_sequence: u64,
    /// Whether the session still accepts events.
    pub active: bool,
}

struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::Sender<SessionEvent>,
    lagged: Arc<AtomicBool>,
}

struct SlotInner {
    record: SessionRecord,
    log: SessionEventLog,
    subscribers: Vec<Subscriber>,
    closed: bool,
}

impl SlotInner {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            record: self.record.clone(),
            subscriber_count: self.subscribers.len(),
            next_sequence: self.log.next_sequence(),
            first_sequence: self.log.first_sequence(),
            active: !self.closed,
        }
    }

    /// Append and fan out. Caller holds the slot lock.
    fn publish(&mut self, draft: EventDraft) -> SessionEvent {
        let dropped_before = self.log.dropped();
        let event = self.log.append(draft);
        self.record.event_count = self.log.next_sequence();
        if self.log.dropped() > dropped_before {
            metrics::counter!(SESSION_EVENTS_EVICTED_TOTAL).increment(1);
        }
        metrics::counter!(SESSION_EVENTS_PUBLISHED_TOTAL, "type" => event.kind.as_str())
            .increment(1);

        let session_id = &self.record.session_id;
        self.subscribers.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                sub.lagged.store(true, Ordering::Release);
                metrics::counter!(SUBSCRIBER_LAGGED_TOTAL).increment(1);
                warn!(
                    %session_id,
                    subscription_id = %sub.id,
                    sequence = event.sequence,
                    "subscriber queue full, disconnecting"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
        event
    }
}

/// One session's state, shared between the broker map and its subscriptions.
pub struct SessionSlot {
    inner: Mutex<SlotInner>,
}

impl SessionSlot {
    pub(crate) fn remove_subscriber(&self, id: &SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|s| &s.id != id);
        inner.subscribers.len() != before
    }
}

/// Owns active sessions' records, event logs, and subscribers.
#[derive(Clone)]
pub struct SessionBroker {
    sessions: Arc<DashMap<SessionId, Arc<SessionSlot>>>,
    admission: Arc<Mutex<()>>,
    config: BrokerConfig,
    history: Arc<dyn HistoryStore>,
}

impl SessionBroker {
    /// Create a broker that flushes finished sessions to `history`.
    pub fn new(config: BrokerConfig, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            admission: Arc::new(Mutex::new(())),
            config,
            history,
        }
    }

    /// Broker limits.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// History collaborator.
    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    fn slot(&self, session_id: &SessionId) -> Result<Arc<SessionSlot>, BrokerError> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BrokerError::SessionNotFound(session_id.clone()))
    }

    /// Add a new session. Fails when the active limit is reached.
    #[instrument(skip(self, record), fields(session_id = %record.session_id))]
    pub fn register(&self, record: SessionRecord) -> Result<(), BrokerError> {
        let _admission = self.admission.lock();
        let active = self.active_count();
        if active >= self.config.max_active_sessions {
            warn!(active, max = self.config.max_active_sessions, "session rejected at capacity");
            return Err(BrokerError::CapacityExceeded {
                max: self.config.max_active_sessions,
            });
        }
        let session_id = record.session_id.clone();
        if self.sessions.contains_key(&session_id) {
            return Err(BrokerError::AlreadyRegistered(session_id));
        }
        let slot = Arc::new(SessionSlot {
            inner: Mutex::new(SlotInner {
                record,
                log: SessionEventLog::new(self.config.event_buffer_capacity),
                subscribers: Vec::new(),
                closed: false,
            }),
        });
        let _ = self.sessions.insert(session_id, slot);
        self.update_gauge();
        debug!("session registered");
        Ok(())
    }

    /// Append an event to the session's log and deliver it to subscribers.
    pub fn publish(&self, session_id: &SessionId, draft: EventDraft) -> Result<SessionEvent, BrokerError> {
        let slot = self.slot(session_id)?;
        let mut inner = slot.inner.lock();
        if inner.closed {
            return Err(BrokerError::SessionClosed(session_id.clone()));
        }
        let event = inner.publish(draft);
        debug!(%session_id, sequence = event.sequence, kind = event.kind.as_str(), "event published");
        Ok(event)
    }

    /// Attach an observer starting at `from_sequence`.
    ///
    /// Buffered events are replayed first; live events follow with no gap or
    /// duplicate. A closed session replays and then ends.
    #[instrument(skip(self), fields(%session_id))]
    pub fn subscribe(&self, session_id: &SessionId, from_sequence: u64) -> Result<Subscription, BrokerError> {
        let slot = self.slot(session_id)?;
        let mut inner = slot.inner.lock();

        let replay = inner.log.replay_from(from_sequence);
        let mut items = VecDeque::with_capacity(replay.events.len() + 1);
        if let Some((requested, first_available)) = replay.gap {
            warn!(requested, first_available, "replay starts after an evicted range");
            items.push_back(SubscriptionItem::Gap {
                requested,
                first_available,
            });
        }
        items.extend(replay.events.into_iter().map(SubscriptionItem::Event));

        let id = SubscriptionId::new();
        let live = if inner.closed {
            None
        } else {
            let (tx, rx) = mpsc::channel(self.config.subscriber_queue_capacity);
            let lagged = Arc::new(AtomicBool::new(false));
            inner.subscribers.push(Subscriber {
                id: id.clone(),
                tx,
                lagged: Arc::clone(&lagged),
            });
            Some((rx, lagged))
        };
        debug!(
            subscription_id = %id,
            replayed = items.len(),
            live = live.is_some(),
            "subscription attached"
        );

        Ok(Subscription::attached(
            id,
            session_id.clone(),
            from_sequence,
            inner.log.next_sequence(),
            items,
            live,
            Arc::downgrade(&slot),
        ))
    }

    /// Detach a subscriber. Returns whether it was attached.
    pub fn unsubscribe(&self, session_id: &SessionId, subscription_id: &SubscriptionId) -> bool {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .is_some_and(|slot| slot.remove_subscriber(subscription_id))
    }

    /// Update the session's status.
    pub fn set_status(&self, session_id: &SessionId, status: SessionStatus) -> Result<(), BrokerError> {
        let slot = self.slot(session_id)?;
        slot.inner.lock().record.status = status;
        Ok(())
    }

    /// Record the latest todo list.
    pub fn set_todo(&self, session_id: &SessionId, todo: impl Into<String>) -> Result<(), BrokerError> {
        let slot = self.slot(session_id)?;
        slot.inner.lock().record.todo = Some(todo.into());
        Ok(())
    }

    /// Finish a session: publish the terminal event, close the stream, hand
    /// the record and log to history, and schedule eviction.
    #[instrument(skip(self, outcome), fields(%session_id))]
    pub async fn complete_session(
        &self,
        session_id: &SessionId,
        outcome: SessionOutcome,
    ) -> Result<(), BrokerError> {
        let slot = self.slot(session_id)?;
        let (record, events, dropped) = {
            let mut inner = slot.inner.lock();
            if inner.closed {
                return Err(BrokerError::SessionClosed(session_id.clone()));
            }
            inner.record.completed_at = Some(Utc::now());
            let draft = match &outcome {
                SessionOutcome::Completed => {
                    inner.record.status = SessionStatus::Completed;
                    EventDraft::new(EventKind::End, "completed")
                }
                SessionOutcome::Failed(message) => {
                    inner.record.status = SessionStatus::Failed;
                    inner.record.error = Some(message.clone());
                    EventDraft::new(EventKind::Error, message.clone()).with_error(message.clone())
                }
            };
            let _ = inner.publish(draft);
            inner.closed = true;
            inner.subscribers.clear();
            (inner.record.clone(), inner.log.snapshot(), inner.log.dropped())
        };

        let status = record.status;
        metrics::counter!(SESSIONS_FINISHED_TOTAL, "status" => status.as_str()).increment(1);
        info!(status = status.as_str(), events = record.event_count, "session finished");
        if dropped > 0 {
            warn!(dropped, "history receives only the retained event window");
        }

        if let Err(err) = self.history.save(record, events).await {
            warn!(error = %err, "failed to save session to history");
        }
        self.schedule_eviction(session_id.clone());
        Ok(())
    }

    /// Stop a session without flushing it to history.
    #[instrument(skip(self), fields(%session_id))]
    pub fn terminate_session(&self, session_id: &SessionId, reason: &str) -> Result<(), BrokerError> {
        let slot = self.slot(session_id)?;
        {
            let mut inner = slot.inner.lock();
            if inner.closed {
                return Err(BrokerError::SessionClosed(session_id.clone()));
            }
            inner.record.status = SessionStatus::Failed;
            inner.record.completed_at = Some(Utc::now());
            inner.record.error = Some(reason.to_owned());
            let _ = inner.publish(EventDraft::new(EventKind::Error, "terminated").with_error(reason));
            inner.closed = true;
            inner.subscribers.clear();
        }
        metrics::counter!(SESSIONS_FINISHED_TOTAL, "status" => "terminated").increment(1);
        info!(reason, "session terminated");
        self.schedule_eviction(session_id.clone());
        Ok(())
    }

    fn schedule_eviction(&self, session_id: SessionId) {
        let grace = self.config.eviction_grace;
        let handle = tokio::runtime::Handle::try_current();
        match handle {
            Ok(handle) if !grace.is_zero() => {
                let broker = self.clone();
                let _ = handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    broker.evict(&session_id);
                });
            }
            _ => self.evict(&session_id),
        }
    }

    fn evict(&self, session_id: &SessionId) {
        if self.sessions.remove(session_id).is_some() {
            debug!(%session_id, "session evicted");
            self.update_gauge();
        }
    }

    fn update_gauge(&self) {
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(SESSIONS_ACTIVE).set(self.sessions.len() as f64);
    }

    /// Snapshot of one session.
    pub fn get(&self, session_id: &SessionId) -> Option<SessionSnapshot> {
        let slot = self.slot(session_id).ok()?;
        let snapshot = slot.inner.lock().snapshot();
        Some(snapshot)
    }

    /// Registered sessions, newest first.
    pub fn list(&self, limit: usize, offset: usize) -> Vec<SessionSnapshot> {
        let slots: Vec<Arc<SessionSlot>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut snapshots: Vec<SessionSnapshot> =
            slots.iter().map(|slot| slot.inner.lock().snapshot()).collect();
        snapshots.sort_by(|a, b| {
            b.record
                .created_at
                .cmp(&a.record.created_at)
                .then_with(|| b.record.session_id.cmp(&a.record.session_id))
        });
        snapshots.into_iter().skip(offset).take(limit).collect()
    }

    /// Retained events for a registered session.
    pub fn events(&self, session_id: &SessionId) -> Option<Vec<SessionEvent>> {
        let slot = self.slot(session_id).ok()?;
        let events = slot.inner.lock().log.snapshot();
        Some(events)
    }

    /// Sessions still accepting events.
    pub fn active_count(&self) -> usize {
        let slots: Vec<Arc<SessionSlot>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        slots.iter().filter(|slot| !slot.inner.lock().closed).count()
    }

    /// Registered sessions, including finished ones awaiting eviction.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Whether the session is registered.
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistory;
    use assert_matches::assert_matches;

    fn config() -> BrokerConfig {
        BrokerConfig {
            max_active_sessions: 4,
            event_buffer_capacity: 100,
            subscriber_queue_capacity: 64,
            eviction_grace: Duration::from_secs(5),
        }
    }

    fn broker_with(config: BrokerConfig) -> (SessionBroker, Arc<MemoryHistory>) {
        let history = Arc::new(MemoryHistory::new());
        (SessionBroker::new(config, history.clone()), history)
    }

    fn register(broker: &SessionBroker, id: &str) -> SessionId {
        let session_id = SessionId::from(id);
        broker
            .register(SessionRecord::new(session_id.clone(), "q", "m"))
            .unwrap();
        session_id
    }

    fn publish_n(broker: &SessionBroker, id: &SessionId, n: usize) {
        for i in 0..n {
            let _ = broker
                .publish(id, EventDraft::new(EventKind::Thought, format!("e{i}")))
                .unwrap();
        }
    }

    async fn next_seq(sub: &mut Subscription) -> u64 {
        match sub.recv().await {
            Some(SubscriptionItem::Event(e)) => e.sequence,
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn register_rejects_over_capacity() {
        let (broker, _) = broker_with(BrokerConfig {
            max_active_sessions: 2,
            ..config()
        });
        let _ = register(&broker, "a");
        let _ = register(&broker, "b");
        let err = broker
            .register(SessionRecord::new(SessionId::from("c"), "q", "m"))
            .unwrap_err();
        assert_matches!(err, BrokerError::CapacityExceeded { max: 2 });
        assert_eq!(broker.active_count(), 2);
    }

    #[test]
    fn register_rejects_duplicate_id() {
        let (broker, _) = broker_with(config());
        let _ = register(&broker, "a");
        let err = broker
            .register(SessionRecord::new(SessionId::from("a"), "q", "m"))
            .unwrap_err();
        assert_matches!(err, BrokerError::AlreadyRegistered(_));
    }

    #[test]
    fn publish_assigns_contiguous_sequences() {
        let (broker, _) = broker_with(config());
        let id = register(&broker, "a");
        publish_n(&broker, &id, 3);
        let seqs: Vec<u64> = broker.events(&id).unwrap().iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(broker.get(&id).unwrap().record.event_count, 3);
        assert_matches!(
            broker.publish(&SessionId::from("zz"), EventDraft::new(EventKind::Thought, "x")),
            Err(BrokerError::SessionNotFound(_))
        );
    }

    #[tokio::test]
    async fn late_subscriber_gets_replay_then_live() {
        let (broker, _) = broker_with(config());
        let id = register(&broker, "a");
        publish_n(&broker, &id, 5);

        let mut sub = broker.subscribe(&id, 0).unwrap();
        assert_eq!(sub.next_sequence(), 5);
        publish_n(&broker, &id, 2);

        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(next_seq(&mut sub).await);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn concurrent_subscribers_see_same_order() {
        let (broker, _) = broker_with(config());
        let id = register(&broker, "a");
        publish_n(&broker, &id, 3);
        let mut first = broker.subscribe(&id, 0).unwrap();
        let mut second = broker.subscribe(&id, 2).unwrap();
        assert_eq!(broker.get(&id).unwrap().subscriber_count, 2);
        publish_n(&broker, &id, 5);

        let mut a = Vec::new();
        for _ in 0..8 {
            a.push(next_seq(&mut first).await);
        }
        let mut b = Vec::new();
        for _ in 0..6 {
            b.push(next_seq(&mut second).await);
        }
        assert_eq!(a, (0..8).collect::<Vec<_>>());
        assert_eq!(b, (2..8).collect::<Vec<_>>());
        assert_eq!(a.iter().filter(|s| **s == 7).count(), 1);
        assert_eq!(b.iter().filter(|s| **s == 7).count(), 1);
    }

    #[tokio::test]
    async fn reattach_from_last_seen_loses_nothing() {
        let (broker, _) = broker_with(config());
        let id = register(&broker, "a");
        let mut sub = broker.subscribe(&id, 0).unwrap();
        publish_n(&broker, &id, 3);
        for _ in 0..3 {
            let _ = next_seq(&mut sub).await;
        }
        let last_seen = sub.last_seen().unwrap();
        drop(sub);
        assert_eq!(broker.get(&id).unwrap().subscriber_count, 0);

        publish_n(&broker, &id, 4);
        let mut again = broker.subscribe(&id, last_seen + 1).unwrap();
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(next_seq(&mut again).await);
        }
        assert_eq!(seen, vec![3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn evicted_range_reports_gap_first() {
        let (broker, _) = broker_with(BrokerConfig {
            event_buffer_capacity: 4,
            ..config()
        });
        let id = register(&broker, "a");
        publish_n(&broker, &id, 10);

        let mut sub = broker.subscribe(&id, 0).unwrap();
        assert_eq!(
            sub.recv().await,
            Some(SubscriptionItem::Gap {
                requested: 0,
                first_available: 6
            })
        );
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(next_seq(&mut sub).await);
        }
        assert_eq!(seen, vec![6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn slow_subscriber_is_disconnected_with_lagged() {
        let (broker, _) = broker_with(BrokerConfig {
            subscriber_queue_capacity: 2,
            ..config()
        });
        let id = register(&broker, "a");
        let mut slow = broker.subscribe(&id, 0).unwrap();
        let mut fast = broker.subscribe(&id, 0).unwrap();

        let mut fast_seen = Vec::new();
        for i in 0..5 {
            let event = broker
                .publish(&id, EventDraft::new(EventKind::Thought, format!("e{i}")))
                .unwrap();
            assert_eq!(event.sequence, i);
            fast_seen.push(next_seq(&mut fast).await);
        }
        assert_eq!(fast_seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(broker.get(&id).unwrap().subscriber_count, 1);

        assert_eq!(next_seq(&mut slow).await, 0);
        assert_eq!(next_seq(&mut slow).await, 1);
        assert_eq!(
            slow.recv().await,
            Some(SubscriptionItem::Lagged { last_seen: Some(1) })
        );
        assert_eq!(slow.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn complete_flushes_to_history_then_evicts() {
        let (broker, history) = broker_with(config());
        let id = register(&broker, "a");
        broker.set_status(&id, SessionStatus::Running).unwrap();
        broker.set_todo(&id, "- [ ] a").unwrap();
        let mut sub = broker.subscribe(&id, 0).unwrap();
        publish_n(&broker, &id, 2);

        broker
            .complete_session(&id, SessionOutcome::Completed)
            .await
            .unwrap();

        assert_eq!(next_seq(&mut sub).await, 0);
        assert_eq!(next_seq(&mut sub).await, 1);
        match sub.recv().await {
            Some(SubscriptionItem::Event(e)) => assert_eq!(e.kind, EventKind::End),
            other => panic!("expected end event, got {other:?}"),
        }
        assert_eq!(sub.recv().await, None);

        let snapshot = broker.get(&id).unwrap();
        assert_eq!(snapshot.record.status, SessionStatus::Completed);
        assert!(!snapshot.active);
        assert_eq!(broker.active_count(), 0);
        assert_matches!(
            broker.publish(&id, EventDraft::new(EventKind::Thought, "late")),
            Err(BrokerError::SessionClosed(_))
        );

        let stored = history.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.events.len(), 3);
        assert_eq!(stored.record.todo.as_deref(), Some("- [ ] a"));

        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert!(!broker.contains(&id));
    }

    #[tokio::test]
    async fn failed_session_emits_error_event() {
        let (broker, history) = broker_with(config());
        let id = register(&broker, "a");
        broker
            .complete_session(&id, SessionOutcome::Failed("model unavailable".into()))
            .await
            .unwrap();
        let events = broker.events(&id).unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.kind, EventKind::Error);
        assert_eq!(last.error.as_deref(), Some("model unavailable"));
        let stored = history.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.record.status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn terminate_skips_history_and_isolates_sessions() {
        let (broker, history) = broker_with(config());
        let a = register(&broker, "a");
        let b = register(&broker, "b");
        let mut sub_b = broker.subscribe(&b, 0).unwrap();

        broker.terminate_session(&a, "terminated by user").unwrap();
        let snapshot = broker.get(&a).unwrap();
        assert_eq!(snapshot.record.status, SessionStatus::Failed);
        assert_eq!(snapshot.record.error.as_deref(), Some("terminated by user"));
        assert!(history.get(&a).await.unwrap().is_none());
        assert_matches!(
            broker.terminate_session(&a, "again"),
            Err(BrokerError::SessionClosed(_))
        );

        publish_n(&broker, &b, 1);
        assert_eq!(next_seq(&mut sub_b).await, 0);
        assert!(broker.get(&b).unwrap().active);
    }

    #[test]
    fn zero_grace_evicts_immediately() {
        let (broker, _) = broker_with(BrokerConfig {
            eviction_grace: Duration::ZERO,
            ..config()
        });
        let id = register(&broker, "a");
        broker.terminate_session(&id, "stop").unwrap();
        assert!(!broker.contains(&id));
        assert!(broker.is_empty());
    }

    #[tokio::test]
    async fn subscribe_to_closed_session_replays_and_ends() {
        let (broker, _) = broker_with(config());
        let id = register(&broker, "a");
        publish_n(&broker, &id, 2);
        broker.terminate_session(&id, "stop").unwrap();

        let mut sub = broker.subscribe(&id, 1).unwrap();
        assert!(!sub.is_live());
        assert_eq!(next_seq(&mut sub).await, 1);
        assert_eq!(next_seq(&mut sub).await, 2);
        assert_eq!(sub.recv().await, None);
        assert_matches!(
            broker.subscribe(&SessionId::from("nope"), 0),
            Err(BrokerError::SessionNotFound(_))
        );
    }

    #[test]
    fn list_is_newest_first_and_paginated() {
        let (broker, _) = broker_with(config());
        for (id, age) in [("a", 3), ("b", 1), ("c", 2)] {
            let mut record = SessionRecord::new(SessionId::from(id), "q", "m");
            record.created_at = Utc::now() - chrono::Duration::minutes(age);
            broker.register(record).unwrap();
        }
        let ids: Vec<String> = broker
            .list(10, 0)
            .into_iter()
            .map(|s| s.record.session_id.into_inner())
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert_eq!(broker.list(1, 2)[0].record.session_id.as_str(), "a");
        assert!(broker.list(10, 5).is_empty());
    }

    #[test]
    fn unsubscribe_detaches() {
        let (broker, _) = broker_with(config());
        let id = register(&broker, "a");
        let sub = broker.subscribe(&id, 0).unwrap();
        assert!(broker.unsubscribe(&id, sub.id()));
        assert!(!broker.unsubscribe(&id, sub.id()));
        assert_eq!(broker.get(&id).unwrap().subscriber_count, 0);
    }
}
