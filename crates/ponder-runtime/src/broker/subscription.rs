//! One observer's view of a session: buffered replay, then live events.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::Stream;
use ponder_core::{SessionEvent, SessionId, SubscriptionId};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use super::session_broker::SessionSlot;
use crate::metrics::SUBSCRIPTIONS_ACTIVE;

/// What a subscriber receives.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscriptionItem {
    /// The next event in sequence order.
    Event(SessionEvent),
    /// Events before `first_available` were evicted and cannot be replayed.
    Gap {
        /// Cursor the subscriber asked for.
        requested: u64,
        /// Oldest sequence still buffered.
        first_available: u64,
    },
    /// The subscriber fell too far behind and was disconnected.
    Lagged {
        /// Last sequence delivered before the disconnect.
        last_seen: Option<u64>,
    },
}

/// A live attachment to a session.
///
/// Yields buffered events first, then live ones, with no gap or duplicate at
/// the switch. Ends after the session's terminal event. Dropping it detaches
/// from the broker.
pub struct Subscription {
    id: SubscriptionId,
    session_id: SessionId,
    from_sequence: u64,
    next_sequence: u64,
    last_seen: Option<u64>,
    replay: VecDeque<SubscriptionItem>,
    live: Option<mpsc::Receiver<SessionEvent>>,
    lagged: Arc<AtomicBool>,
    lag_reported: bool,
    slot: Option<Weak<SessionSlot>>,
}

impl Subscription {
    pub(crate) fn attached(
        id: SubscriptionId,
        session_id: SessionId,
        from_sequence: u64,
        next_sequence: u64,
        replay: VecDeque<SubscriptionItem>,
        live: Option<(mpsc::Receiver<SessionEvent>, Arc<AtomicBool>)>,
        slot: Weak<SessionSlot>,
    ) -> Self {
        metrics::gauge!(SUBSCRIPTIONS_ACTIVE).increment(1.0);
        let (live, lagged) = match live {
            Some((rx, lagged)) => (Some(rx), lagged),
            None => (None, Arc::new(AtomicBool::new(false))),
        };
        Self {
            id,
            session_id,
            from_sequence,
            next_sequence,
            last_seen: None,
            replay,
            live,
            lagged,
            lag_reported: false,
            slot: Some(slot),
        }
    }

    /// Replay of a finished session's stored events; never goes live.
    pub fn replay_only(session_id: SessionId, events: Vec<SessionEvent>, from_sequence: u64) -> Self {
        let next_sequence = events.last().map_or(0, |e| e.sequence + 1);
        let replay = events
            .into_iter()
            .filter(|e| e.sequence >= from_sequence)
            .map(SubscriptionItem::Event)
            .collect();
        Self {
            id: SubscriptionId::new(),
            session_id,
            from_sequence,
            next_sequence,
            last_seen: None,
            replay,
            live: None,
            lagged: Arc::new(AtomicBool::new(false)),
            lag_reported: false,
            slot: None,
        }
    }

    /// Subscription ID.
    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    /// Session being observed.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Cursor requested at attach.
    pub fn from_sequence(&self) -> u64 {
        self.from_sequence
    }

    /// Session's next sequence at attach time.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Last event sequence delivered.
    pub fn last_seen(&self) -> Option<u64> {
        self.last_seen
    }

    /// Whether live delivery is still attached.
    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Next item, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<SubscriptionItem> {
        if let Some(item) = self.replay.pop_front() {
            if let SubscriptionItem::Event(event) = &item {
                self.last_seen = Some(event.sequence);
            }
            return Some(item);
        }

        loop {
            let rx = self.live.as_mut()?;
            match rx.recv().await {
                Some(event) => {
                    let duplicate = event.sequence < self.from_sequence
                        || self.last_seen.is_some_and(|seen| event.sequence <= seen);
                    if duplicate {
                        continue;
                    }
                    self.last_seen = Some(event.sequence);
                    return Some(SubscriptionItem::Event(event));
                }
                None => {
                    self.live = None;
                    if self.lagged.load(Ordering::Acquire) && !self.lag_reported {
                        self.lag_reported = true;
                        debug!(
                            session_id = %self.session_id,
                            subscription_id = %self.id,
                            last_seen = self.last_seen,
                            "subscription lagged"
                        );
                        return Some(SubscriptionItem::Lagged {
                            last_seen: self.last_seen,
                        });
                    }
                    return None;
                }
            }
        }
    }

    /// Adapt into a [`Stream`] of items.
    pub fn into_stream(self) -> impl Stream<Item = SubscriptionItem> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            let item = sub.recv().await?;
            Some((item, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        metrics::gauge!(SUBSCRIPTIONS_ACTIVE).decrement(1.0);
        if let Some(slot) = slot.upgrade() {
            let _ = slot.remove_subscriber(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("from_sequence", &self.from_sequence)
            .field("last_seen", &self.last_seen)
            .field("live", &self.live.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use ponder_core::{EventDraft, EventKind};

    fn events(n: u64) -> Vec<SessionEvent> {
        (0..n)
            .map(|i| EventDraft::new(EventKind::Thought, format!("e{i}")).into_event(i))
            .collect()
    }

    #[tokio::test]
    async fn replay_only_filters_and_ends() {
        let mut sub = Subscription::replay_only(SessionId::from("s"), events(5), 3);
        assert_eq!(sub.next_sequence(), 5);
        assert!(!sub.is_live());
        let mut seen = Vec::new();
        while let Some(SubscriptionItem::Event(e)) = sub.recv().await {
            seen.push(e.sequence);
        }
        assert_eq!(seen, vec![3, 4]);
        assert_eq!(sub.last_seen(), Some(4));
    }

    #[tokio::test]
    async fn live_events_below_cursor_are_skipped() {
        let (tx, rx) = mpsc::channel(8);
        let sub = Subscription::attached(
            SubscriptionId::new(),
            SessionId::from("s"),
            2,
            0,
            VecDeque::new(),
            Some((rx, Arc::new(AtomicBool::new(false)))),
            Weak::new(),
        );
        for event in events(4) {
            tx.send(event).await.unwrap();
        }
        drop(tx);
        let seqs: Vec<u64> = sub
            .into_stream()
            .filter_map(|item| async move {
                match item {
                    SubscriptionItem::Event(e) => Some(e.sequence),
                    _ => None,
                }
            })
            .collect()
            .await;
        assert_eq!(seqs, vec![2, 3]);
    }

    #[tokio::test]
    async fn lagged_reported_once_when_channel_closes() {
        let (tx, rx) = mpsc::channel(8);
        let lagged = Arc::new(AtomicBool::new(false));
        let mut sub = Subscription::attached(
            SubscriptionId::new(),
            SessionId::from("s"),
            0,
            0,
            VecDeque::new(),
            Some((rx, lagged.clone())),
            Weak::new(),
        );
        tx.send(events(1).remove(0)).await.unwrap();
        lagged.store(true, Ordering::Release);
        drop(tx);

        assert!(matches!(sub.recv().await, Some(SubscriptionItem::Event(_))));
        assert_eq!(
            sub.recv().await,
            Some(SubscriptionItem::Lagged { last_seen: Some(0) })
        );
        assert_eq!(sub.recv().await, None);
    }
}
