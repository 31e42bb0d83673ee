//! Completed-session storage.
//!
//! The broker hands each finished session's record and full event log to a
//! [`HistoryStore`]. [`JsonFileHistory`] keeps one pretty-printed JSON file
//! per session; [`MemoryHistory`] is for tests and history-less deployments.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use ponder_core::{EventKind, SessionEvent, SessionId, SessionRecord, SessionStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::HistoryError;

/// Characters of the final answer kept in listings.
const ANSWER_PREVIEW_CHARS: usize = 200;

/// A session as persisted: its record plus every event in order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    /// Final record.
    #[serde(flatten)]
    pub record: SessionRecord,
    /// Full event log.
    pub events: Vec<SessionEvent>,
}

impl StoredSession {
    /// Content of the `final_answer` event, if any.
    pub fn final_answer(&self) -> Option<&str> {
        self.events
            .iter()
            .rev()
            .find(|e| e.kind == EventKind::FinalAnswer)
            .map(|e| e.content.as_str())
    }

    /// Listing entry for this session.
    pub fn summary(&self) -> HistorySummary {
        let mut tools_used: Vec<String> = Vec::new();
        for tool in self
            .events
            .iter()
            .filter(|e| e.kind == EventKind::Action)
            .filter_map(|e| e.tool.as_ref())
        {
            if !tools_used.contains(tool) {
                tools_used.push(tool.clone());
            }
        }
        let step_count = self
            .events
            .iter()
            .filter(|e| {
                !matches!(
                    e.kind,
                    EventKind::Start | EventKind::End | EventKind::Error
                )
            })
            .count();
        HistorySummary {
            session_id: self.record.session_id.clone(),
            query: self.record.query.clone(),
            model: self.record.model.clone(),
            status: self.record.status,
            created_at: self.record.created_at,
            completed_at: self.record.completed_at,
            final_answer: self
                .final_answer()
                .map(|a| a.chars().take(ANSWER_PREVIEW_CHARS).collect()),
            step_count,
            tools_used,
        }
    }
}

/// One row of a history listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    /// Session ID.
    pub session_id: SessionId,
    /// Original query.
    pub query: String,
    /// Model used.
    pub model: String,
    /// Final status.
    pub status: SessionStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Completion time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Start of the final answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    /// Reasoning steps taken.
    pub step_count: usize,
    /// Distinct tools invoked.
    pub tools_used: Vec<String>,
}

/// Persistent storage for completed sessions.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist a completed session, replacing any previous copy.
    async fn save(&self, record: SessionRecord, events: Vec<SessionEvent>) -> Result<(), HistoryError>;

    /// Load one session.
    async fn get(&self, session_id: &SessionId) -> Result<Option<StoredSession>, HistoryError>;

    /// Sessions newest first.
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<HistorySummary>, HistoryError>;

    /// Remove a session. Returns whether it existed.
    async fn delete(&self, session_id: &SessionId) -> Result<bool, HistoryError>;
}

fn newest_first(summaries: &mut [HistorySummary]) {
    summaries.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.session_id.cmp(&a.session_id))
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON files
// ─────────────────────────────────────────────────────────────────────────────

/// One `{session_id}.json` file per session under a directory.
pub struct JsonFileHistory {
    dir: PathBuf,
}

impl JsonFileHistory {
    /// Store under `dir`, creating it if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "history directory ready");
        Ok(Self { dir })
    }

    /// Storage directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &SessionId) -> Result<PathBuf, HistoryError> {
        let id = session_id.as_str();
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(HistoryError::InvalidId(id.to_owned()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn read(path: &Path) -> Result<StoredSession, HistoryError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl HistoryStore for JsonFileHistory {
    async fn save(&self, record: SessionRecord, events: Vec<SessionEvent>) -> Result<(), HistoryError> {
        let path = self.path_for(&record.session_id)?;
        let stored = StoredSession { record, events };
        let json = serde_json::to_vec_pretty(&stored)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(
            session_id = %stored.record.session_id,
            events = stored.events.len(),
            "session saved to history"
        );
        Ok(())
    }

    async fn get(&self, session_id: &SessionId) -> Result<Option<StoredSession>, HistoryError> {
        let path = self.path_for(session_id)?;
        match Self::read(&path).await {
            Ok(stored) => Ok(Some(stored)),
            Err(HistoryError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<HistorySummary>, HistoryError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path).await {
                Ok(stored) => summaries.push(stored.summary()),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable history file"),
            }
        }
        newest_first(&mut summaries);
        Ok(summaries.into_iter().skip(offset).take(limit).collect())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<bool, HistoryError> {
        let path = self.path_for(session_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory
// ─────────────────────────────────────────────────────────────────────────────

/// History held in process memory.
#[derive(Default)]
pub struct MemoryHistory {
    sessions: RwLock<HashMap<SessionId, StoredSession>>,
}

impl MemoryHistory {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored session count.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn save(&self, record: SessionRecord, events: Vec<SessionEvent>) -> Result<(), HistoryError> {
        let id = record.session_id.clone();
        let _ = self
            .sessions
            .write()
            .insert(id, StoredSession { record, events });
        Ok(())
    }

    async fn get(&self, session_id: &SessionId) -> Result<Option<StoredSession>, HistoryError> {
        Ok(self.sessions.read().get(session_id).cloned())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<HistorySummary>, HistoryError> {
        let mut summaries: Vec<_> = self
            .sessions
            .read()
            .values()
            .map(StoredSession::summary)
            .collect();
        newest_first(&mut summaries);
        Ok(summaries.into_iter().skip(offset).take(limit).collect())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<bool, HistoryError> {
        Ok(self.sessions.write().remove(session_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use ponder_core::EventDraft;

    fn session(id: &str, minutes_ago: i64) -> (SessionRecord, Vec<SessionEvent>) {
        let mut record = SessionRecord::new(SessionId::from(id), format!("query {id}"), "m");
        record.created_at = Utc::now() - Duration::minutes(minutes_ago);
        record.status = SessionStatus::Completed;
        record.completed_at = Some(Utc::now());
        let events = vec![
            EventDraft::new(EventKind::Start, "q").into_event(0),
            EventDraft::new(EventKind::Planning, "plan").into_event(1),
            EventDraft::new(EventKind::Action, "calc")
                .with_tool("calculator")
                .into_event(2),
            EventDraft::new(EventKind::Action, "calc again")
                .with_tool("calculator")
                .into_event(3),
            EventDraft::new(EventKind::FinalAnswer, "x".repeat(300)).into_event(4),
            EventDraft::new(EventKind::End, "completed").into_event(5),
        ];
        record.event_count = events.len() as u64;
        (record, events)
    }

    #[test]
    fn summary_fields() {
        let (record, events) = session("s1", 0);
        let summary = StoredSession { record, events }.summary();
        assert_eq!(summary.step_count, 4);
        assert_eq!(summary.tools_used, vec!["calculator"]);
        assert_eq!(summary.final_answer.unwrap().len(), ANSWER_PREVIEW_CHARS);
    }

    #[tokio::test]
    async fn json_files_roundtrip_and_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileHistory::open(dir.path().join("history")).await.unwrap();

        for (id, age) in [("old", 30), ("new", 1), ("mid", 10)] {
            let (record, events) = session(id, age);
            store.save(record, events).await.unwrap();
        }

        let stored = store.get(&SessionId::from("mid")).await.unwrap().unwrap();
        assert_eq!(stored.events.len(), 6);
        assert_eq!(stored.events[2].tool.as_deref(), Some("calculator"));
        assert_eq!(stored.record.status, SessionStatus::Completed);

        let ids: Vec<_> = store
            .list(10, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.session_id.into_inner())
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);

        let page = store.list(1, 1).await.unwrap();
        assert_eq!(page[0].session_id.as_str(), "mid");
    }

    #[tokio::test]
    async fn json_files_missing_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileHistory::open(dir.path()).await.unwrap();
        assert!(store.get(&SessionId::from("nope")).await.unwrap().is_none());

        let (record, events) = session("gone", 0);
        store.save(record, events).await.unwrap();
        assert!(store.delete(&SessionId::from("gone")).await.unwrap());
        assert!(!store.delete(&SessionId::from("gone")).await.unwrap());
    }

    #[tokio::test]
    async fn json_files_reject_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileHistory::open(dir.path()).await.unwrap();
        let err = store.get(&SessionId::from("../etc/passwd")).await.unwrap_err();
        assert_matches!(err, HistoryError::InvalidId(_));
    }

    #[tokio::test]
    async fn json_files_skip_corrupt_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileHistory::open(dir.path()).await.unwrap();
        let (record, events) = session("good", 0);
        store.save(record, events).await.unwrap();
        std::fs::write(dir.path().join("bad.json"), b"{not json").unwrap();

        let listed = store.list(10, 0).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session_id.as_str(), "good");
    }

    #[tokio::test]
    async fn memory_store() {
        let store = MemoryHistory::new();
        assert!(store.is_empty());
        for (id, age) in [("a", 5), ("b", 1)] {
            let (record, events) = session(id, age);
            store.save(record, events).await.unwrap();
        }
        assert_eq!(store.len(), 2);
        let listed = store.list(10, 0).await.unwrap();
        assert_eq!(listed[0].session_id.as_str(), "b");
        assert!(store.delete(&SessionId::from("a")).await.unwrap());
        assert!(store.get(&SessionId::from("a")).await.unwrap().is_none());
    }
}
