//! Session storage
//!
//! Sessions live in an indexed arena: a dense `Vec<Session>` plus lookup maps
//! from session id and URL to arena slots. Memory is bounded by age-based
//! cleanup, which compacts the arena and rebuilds both indexes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AnalyticsError;
use crate::types::{Event, Session, SessionDescriptor};

/// Default retention window for stored sessions
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// In-memory session store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStore {
    sessions: Vec<Session>,
    #[serde(skip)]
    by_id: HashMap<String, usize>,
    #[serde(skip)]
    by_url: HashMap<String, Vec<usize>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session now and return its identifier
    pub fn start_session(&mut self, descriptor: SessionDescriptor) -> String {
        self.start_session_at(descriptor, Utc::now())
    }

    /// Start a session at an explicit time and return its identifier
    pub fn start_session_at(
        &mut self,
        descriptor: SessionDescriptor,
        started_at: DateTime<Utc>,
    ) -> String {
        let mut id = generate_session_id(started_at);
        while self.by_id.contains_key(&id) {
            id = generate_session_id(started_at);
        }

        let session = Session::from_descriptor(id.clone(), descriptor, started_at);
        info!(session_id = %id, url = %session.url, "session started");

        let slot = self.sessions.len();
        self.by_url.entry(session.url.clone()).or_default().push(slot);
        self.by_id.insert(id.clone(), slot);
        self.sessions.push(session);
        id
    }

    /// Close a session now. Unknown ids are ignored and return `false`.
    pub fn end_session(&mut self, id: &str) -> bool {
        self.end_session_at(id, Utc::now())
    }

    /// Close a session at an explicit time.
    ///
    /// The first end timestamp wins; ending an already closed session is a no-op.
    pub fn end_session_at(&mut self, id: &str, ended_at: DateTime<Utc>) -> bool {
        let Some(session) = self.get_mut(id) else {
            debug!(session_id = %id, "end requested for unknown session");
            return false;
        };

        if session.ended_at.is_none() {
            session.ended_at = Some(ended_at);
            info!(
                session_id = %id,
                events = session.events.len(),
                "session ended"
            );
        }
        true
    }

    /// Append an already validated event. Returns `false` for unknown sessions.
    pub fn append(&mut self, id: &str, event: Event) -> bool {
        match self.get_mut(id) {
            Some(session) => {
                session.events.push(event);
                true
            }
            None => false,
        }
    }

    /// Remove sessions older than the retention window, measured from now
    pub fn cleanup(&mut self, retention_days: u32) -> usize {
        self.cleanup_at(retention_days, Utc::now())
    }

    /// Remove sessions whose start precedes `now - retention_days`.
    ///
    /// Returns the number of sessions removed. A window reaching past the
    /// earliest representable time removes nothing.
    pub fn cleanup_at(&mut self, retention_days: u32, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = now.checked_sub_signed(Duration::days(i64::from(retention_days))) else {
            debug!(retention_days, "retention window exceeds calendar range; nothing expired");
            return 0;
        };
        let before = self.sessions.len();

        self.sessions.retain(|s| s.started_at >= cutoff);

        let removed = before - self.sessions.len();
        if removed > 0 {
            self.rebuild_index();
            info!(removed, retention_days, "expired sessions removed");
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.by_id.get(id).map(|&slot| &self.sessions[slot])
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        match self.by_id.get(id) {
            Some(&slot) => self.sessions.get_mut(slot),
            None => None,
        }
    }

    /// Sessions recorded for `url`, in start order
    pub fn sessions_for(&self, url: &str) -> Vec<&Session> {
        self.by_url
            .get(url)
            .map(|slots| slots.iter().map(|&slot| &self.sessions[slot]).collect())
            .unwrap_or_default()
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Distinct URLs with at least one stored session, sorted
    pub fn urls(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = self.by_url.keys().map(|u| u.as_str()).collect();
        urls.sort_unstable();
        urls
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions without an end timestamp
    pub fn active_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_active()).count()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
        self.by_id.clear();
        self.by_url.clear();
    }

    /// Load a store from a JSON snapshot
    pub fn from_json(json: &str) -> Result<Self, AnalyticsError> {
        let mut store: SessionStore = serde_json::from_str(json)
            .map_err(|e| AnalyticsError::ParseError(format!("Failed to parse session snapshot: {}", e)))?;
        store.rebuild_index();
        Ok(store)
    }

    /// Serialize the store to a JSON snapshot
    pub fn to_json(&self) -> Result<String, AnalyticsError> {
        Ok(serde_json::to_string(self)?)
    }

    fn rebuild_index(&mut self) {
        self.by_id.clear();
        self.by_url.clear();
        for (slot, session) in self.sessions.iter().enumerate() {
            if let Some(previous) = self.by_id.insert(session.id.clone(), slot) {
                warn!(session_id = %session.id, previous, slot, "duplicate session id; later entry wins lookups");
            }
            self.by_url.entry(session.url.clone()).or_default().push(slot);
        }
    }
}

/// `session_<start millis>_<uuid v4>`; unique even within one millisecond
fn generate_session_id(at: DateTime<Utc>) -> String {
    format!("session_{}_{}", at.timestamp_millis(), Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn page_view(at: DateTime<Utc>) -> Event {
        Event {
            timestamp: at,
            kind: EventKind::PageView,
            point: None,
            element: None,
            scroll_depth: None,
            value: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_start_session_creates_empty_session() {
        let mut store = SessionStore::new();
        let descriptor = SessionDescriptor {
            url: "/pricing".into(),
            user_id: Some("u-1".into()),
            country: Some("DE".into()),
            ..Default::default()
        };

        let id = store.start_session_at(descriptor, t0());
        let session = store.get(&id).unwrap();

        assert!(id.starts_with("session_"));
        assert_eq!(session.url, "/pricing");
        assert_eq!(session.user_id.as_deref(), Some("u-1"));
        assert_eq!(session.country.as_deref(), Some("DE"));
        assert_eq!(session.started_at, t0());
        assert!(session.ended_at.is_none());
        assert!(session.events.is_empty());
    }

    #[test]
    fn test_ids_unique_within_same_millisecond() {
        let mut store = SessionStore::new();
        let ids: HashSet<String> = (0..500)
            .map(|_| store.start_session_at(SessionDescriptor::for_url("/"), t0()))
            .collect();

        assert_eq!(ids.len(), 500);
        assert_eq!(store.len(), 500);
    }

    #[test]
    fn test_end_session() {
        let mut store = SessionStore::new();
        let id = store.start_session_at(SessionDescriptor::for_url("/"), t0());

        assert!(store.end_session_at(&id, t0() + Duration::seconds(30)));
        assert_eq!(
            store.get(&id).unwrap().ended_at,
            Some(t0() + Duration::seconds(30))
        );

        // Second end keeps the first timestamp
        assert!(store.end_session_at(&id, t0() + Duration::seconds(90)));
        assert_eq!(
            store.get(&id).unwrap().ended_at,
            Some(t0() + Duration::seconds(30))
        );
        assert_eq!(store.active_count(), 0);
    }

    #[test]
    fn test_end_unknown_session_is_noop() {
        let mut store = SessionStore::new();
        store.start_session_at(SessionDescriptor::for_url("/"), t0());

        assert!(!store.end_session_at("session_0_missing", t0()));
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn test_append_unknown_session() {
        let mut store = SessionStore::new();
        assert!(!store.append("nope", page_view(t0())));
        assert!(store.is_empty());
    }

    #[test]
    fn test_cleanup_removes_old_sessions_and_reindexes() {
        let mut store = SessionStore::new();
        let now = t0();

        let old = store.start_session_at(SessionDescriptor::for_url("/a"), now - Duration::days(40));
        let recent = store.start_session_at(SessionDescriptor::for_url("/a"), now - Duration::days(2));
        let other = store.start_session_at(SessionDescriptor::for_url("/b"), now - Duration::days(31));

        assert_eq!(store.cleanup_at(30, now), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get(&old).is_none());
        assert!(store.get(&other).is_none());

        // Index still resolves after compaction
        assert!(store.append(&recent, page_view(now)));
        assert_eq!(store.get(&recent).unwrap().events.len(), 1);
        assert_eq!(store.sessions_for("/a").len(), 1);
        assert!(store.sessions_for("/b").is_empty());
        assert_eq!(store.urls(), vec!["/a"]);

        // Idempotent
        assert_eq!(store.cleanup_at(30, now), 0);
    }

    #[test]
    fn test_cleanup_with_huge_retention_keeps_everything() {
        let mut store = SessionStore::new();
        store.start_session_at(SessionDescriptor::for_url("/"), t0() - Duration::days(4000));
        store.start_session_at(SessionDescriptor::for_url("/"), t0());

        assert_eq!(store.cleanup_at(u32::MAX, t0()), 0);
        assert_eq!(store.cleanup(u32::MAX), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_sessions_for_url() {
        let mut store = SessionStore::new();
        let first = store.start_session_at(SessionDescriptor::for_url("/pricing"), t0());
        store.start_session_at(SessionDescriptor::for_url("/about"), t0());
        let second = store.start_session_at(SessionDescriptor::for_url("/pricing"), t0());

        let pricing: Vec<&str> = store
            .sessions_for("/pricing")
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(pricing, vec![first.as_str(), second.as_str()]);
        assert!(store.sessions_for("/missing").is_empty());
    }

    #[test]
    fn test_snapshot_roundtrip_rebuilds_index() {
        let mut store = SessionStore::new();
        let id = store.start_session_at(SessionDescriptor::for_url("/pricing"), t0());
        store.append(&id, page_view(t0()));

        let json = store.to_json().unwrap();
        let mut restored = SessionStore::from_json(&json).unwrap();

        assert_eq!(restored.len(), 1);
        assert_eq!(restored.sessions_for("/pricing").len(), 1);
        assert!(restored.append(&id, page_view(t0())));
        assert_eq!(restored.get(&id).unwrap().events.len(), 2);
    }

    #[test]
    fn test_invalid_snapshot() {
        let result = SessionStore::from_json("not json");
        assert!(matches!(result, Err(AnalyticsError::ParseError(_))));
    }
}
