//! In-process episodic memory.
//!
//! Each session keeps a bounded log of what happened to it. Recall for a
//! step returns the session's own relevant entries, best first, followed by
//! high-importance entries other sessions recorded for the same step.
//! Only the most recently active sessions are kept.

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;

use async_trait::async_trait;
use parking_lot::Mutex;
use pipeline::{EpisodicMemory, Importance, MemoryEntry, SessionId};

struct Stored {
    entry: MemoryEntry,
    seq: u64,
}

#[derive(Default)]
struct Store {
    sessions: HashMap<SessionId, VecDeque<Stored>>,
    next_seq: u64,
}

/// Process-local [`EpisodicMemory`] with bounded retention.
pub struct InMemoryEpisodicMemory {
    store: Mutex<Store>,
    per_session: usize,
    max_sessions: usize,
}

impl InMemoryEpisodicMemory {
    /// Entries kept per session by [`new`](Self::new).
    pub const DEFAULT_PER_SESSION: usize = 200;
    /// Sessions kept before the least recently written one is dropped.
    pub const DEFAULT_MAX_SESSIONS: usize = 1_000;

    /// A store with the default limits.
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_PER_SESSION)
    }

    /// Keeps at most `per_session` entries for each session, dropping the
    /// oldest first.
    pub fn with_capacity(per_session: usize) -> Self {
        Self::with_limits(per_session, Self::DEFAULT_MAX_SESSIONS)
    }

    /// Like [`with_capacity`](Self::with_capacity), also keeping at most
    /// `max_sessions` sessions. The session written to least recently is
    /// dropped when a new one would exceed the limit.
    pub fn with_limits(per_session: usize, max_sessions: usize) -> Self {
        Self {
            store: Mutex::new(Store::default()),
            per_session: per_session.max(1),
            max_sessions: max_sessions.max(1),
        }
    }

    /// Number of sessions with remembered entries.
    pub fn sessions(&self) -> usize {
        self.store.lock().sessions.len()
    }

    /// Entries currently remembered for `session_id`.
    pub fn len(&self, session_id: &SessionId) -> usize {
        self.store
            .lock()
            .sessions
            .get(session_id)
            .map_or(0, VecDeque::len)
    }

    /// Whether nothing is remembered for `session_id`.
    pub fn is_empty(&self, session_id: &SessionId) -> bool {
        self.len(session_id) == 0
    }

    fn recall(&self, session_id: &SessionId, step: &str, max_entries: usize) -> Option<String> {
        if max_entries == 0 {
            return None;
        }
        let store = self.store.lock();

        let mut own: Vec<&Stored> = store
            .sessions
            .get(session_id)
            .into_iter()
            .flatten()
            .filter(|s| s.entry.step == step || is_hint(&s.entry))
            .collect();
        rank(&mut own);
        own.truncate(max_entries);

        let mut hints: Vec<&Stored> = store
            .sessions
            .iter()
            .filter(|(id, _)| *id != session_id)
            .flat_map(|(_, entries)| entries.iter())
            .filter(|s| s.entry.step == step && is_hint(&s.entry))
            .collect();
        rank(&mut hints);
        hints.truncate(max_entries);

        if own.is_empty() && hints.is_empty() {
            return None;
        }
        let mut out = String::new();
        if !own.is_empty() {
            out.push_str("Earlier in this session:\n");
            own.iter().for_each(|s| render(&mut out, &s.entry));
        }
        if !hints.is_empty() {
            out.push_str("Lessons from other sessions:\n");
            hints.iter().for_each(|s| render(&mut out, &s.entry));
        }
        Some(out)
    }
}

impl Default for InMemoryEpisodicMemory {
    fn default() -> Self {
        Self::new()
    }
}

fn is_hint(entry: &MemoryEntry) -> bool {
    entry.importance.as_f64() >= Importance::HINT_THRESHOLD
}

/// Most important first; most recent first among equals.
fn rank(entries: &mut [&Stored]) {
    entries.sort_by(|a, b| {
        b.entry
            .importance
            .as_f64()
            .total_cmp(&a.entry.importance.as_f64())
            .then(b.seq.cmp(&a.seq))
    });
}

/// Removes the session whose newest entry is the oldest.
fn evict_stalest(sessions: &mut HashMap<SessionId, VecDeque<Stored>>) {
    let stalest = sessions
        .iter()
        .min_by_key(|(_, entries)| entries.back().map_or(0, |s| s.seq))
        .map(|(id, _)| id.clone());
    if let Some(session_id) = stalest {
        sessions.remove(&session_id);
        tracing::debug!(session_id = %session_id, "Evicted episodic memory for session");
    }
}

fn render(out: &mut String, entry: &MemoryEntry) {
    let _ = writeln!(out, "- [{}/{}] {}", entry.step, entry.action, entry.data);
}

#[async_trait]
impl EpisodicMemory for InMemoryEpisodicMemory {
    async fn get_context(
        &self,
        session_id: &SessionId,
        step: &str,
        max_entries: usize,
    ) -> Option<String> {
        self.recall(session_id, step, max_entries)
    }

    fn add_entry(&self, entry: MemoryEntry) {
        let mut store = self.store.lock();
        let seq = store.next_seq;
        store.next_seq += 1;
        if !store.sessions.contains_key(&entry.session_id)
            && store.sessions.len() >= self.max_sessions
        {
            evict_stalest(&mut store.sessions);
        }
        let entries = store
            .sessions
            .entry(entry.session_id.clone())
            .or_default();
        entries.push_back(Stored { entry, seq });
        while entries.len() > self.per_session {
            entries.pop_front();
        }
    }
}
