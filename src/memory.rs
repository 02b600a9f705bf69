//! Per-session conversation memory.
//!
//! [`SessionStore`] maps a session id to its ordered list of
//! [`ConversationTurn`]s. Histories are created on first use and bounded by
//! a sliding window: once a session holds more than `window` turns, the
//! oldest are evicted the next time the history is read, so readers only
//! ever see the most recent `window` turns in their original order.
//!
//! Updates to one session are serialized by the map's per-key locking;
//! different sessions never contend on a single lock.
//!
//! With the `file` backend each session is mirrored to
//! `{dir}/{session}.json` after every write and loaded lazily on first
//! access, so histories survive restarts.

use dashmap::DashMap;
use std::path::{Path, PathBuf};

use crate::config::{MemoryBackend, MemoryConfig};
use crate::error::RagError;
use crate::models::ConversationTurn;

pub struct SessionStore {
    sessions: DashMap<String, Vec<ConversationTurn>>,
    window: usize,
    persist_dir: Option<PathBuf>,
}

impl SessionStore {
    /// A process-lifetime store.
    pub fn in_memory(window: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            window: window.max(1),
            persist_dir: None,
        }
    }

    /// A store that mirrors every session to a JSON file under `dir`.
    pub fn persistent(window: usize, dir: &Path) -> Result<Self, RagError> {
        std::fs::create_dir_all(dir).map_err(|e| {
            RagError::Configuration(format!(
                "cannot create session directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self {
            sessions: DashMap::new(),
            window: window.max(1),
            persist_dir: Some(dir.to_path_buf()),
        })
    }

    pub fn from_config(config: &MemoryConfig) -> Result<Self, RagError> {
        match config.backend {
            MemoryBackend::Memory => Ok(Self::in_memory(config.window)),
            MemoryBackend::File => Self::persistent(config.window, &config.dir),
        }
    }

    /// The most recent `window` turns of `session_id`, oldest first.
    ///
    /// Unknown sessions yield an empty history.
    pub fn history(&self, session_id: &str) -> Vec<ConversationTurn> {
        self.ensure_loaded(session_id);
        match self.sessions.get_mut(session_id) {
            Some(mut turns) => {
                evict_oldest(&mut turns, self.window);
                turns.clone()
            }
            None => Vec::new(),
        }
    }

    /// Append one turn to `session_id`, creating the session if needed.
    pub fn append(&self, session_id: &str, turn: ConversationTurn) {
        self.append_all(session_id, [turn]);
    }

    /// Append a user question and the assistant's answer as one update.
    pub fn append_exchange(&self, session_id: &str, question: &str, answer: &str) {
        self.append_all(
            session_id,
            [
                ConversationTurn::user(question),
                ConversationTurn::assistant(answer),
            ],
        );
    }

    fn append_all(&self, session_id: &str, turns: impl IntoIterator<Item = ConversationTurn>) {
        self.ensure_loaded(session_id);
        let mut history = self.sessions.entry(session_id.to_string()).or_default();
        history.extend(turns);
        self.persist(session_id, &history);
    }

    /// Forget `session_id`. Returns `false` if it had no history.
    pub fn clear(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        let removed_file = match self.session_path(session_id) {
            Some(path) if path.exists() => match std::fs::remove_file(&path) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(session = session_id, error = %e, "failed to remove session file");
                    false
                }
            },
            _ => false,
        };
        removed || removed_file
    }

    /// Ids of sessions currently held in memory.
    pub fn sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    fn session_path(&self, session_id: &str) -> Option<PathBuf> {
        self.persist_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", file_stem(session_id))))
    }

    fn ensure_loaded(&self, session_id: &str) {
        if self.sessions.contains_key(session_id) {
            return;
        }
        let Some(path) = self.session_path(session_id) else {
            return;
        };
        let Ok(raw) = std::fs::read_to_string(&path) else {
            return;
        };
        match serde_json::from_str::<Vec<ConversationTurn>>(&raw) {
            Ok(mut turns) => {
                evict_oldest(&mut turns, self.window);
                self.sessions.entry(session_id.to_string()).or_insert(turns);
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "ignoring unreadable session file");
            }
        }
    }

    fn persist(&self, session_id: &str, turns: &[ConversationTurn]) {
        let Some(path) = self.session_path(session_id) else {
            return;
        };
        let start = turns.len().saturating_sub(self.window);
        let result = serde_json::to_string_pretty(&turns[start..])
            .map_err(|e| e.to_string())
            .and_then(|json| std::fs::write(&path, json).map_err(|e| e.to_string()));
        if let Err(e) = result {
            tracing::warn!(file = %path.display(), error = %e, "failed to persist session");
        }
    }
}

fn evict_oldest(turns: &mut Vec<ConversationTurn>, window: usize) {
    if turns.len() > window {
        let excess = turns.len() - window;
        turns.drain(..excess);
    }
}

/// Session ids become file names: safe ids are used verbatim, anything else is hex-encoded.
fn file_stem(session_id: &str) -> String {
    let safe = !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if safe {
        session_id.to_string()
    } else {
        format!("x-{}", hex::encode(session_id.as_bytes()))
    }
}
