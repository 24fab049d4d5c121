//! Lazy registry of conversation logs.
//!
//! Each (conversation, session) pair maps to one shared [`ConversationLog`]
//! behind its own mutex, so appends and edits for one conversation are
//! serialized while distinct conversations proceed independently. The
//! registry map itself is only locked long enough to find or load an entry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::{ConversationKey, ConversationLog, DEFAULT_SESSION, HistoryEntry};
use crate::error::Result;

/// A log shared between the relay loop and whoever else holds it.
pub type SharedLog = Arc<Mutex<ConversationLog>>;

type LogId = (ConversationKey, String);

/// Owns every loaded [`ConversationLog`] and the active session of each
/// conversation.
#[derive(Debug)]
pub struct HistoryStore {
    root: PathBuf,
    max_lines: usize,
    active_sessions: Mutex<HashMap<ConversationKey, String>>,
    logs: Mutex<HashMap<LogId, SharedLog>>,
}

impl HistoryStore {
    pub fn new(root: impl Into<PathBuf>, max_lines: usize) -> Self {
        Self {
            root: root.into(),
            max_lines,
            active_sessions: Mutex::new(HashMap::new()),
            logs: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// The session currently in use for `key`.
    pub fn active_session(&self, key: &ConversationKey) -> String {
        self.active_sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .unwrap_or_else(|| DEFAULT_SESSION.to_string())
    }

    /// Shared handle to the active session's log, loading it on first use.
    pub fn log(&self, key: &ConversationKey) -> Result<SharedLog> {
        let session = self.active_session(key);
        self.session_log(key, &session)
    }

    /// Shared handle to a specific session's log, loading it on first use.
    pub fn session_log(&self, key: &ConversationKey, session: &str) -> Result<SharedLog> {
        let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        let id = (key.clone(), session.to_string());
        if let Some(log) = logs.get(&id) {
            return Ok(Arc::clone(log));
        }
        let log = ConversationLog::load(&self.root, key.clone(), session, self.max_lines)?;
        let shared = Arc::new(Mutex::new(log));
        logs.insert(id, Arc::clone(&shared));
        Ok(shared)
    }

    /// Run `f` inside the critical section of the active session's log.
    pub fn with_log<R>(
        &self,
        key: &ConversationKey,
        f: impl FnOnce(&mut ConversationLog) -> Result<R>,
    ) -> Result<R> {
        let log = self.log(key)?;
        let mut guard = log.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Run `f` inside the critical section of a specific session's log.
    pub fn with_session_log<R>(
        &self,
        key: &ConversationKey,
        session: &str,
        f: impl FnOnce(&mut ConversationLog) -> Result<R>,
    ) -> Result<R> {
        let log = self.session_log(key, session)?;
        let mut guard = log.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn append(&self, key: &ConversationKey, entry: HistoryEntry) -> Result<()> {
        self.with_log(key, |log| log.append(entry))
    }

    /// Copy of the active session's messages.
    pub fn snapshot(&self, key: &ConversationKey) -> Result<Vec<HistoryEntry>> {
        self.with_log(key, |log| Ok(log.entries().to_vec()))
    }

    pub fn erase_last(&self, key: &ConversationKey, n: usize) -> Result<usize> {
        self.with_log(key, |log| Ok(log.erase_last(n)))
    }

    pub fn edit_at(&self, key: &ConversationKey, offset: usize, content: &str) -> Result<()> {
        self.with_log(key, |log| log.edit_at(offset, content))
    }

    /// Back up and remove the active session's file and drop the loaded
    /// instance. The next access starts from an empty log.
    pub fn erase_persisted(&self, key: &ConversationKey) -> Result<Option<PathBuf>> {
        let session = self.active_session(key);
        let backup = self.with_session_log(key, &session, |log| log.erase_persisted())?;
        self.logs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(key.clone(), session));
        Ok(backup)
    }

    /// Make `session` the active session for `key` and load its log.
    pub fn switch_session(&self, key: &ConversationKey, session: &str) -> Result<SharedLog> {
        let log = self.session_log(key, session)?;
        self.active_sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), session.to_string());
        info!("Switched {key} to session {session}");
        Ok(log)
    }

    /// Continue the active session's messages under `session`: later
    /// appends go to that session's file and nothing is merged from it. A
    /// loaded instance of `session` is replaced.
    pub fn rename_session(&self, key: &ConversationKey, session: &str) -> Result<()> {
        let current = self.active_session(key);
        if current == session {
            return Ok(());
        }
        let log = self.log(key)?;
        log.lock().unwrap_or_else(|e| e.into_inner()).rename(session);

        let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        logs.remove(&(key.clone(), current.clone()));
        if logs.insert((key.clone(), session.to_string()), log).is_some() {
            debug!("Replaced loaded log of {key} [{session}]");
        }
        drop(logs);

        self.active_sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), session.to_string());
        info!("Renamed {key} session {current} to {session}");
        Ok(())
    }

    /// Number of logs currently held in memory.
    pub fn loaded_count(&self) -> usize {
        self.logs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
