//! Registry of live sessions.
//!
//! Sessions own their process and connection outright. The registry only
//! holds a metadata snapshot of each one so the listener can enumerate what
//! is running; it never keeps a session alive.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use protocol::TerminalSize;

use super::state::SessionState;

/// Unique identifier for a session.
pub type SessionId = String;

/// Snapshot of one session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Unique session identifier.
    pub id: SessionId,
    /// Remote address of the client, when known.
    pub peer: Option<SocketAddr>,
    /// Process ID of the shell.
    pub pid: Option<u32>,
    /// Program that was spawned.
    pub shell: String,
    /// Working directory of the shell.
    pub cwd: Option<PathBuf>,
    /// Current terminal geometry.
    pub size: TerminalSize,
    /// Current lifecycle state.
    pub state: SessionState,
    /// When the connection was accepted.
    pub started_at: Instant,
}

impl SessionInfo {
    /// How long the session has existed.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Thread-safe registry keyed by session ID.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionInfo>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session and returns the handle that keeps it listed.
    ///
    /// The entry disappears when the returned [`SessionEntry`] is dropped.
    pub fn register(self: &Arc<Self>, info: SessionInfo) -> SessionEntry {
        let id = info.id.clone();
        self.sessions.insert(id.clone(), info);

        tracing::trace!(session_id = %id, live = self.sessions.len(), "Registered session");

        SessionEntry {
            registry: Arc::clone(self),
            id,
        }
    }

    /// Lists all live sessions.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Gets a snapshot of one session.
    pub fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    /// Checks if a session is listed.
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Returns the number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    fn update(&self, session_id: &str, f: impl FnOnce(&mut SessionInfo)) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            f(entry.value_mut());
        }
    }

    fn remove(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            tracing::trace!(session_id = %session_id, live = self.sessions.len(), "Unregistered session");
        }
    }
}

/// A session's listing in the registry.
#[derive(Debug)]
pub struct SessionEntry {
    registry: Arc<SessionRegistry>,
    id: SessionId,
}

impl SessionEntry {
    /// The session ID this entry tracks.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Records a state change.
    pub fn set_state(&self, state: SessionState) {
        self.registry.update(&self.id, |info| info.state = state);
    }

    /// Records the spawned process.
    pub fn set_process(&self, pid: Option<u32>, shell: &str) {
        self.registry.update(&self.id, |info| {
            info.pid = pid;
            info.shell = shell.to_string();
        });
    }

    /// Records a new geometry.
    pub fn set_size(&self, size: TerminalSize) {
        self.registry.update(&self.id, |info| info.size = size);
    }
}

impl Drop for SessionEntry {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}
