//! Session lifecycle states and close reasons.

use std::fmt;

/// Lifecycle of a session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Connection accepted, process not yet spawned.
    Starting,
    /// Process spawned and both relay directions wired.
    Active,
    /// One side signalled termination; cleanup in progress.
    Closing,
    /// Process and connection both released.
    Closed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// `Starting -> Closing` covers a failed spawn.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Starting, Active) | (Starting, Closing) | (Active, Closing) | (Closing, Closed)
        )
    }

    /// Whether the session has finished.
    pub fn is_terminal(self) -> bool {
        self == SessionState::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a session left the `Active` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The shell exited on its own.
    ProcessExited {
        /// Exit code.
        code: u32,
        /// Signal name if killed by one.
        signal: Option<String>,
    },
    /// Waiting on the shell failed.
    ProcessWaitFailed(String),
    /// Reading shell output failed.
    ProcessReadFailed(String),
    /// Writing client input to the shell failed.
    ProcessWriteFailed(String),
    /// The client closed the connection.
    SocketClosed,
    /// The connection reported an error.
    SocketError(String),
    /// Sending shell output to the client failed.
    SocketWriteFailed(String),
    /// The shell could not be started.
    SpawnFailed(String),
    /// The listener is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Whether the process side initiated the close.
    ///
    /// When it did, the socket is the side to force-close; otherwise the
    /// process is terminated.
    pub fn initiated_by_process(&self) -> bool {
        matches!(
            self,
            CloseReason::ProcessExited { .. } | CloseReason::ProcessWaitFailed(_)
        )
    }

    /// Whether this is an ordinary end of session rather than a fault.
    pub fn is_normal(&self) -> bool {
        match self {
            CloseReason::ProcessExited { code, signal } => *code == 0 && signal.is_none(),
            CloseReason::SocketClosed | CloseReason::Shutdown => true,
            _ => false,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ProcessExited { code, signal: Some(signal) } => {
                write!(f, "process exited with code {code} (signal {signal})")
            }
            CloseReason::ProcessExited { code, signal: None } => {
                write!(f, "process exited with code {code}")
            }
            CloseReason::ProcessWaitFailed(e) => write!(f, "waiting on process failed: {e}"),
            CloseReason::ProcessReadFailed(e) => write!(f, "reading process output failed: {e}"),
            CloseReason::ProcessWriteFailed(e) => write!(f, "writing process input failed: {e}"),
            CloseReason::SocketClosed => f.write_str("socket closed"),
            CloseReason::SocketError(e) => write!(f, "socket error: {e}"),
            CloseReason::SocketWriteFailed(e) => write!(f, "writing to socket failed: {e}"),
            CloseReason::SpawnFailed(e) => write!(f, "spawn failed: {e}"),
            CloseReason::Shutdown => f.write_str("shutdown"),
        }
    }
}
