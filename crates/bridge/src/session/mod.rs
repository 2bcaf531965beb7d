//! Session management module.
//!
//! A session pairs one client connection with one shell on a PTY. The two
//! resources share a lifecycle: neither outlives the other.

pub mod pty;
pub mod registry;
pub mod relay;
pub mod state;

pub use pty::{ProcessExit, PtyIo, PtyProcess, SessionError, SpawnOptions};
pub use registry::{SessionEntry, SessionId, SessionInfo, SessionRegistry};
pub use relay::Session;
pub use state::{CloseReason, SessionState};
