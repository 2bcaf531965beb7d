//! # termbridge Library
//!
//! An interactive terminal bridge: every WebSocket client gets its own shell
//! on a pseudo-terminal, and the two are relayed byte for byte until either
//! side goes away.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              BridgeServer (TCP)              │
//! │    accept ─▶ WebSocket handshake ─▶ spawn    │
//! └──────────────────────┬───────────────────────┘
//!                        │ one task per connection
//!          ┌─────────────▼──────────────┐
//!          │          Session           │
//!          │  socket ◀────▶ PtyProcess  │
//!          └────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bridge::{BridgeServer, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let server = BridgeServer::bind(&config).await?;
//!
//!     let shutdown = CancellationToken::new();
//!     server.run(shutdown).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`logging`]: Tracing subscriber setup
//! - [`server`]: Connection listener
//! - [`session`]: PTY process, session relay and registry

pub mod config;
pub mod logging;
pub mod server;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

pub use config::Config;
pub use server::{BridgeServer, ServerError};
pub use session::{
    CloseReason, PtyProcess, Session, SessionError, SessionId, SessionInfo, SessionRegistry,
    SessionState,
};
