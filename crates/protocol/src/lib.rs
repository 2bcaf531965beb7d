//! # termbridge Protocol Library
//!
//! Wire-level definitions for the terminal bridge.
//!
//! ## Overview
//!
//! A client talks to the bridge over a single WebSocket. Outbound frames
//! carry raw process output with no envelope. Inbound frames carry either
//! keystrokes or a control message, and this crate decides which:
//!
//! - **Messages**: the [`ControlMessage`] model (currently only resize)
//! - **Framing**: legacy JSON-first detection and the tagged envelope
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ControlMessage, Framing, InboundFrame};
//!
//! let frame = Framing::Legacy.decode(br#"{"type":"resize","cols":120,"rows":50}"#).unwrap();
//! assert_eq!(frame, InboundFrame::Control(ControlMessage::resize(120, 50)));
//!
//! let frame = Framing::Legacy.decode(b"ls\n").unwrap();
//! assert_eq!(frame, InboundFrame::Data(b"ls\n"));
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Control message definitions
//! - [`framing`]: Inbound frame decoding and tagged encoding
//! - [`error`]: Error types

pub mod error;
pub mod framing;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use framing::{
    decode_legacy, decode_tagged, encode_control, encode_data, Framing, InboundFrame,
    FRAME_KIND_CONTROL, FRAME_KIND_DATA,
};
pub use messages::{ControlMessage, TerminalSize};
