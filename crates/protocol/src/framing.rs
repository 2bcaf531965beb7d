//! Inbound frame decoding.
//!
//! The client sends both keystrokes and control messages on one channel.
//! Two framings are supported:
//!
//! # Legacy
//!
//! The payload is tried as a JSON control message first. If it decodes to a
//! valid control message it is consumed as one; any other payload is
//! literal input. Typing a resize object into the shell is therefore
//! indistinguishable from a real resize.
//!
//! # Tagged
//!
//! Each frame starts with one discriminator byte:
//! - `0x00`: data, the remaining bytes are literal input (may be empty)
//! - `0x01`: control, the remaining bytes are a JSON control message
//!
//! Frames that do not follow this layout are rejected instead of being
//! forwarded.
//!
//! Outbound traffic is never framed: process output is sent as-is.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::messages::ControlMessage;

/// Discriminator byte for a tagged data frame.
pub const FRAME_KIND_DATA: u8 = 0x00;

/// Discriminator byte for a tagged control frame.
pub const FRAME_KIND_CONTROL: u8 = 0x01;

/// How inbound frames are told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// JSON-first detection of control messages.
    #[default]
    Legacy,
    /// One-byte kind prefix on every frame.
    Tagged,
}

impl Framing {
    /// Decode one inbound payload according to this framing.
    ///
    /// Legacy decoding never fails.
    pub fn decode(self, payload: &[u8]) -> Result<InboundFrame<'_>> {
        match self {
            Framing::Legacy => Ok(decode_legacy(payload)),
            Framing::Tagged => decode_tagged(payload),
        }
    }
}

impl std::fmt::Display for Framing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Framing::Legacy => f.write_str("legacy"),
            Framing::Tagged => f.write_str("tagged"),
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame<'a> {
    /// A directive to apply to the terminal.
    Control(ControlMessage),
    /// Bytes to write to the process input unmodified.
    Data(&'a [u8]),
}

/// Decode a frame using JSON-first detection.
pub fn decode_legacy(payload: &[u8]) -> InboundFrame<'_> {
    match ControlMessage::from_json(payload) {
        Ok(message) => InboundFrame::Control(message),
        Err(_) => InboundFrame::Data(payload),
    }
}

/// Decode a frame carrying a kind discriminator byte.
pub fn decode_tagged(payload: &[u8]) -> Result<InboundFrame<'_>> {
    let (&kind, body) = payload.split_first().ok_or(ProtocolError::EmptyFrame)?;

    match kind {
        FRAME_KIND_DATA => Ok(InboundFrame::Data(body)),
        FRAME_KIND_CONTROL => ControlMessage::from_json(body).map(InboundFrame::Control),
        other => Err(ProtocolError::UnknownFrameKind(other)),
    }
}

/// Build a tagged data frame.
pub fn encode_data(data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(data.len() + 1);
    frame.push(FRAME_KIND_DATA);
    frame.extend_from_slice(data);
    frame
}

/// Build a tagged control frame.
pub fn encode_control(message: &ControlMessage) -> Result<Vec<u8>> {
    let json = message.to_json()?;
    let mut frame = Vec::with_capacity(json.len() + 1);
    frame.push(FRAME_KIND_CONTROL);
    frame.extend_from_slice(&json);
    Ok(frame)
}
