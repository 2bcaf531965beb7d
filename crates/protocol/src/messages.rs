//! Control message definitions.
//!
//! Control messages travel on the same inbound channel as keystrokes. They
//! are JSON objects discriminated by a `type` field:
//!
//! ```json
//! {"type":"resize","cols":120,"rows":50}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of columns.
    pub cols: u16,
    /// Number of rows.
    pub rows: u16,
}

impl TerminalSize {
    /// Create a new terminal size.
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Whether both dimensions are non-zero.
    pub fn is_valid(&self) -> bool {
        self.cols > 0 && self.rows > 0
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl std::fmt::Display for TerminalSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// A directive sent by the client instead of literal input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Resize the pseudo-terminal.
    Resize {
        /// New width in columns.
        cols: u16,
        /// New height in rows.
        rows: u16,
    },
}

impl ControlMessage {
    /// Build a resize directive.
    pub fn resize(cols: u16, rows: u16) -> Self {
        ControlMessage::Resize { cols, rows }
    }

    /// Parse and validate a control message from JSON bytes.
    ///
    /// Fails if the payload is not JSON, does not have a known `type`, has
    /// non-integer or out-of-range dimensions, or has a zero dimension.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let message: ControlMessage = serde_json::from_slice(bytes)?;
        message.validate()?;
        Ok(message)
    }

    /// Serialize the control message to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::InvalidControl(e.to_string()))
    }

    /// Returns the requested size if this is a resize directive.
    pub fn terminal_size(&self) -> Option<TerminalSize> {
        match *self {
            ControlMessage::Resize { cols, rows } => Some(TerminalSize::new(cols, rows)),
        }
    }

    fn validate(&self) -> Result<()> {
        match *self {
            ControlMessage::Resize { cols, rows } if cols == 0 || rows == 0 => Err(
                ProtocolError::InvalidControl(format!("resize to {cols}x{rows} has a zero dimension")),
            ),
            ControlMessage::Resize { .. } => Ok(()),
        }
    }
}
