//! Frame data model shared by both relay roles.
//!
//! A [`Frame`] is one discrete unit of payload exchanged with a peer: either
//! an opaque chunk of bytes or one line of text. The mode is a session-wide
//! property agreed out of band through the `--binary` flag; frames produced
//! locally always carry the session's mode, frames received from a peer carry
//! whatever the peer sent.

use std::time::Duration;

/// Chunk size for binary reads from the local input stream, and the capacity
/// (in frames) of every per-connection outbound queue.
pub const FRAME_BUFFER: usize = 4096;

/// How long a closing connection waits for the peer's close acknowledgment
/// before hard-closing the transport anyway.
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Session-wide framing of the local console stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameMode {
    /// Fixed-capacity chunks read straight off the input stream.
    Binary,
    /// One frame per input line, valid UTF-8.
    Text,
}

/// One unit of payload data. Immutable once created; ownership moves from the
/// producer into an outbound queue and from there to the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
}

impl Frame {
    pub fn mode(&self) -> FrameMode {
        match self {
            Frame::Binary(_) => FrameMode::Binary,
            Frame::Text(_) => FrameMode::Text,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Frame::Binary(bytes) => bytes,
            Frame::Text(line) => line.as_bytes(),
        }
    }
}

impl From<Frame> for axum::extract::ws::Message {
    fn from(frame: Frame) -> Self {
        use axum::extract::ws::Message;
        match frame {
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
            Frame::Text(line) => Message::Text(line.into()),
        }
    }
}

impl From<Frame> for tokio_tungstenite::tungstenite::Message {
    fn from(frame: Frame) -> Self {
        use tokio_tungstenite::tungstenite::Message;
        match frame {
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
            Frame::Text(line) => Message::Text(line.into()),
        }
    }
}
