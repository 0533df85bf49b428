//! Protocol constants and error types shared across the crate.

use thiserror::Error;

/// Literal that opens every frame header.
pub const ANSWER_PREFIX: &[u8] = b"ANSWER ";

/// Byte terminating a header, a payload, and the optional blank line.
pub const LINE_BREAK: u8 = b'\n';

/// Default upper bound on a declared payload length (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// A byte sequence that cannot be part of a well-formed frame.
///
/// Any violation is fatal for the connection it was read from: the
/// connection is discarded and the listener rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("header does not start with \"ANSWER \" (byte 0x{byte:02x} at position {position})")]
    HeaderMismatch { position: usize, byte: u8 },

    #[error("invalid payload length field: {0:?}")]
    InvalidLength(String),

    #[error("declared payload length {declared} exceeds maximum {max}")]
    PayloadTooLarge { declared: usize, max: usize },

    #[error("frame does not end with a line break (got 0x{0:02x})")]
    MissingEndMarker(u8),
}

/// Errors produced by the receiver.
#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message rejected: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("receiver already started")]
    AlreadyStarted,

    #[error("receiver is not running")]
    NotRunning,

    #[error("no async runtime available: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),

    #[error("message queue closed")]
    QueueClosed,
}

impl ReceiverError {
    /// Whether this error ends the current connection rather than a single message.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, ReceiverError::Protocol(_))
    }
}
