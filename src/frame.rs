//! Byte-at-a-time decoder for `ANSWER` frames.
//!
//! A frame on the wire is
//!
//! ```text
//! ANSWER <N>\n<N payload bytes>\n
//! ```
//!
//! optionally followed by one bare `\n` before the next frame. The decoder
//! holds no I/O: callers push bytes in with [`FrameDecoder::feed`] and receive
//! each completed payload exactly once.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::types::{ProtocolViolation, ANSWER_PREFIX, DEFAULT_MAX_PAYLOAD_LEN, LINE_BREAK};

/// Most payload capacity reserved up front when a header arrives; larger
/// payloads grow the buffer as their bytes are read.
const PAYLOAD_RESERVE_LIMIT: usize = 64 * 1024;

/// Where the decoder is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Collecting `ANSWER <N>\n`.
    AwaitingHeader,
    /// Collecting payload bytes; `remaining` is always at least one.
    ReadingBody { remaining: usize },
    /// Payload complete, the next byte must be the trailing line break.
    EndMarker,
}

/// Incremental frame decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecoderState,
    header: BytesMut,
    payload: BytesMut,
    declared: usize,
    max_payload_len: usize,
    after_frame: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_LEN)
    }

    /// Create a decoder that rejects frames declaring more than `max_payload_len` bytes.
    pub fn with_max_payload(max_payload_len: usize) -> Self {
        Self {
            state: DecoderState::AwaitingHeader,
            header: BytesMut::with_capacity(32),
            payload: BytesMut::new(),
            declared: 0,
            max_payload_len,
            after_frame: false,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// True when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.state == DecoderState::AwaitingHeader && self.header.is_empty()
    }

    /// Drop any partial frame and return to the initial state.
    pub fn reset(&mut self) {
        self.state = DecoderState::AwaitingHeader;
        self.header.clear();
        self.payload.clear();
        self.declared = 0;
        self.after_frame = false;
    }

    /// Consume one byte.
    ///
    /// Returns `Ok(Some(payload))` when the byte completes a frame with a
    /// non-empty payload. A violation resets the decoder before it is returned.
    pub fn feed(&mut self, byte: u8) -> Result<Option<Bytes>, ProtocolViolation> {
        let result = self.step(byte);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn step(&mut self, byte: u8) -> Result<Option<Bytes>, ProtocolViolation> {
        match self.state {
            DecoderState::AwaitingHeader => {
                self.read_header(byte)?;
                Ok(None)
            }
            DecoderState::ReadingBody { remaining } => {
                self.payload.put_u8(byte);
                self.state = if remaining == 1 {
                    DecoderState::EndMarker
                } else {
                    DecoderState::ReadingBody {
                        remaining: remaining - 1,
                    }
                };
                Ok(None)
            }
            DecoderState::EndMarker => {
                if byte != LINE_BREAK {
                    return Err(ProtocolViolation::MissingEndMarker(byte));
                }
                self.state = DecoderState::AwaitingHeader;
                self.after_frame = true;
                if self.payload.is_empty() {
                    trace!("skipping empty frame");
                    return Ok(None);
                }
                Ok(Some(self.payload.split().freeze()))
            }
        }
    }

    fn read_header(&mut self, byte: u8) -> Result<(), ProtocolViolation> {
        let position = self.header.len();

        if position == 0 && byte == LINE_BREAK && self.after_frame {
            trace!("skipping blank line between frames");
            self.after_frame = false;
            return Ok(());
        }
        self.after_frame = false;

        if position < ANSWER_PREFIX.len() {
            if byte != ANSWER_PREFIX[position] {
                return Err(ProtocolViolation::HeaderMismatch { position, byte });
            }
            self.header.put_u8(byte);
            return Ok(());
        }

        if byte == LINE_BREAK {
            if position == ANSWER_PREFIX.len() {
                return Err(ProtocolViolation::InvalidLength(String::new()));
            }
            let declared = self.declared;
            trace!(declared, "header complete");
            self.header.clear();
            self.declared = 0;
            self.state = if declared == 0 {
                DecoderState::EndMarker
            } else {
                self.payload.reserve(declared.min(PAYLOAD_RESERVE_LIMIT));
                DecoderState::ReadingBody {
                    remaining: declared,
                }
            };
            return Ok(());
        }

        if !byte.is_ascii_digit() {
            let mut field = String::from_utf8_lossy(&self.header[ANSWER_PREFIX.len()..]).into_owned();
            field.push(char::from(byte));
            return Err(ProtocolViolation::InvalidLength(field));
        }

        let digit = usize::from(byte - b'0');
        self.declared = self
            .declared
            .checked_mul(10)
            .and_then(|v| v.checked_add(digit))
            .filter(|v| *v <= self.max_payload_len)
            .ok_or(ProtocolViolation::PayloadTooLarge {
                declared: self.declared.saturating_mul(10).saturating_add(digit),
                max: self.max_payload_len,
            })?;
        self.header.put_u8(byte);
        Ok(())
    }
}

/// Append the wire form of `payload` to `dst`.
pub fn encode_frame_into(payload: &[u8], dst: &mut BytesMut) {
    let header = format!("ANSWER {}\n", payload.len());
    dst.reserve(header.len() + payload.len() + 1);
    dst.put_slice(header.as_bytes());
    dst.put_slice(payload);
    dst.put_u8(LINE_BREAK);
}

/// Encode `payload` as a single frame.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut dst = BytesMut::new();
    encode_frame_into(payload, &mut dst);
    dst.freeze()
}
