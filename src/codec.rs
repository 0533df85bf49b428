use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::frame::{encode_frame_into, FrameDecoder};
use crate::types::{ReceiverError, DEFAULT_MAX_PAYLOAD_LEN};

/// `tokio_util` codec for `ANSWER` frames.
///
/// Decoding drains the read buffer into a [`FrameDecoder`] one byte at a
/// time, so framing behaves identically however the stream is chunked.
#[derive(Debug)]
pub struct AnswerCodec {
    frames: FrameDecoder,
}

impl AnswerCodec {
    pub fn new(max_payload_len: usize) -> Self {
        Self {
            frames: FrameDecoder::with_max_payload(max_payload_len),
        }
    }

    /// True when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.frames.is_idle()
    }
}

impl Default for AnswerCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_LEN)
    }
}

impl Decoder for AnswerCodec {
    type Item = Bytes;
    type Error = ReceiverError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ReceiverError> {
        while src.has_remaining() {
            let byte = src.get_u8();
            if let Some(payload) = self.frames.feed(byte)? {
                return Ok(Some(payload));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ReceiverError> {
        if let Some(payload) = self.decode(src)? {
            return Ok(Some(payload));
        }
        if !self.frames.is_idle() {
            debug!(state = ?self.frames.state(), "stream ended inside a frame, discarding it");
            self.frames.reset();
        }
        Ok(None)
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for AnswerCodec {
    type Error = ReceiverError;

    fn encode(&mut self, payload: T, dst: &mut BytesMut) -> Result<(), ReceiverError> {
        encode_frame_into(payload.as_ref(), dst);
        Ok(())
    }
}
