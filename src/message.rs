//! Turning completed frame payloads into queued domain messages.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::queue::MessageQueue;
use crate::types::ReceiverError;

/// Maps the text of a payload to a domain message.
pub trait MessageParser: Send + Sync + 'static {
    type Message: Send + 'static;

    fn parse(&self, text: &str) -> Result<Self::Message, ReceiverError>;
}

impl<P: MessageParser> MessageParser for Arc<P> {
    type Message = P::Message;

    fn parse(&self, text: &str) -> Result<Self::Message, ReceiverError> {
        (**self).parse(text)
    }
}

/// Parses payloads as JSON documents deserialized into `M`.
pub struct JsonParser<M> {
    _marker: PhantomData<fn() -> M>,
}

impl<M> JsonParser<M> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<M> Default for JsonParser<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for JsonParser<M> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for JsonParser<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonParser<{}>", std::any::type_name::<M>())
    }
}

impl<M> MessageParser for JsonParser<M>
where
    M: DeserializeOwned + Send + 'static,
{
    type Message = M;

    fn parse(&self, text: &str) -> Result<M, ReceiverError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Final stage of the pipeline: payload bytes in, queued message out.
pub struct MessageProducer<P: MessageParser> {
    parser: P,
    queue: Arc<MessageQueue<P::Message>>,
}

impl<P: MessageParser> MessageProducer<P> {
    pub fn new(parser: P, queue: Arc<MessageQueue<P::Message>>) -> Self {
        Self { parser, queue }
    }

    /// Decode, validate, parse and enqueue one payload.
    ///
    /// Failures only affect this payload: they are logged and the message is
    /// dropped. Returns whether a message was enqueued.
    pub fn produce(&self, payload: &[u8]) -> bool {
        let text = match std::str::from_utf8(payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(len = payload.len(), "dropping payload that is not valid UTF-8: {}", e);
                return false;
            }
        };

        if text.trim().is_empty() {
            warn!("dropping payload that is empty after trimming");
            return false;
        }

        debug!("received message: {:?}", text);
        let message = match self.parser.parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("received message could not be parsed: {}; message: {:?}", e, text);
                return false;
            }
        };

        match self.queue.push(message) {
            Ok(()) => true,
            Err(e) => {
                warn!("dropping parsed message: {}", e);
                false
            }
        }
    }
}
