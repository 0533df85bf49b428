//! # answer-receiver
//!
//! A long-lived TCP receiver for the `ANSWER` line-framed protocol. It
//! accepts one client at a time, decodes its byte stream into discrete
//! frames, parses each payload into a domain message and hands the messages
//! to any number of consumers through a blocking FIFO queue.
//!
//! Client disconnects, malformed frames and socket failures never stop the
//! receiver: the connection is discarded, the listener rebuilt and serving
//! resumes until [`Receiver::stop`] is called.
//!
//! ## Quick Start
//!
//! ```rust
//! use answer_receiver::FrameDecoder;
//!
//! let mut decoder = FrameDecoder::new();
//! let mut payloads = Vec::new();
//! for &byte in b"ANSWER 2\nhi\n\nANSWER 3\nfoo\n" {
//!     if let Some(payload) = decoder.feed(byte)? {
//!         payloads.push(payload);
//!     }
//! }
//! assert_eq!(payloads, vec![&b"hi"[..], &b"foo"[..]]);
//! # Ok::<(), answer_receiver::ProtocolViolation>(())
//! ```
//!
//! ## Wire Format
//!
//! ```text
//! Frame     := "ANSWER " Length "\n" Payload Linebreak
//! Length    := decimal digits, value N >= 0
//! Payload   := exactly N bytes
//! Linebreak := "\n"
//! ```
//!
//! Two frames may be separated by one extra bare `\n`, which is ignored.
//! Frames with an empty (or whitespace-only) payload, and payloads the
//! [`MessageParser`] rejects, are logged and dropped without affecting the
//! connection.
//!
//! ## Receiving
//!
//! ```rust,no_run
//! use answer_receiver::{JsonParser, Receiver, ReceiverConfig};
//!
//! # async fn run() -> Result<(), answer_receiver::ReceiverError> {
//! let mut receiver = Receiver::new(ReceiverConfig::from_env()?, JsonParser::<serde_json::Value>::new());
//! receiver.start()?;
//! let message = receiver.pop().await?;
//! println!("{}", message);
//! receiver.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod frame;
pub mod message;
pub mod queue;
pub mod receiver;
pub mod tcp;
pub mod types;

pub use codec::AnswerCodec;
pub use config::ReceiverConfig;
pub use frame::{encode_frame, DecoderState, FrameDecoder};
pub use message::{JsonParser, MessageParser, MessageProducer};
pub use queue::MessageQueue;
pub use receiver::Receiver;
pub use types::{ProtocolViolation, ReceiverError, ANSWER_PREFIX, LINE_BREAK};
