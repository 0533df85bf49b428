//! Public entry point: start/stop the receiver and pop decoded messages.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::ReceiverConfig;
use crate::message::{MessageParser, MessageProducer};
use crate::queue::MessageQueue;
use crate::tcp::ConnectionManager;
use crate::types::ReceiverError;

/// Receives `ANSWER` frames on a TCP port and queues the parsed messages.
///
/// The receiver owns one [`MessageQueue`] for its whole lifetime; messages
/// from successive connections are appended to it in arrival order. Dropping
/// the receiver stops its worker.
pub struct Receiver<P: MessageParser> {
    config: ReceiverConfig,
    parser: Option<P>,
    queue: Arc<MessageQueue<P::Message>>,
    shutdown: watch::Sender<bool>,
    listening: watch::Receiver<Option<SocketAddr>>,
    listening_tx: Option<watch::Sender<Option<SocketAddr>>>,
    worker: Option<JoinHandle<()>>,
}

impl<P: MessageParser> Receiver<P> {
    pub fn new(config: ReceiverConfig, parser: P) -> Self {
        Self::with_queue(config, parser, Arc::new(MessageQueue::new()))
    }

    /// Create a receiver that delivers into an existing queue.
    pub fn with_queue(
        config: ReceiverConfig,
        parser: P,
        queue: Arc<MessageQueue<P::Message>>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (listening_tx, listening) = watch::channel(None);
        Self {
            config,
            parser: Some(parser),
            queue,
            shutdown,
            listening,
            listening_tx: Some(listening_tx),
            worker: None,
        }
    }

    /// Spawn the background worker on the current tokio runtime.
    ///
    /// The worker is detached: nothing waits for it unless
    /// [`shutdown`](Self::shutdown) is awaited. A receiver can only be
    /// started once.
    pub fn start(&mut self) -> Result<(), ReceiverError> {
        let handle = Handle::try_current()?;
        let (parser, listening_tx) = match (self.parser.take(), self.listening_tx.take()) {
            (Some(parser), Some(listening_tx)) => (parser, listening_tx),
            _ => return Err(ReceiverError::AlreadyStarted),
        };

        let manager = ConnectionManager::new(
            self.config.clone(),
            MessageProducer::new(parser, Arc::clone(&self.queue)),
            self.shutdown.subscribe(),
            listening_tx,
        );
        self.worker = Some(handle.spawn(manager.run()));
        info!("started receiver worker");
        Ok(())
    }

    /// Ask the worker to stop. In-flight accepts and reads are abandoned and
    /// both sockets closed. No more messages are queued afterwards.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        match &self.worker {
            Some(worker) => debug!(running = !worker.is_finished(), "receiver worker exists"),
            None => debug!("receiver worker not created"),
        }
    }

    /// [`stop`](Self::stop), then wait for the worker to exit.
    pub async fn shutdown(&mut self) {
        self.stop();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                error!("receiver worker failed: {}", e);
            }
        }
    }

    /// Wait for the next message.
    pub async fn pop(&self) -> Result<P::Message, ReceiverError> {
        self.queue.pop().await
    }

    /// Wait for the next message from a thread outside the async runtime.
    pub fn blocking_pop(&self) -> Result<P::Message, ReceiverError> {
        self.queue.blocking_pop()
    }

    pub fn queue(&self) -> &Arc<MessageQueue<P::Message>> {
        &self.queue
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Address the listener is currently bound to, if it is listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.listening.borrow()
    }

    /// Wait until the listener is bound and return its address.
    pub async fn wait_listening(&self) -> Result<SocketAddr, ReceiverError> {
        if self.worker.is_none() {
            return Err(ReceiverError::NotRunning);
        }
        let mut listening = self.listening.clone();
        let addr = *listening
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ReceiverError::NotRunning)?;
        addr.ok_or(ReceiverError::NotRunning)
    }
}

impl<P: MessageParser> Drop for Receiver<P> {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}
