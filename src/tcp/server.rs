use std::io;
use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio_util::codec::Decoder;
use tracing::{debug, error, info, trace};

use crate::codec::AnswerCodec;
use crate::config::ReceiverConfig;
use crate::message::{MessageParser, MessageProducer};
use crate::types::ReceiverError;

/// How a client's read loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionEnd {
    /// The peer closed its side of the stream.
    Closed,
    /// Shutdown was requested while reading.
    Shutdown,
}

/// Owns the listening and accepted sockets and keeps the receiver serving.
///
/// One client is serviced at a time. Socket failures and protocol violations
/// tear down both sockets and the listener is rebuilt after `retry_delay`,
/// forever, until shutdown is signalled.
pub struct ConnectionManager<P: MessageParser> {
    config: ReceiverConfig,
    producer: MessageProducer<P>,
    shutdown: watch::Receiver<bool>,
    listening: watch::Sender<Option<SocketAddr>>,
    listener: Option<TcpListener>,
    client: Option<TcpStream>,
}

impl<P: MessageParser> ConnectionManager<P> {
    pub fn new(
        config: ReceiverConfig,
        producer: MessageProducer<P>,
        shutdown: watch::Receiver<bool>,
        listening: watch::Sender<Option<SocketAddr>>,
    ) -> Self {
        Self {
            config,
            producer,
            shutdown,
            listening,
            listener: None,
            client: None,
        }
    }

    /// Serve until shutdown is signalled or the shutdown sender is dropped.
    pub async fn run(mut self) {
        info!("starting receiver on {}", self.config.bind_addr());

        while !self.is_shutting_down() {
            if let Err(e) = self.serve().await {
                if e.is_protocol_violation() {
                    error!("connection failed: {}; retrying", e);
                } else {
                    error!("socket failed with network error: {}; retrying", e);
                }
                self.reset_socket();
                self.wait_before_retry().await;
            }
        }

        self.reset_socket();
        info!("receiver stopped");
    }

    /// Drop the accepted client stream, if any.
    pub fn reset_client(&mut self) {
        if self.client.take().is_some() {
            debug!("client connection closed");
        }
    }

    /// Drop the client stream and then the listener, if any.
    pub fn reset_socket(&mut self) {
        self.reset_client();
        if self.listener.take().is_some() {
            debug!("listening socket closed");
            self.listening.send_replace(None);
        }
    }

    fn is_shutting_down(&self) -> bool {
        is_shutdown(&self.shutdown)
    }

    async fn bind(&self) -> Result<TcpListener, ReceiverError> {
        let bind_addr = self.config.bind_addr();
        let addr = lookup_host(bind_addr.as_str()).await?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{} did not resolve to any address", bind_addr),
            )
        })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        Ok(socket.listen(self.config.backlog)?)
    }

    /// Build a listener and accept clients one after another.
    ///
    /// Returns `Ok` only once shutdown has been requested.
    async fn serve(&mut self) -> Result<(), ReceiverError> {
        let listener = self.bind().await?;
        let local_addr = listener.local_addr()?;
        self.listener = Some(listener);
        self.listening.send_replace(Some(local_addr));
        debug!("socket set up on {}", local_addr);

        loop {
            let accepted = {
                let listener = match self.listener.as_ref() {
                    Some(listener) => listener,
                    None => return Ok(()),
                };
                tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut self.shutdown) => None,
                    accepted = listener.accept() => Some(accepted),
                }
            };

            let (stream, peer) = match accepted {
                Some(accepted) => accepted?,
                None => return Ok(()),
            };
            info!("accepted connection from {}", peer);
            self.client = Some(stream);

            match self.read_client(peer).await? {
                ConnectionEnd::Closed => continue,
                ConnectionEnd::Shutdown => return Ok(()),
            }
        }
    }

    /// Read the accepted client until it closes, misbehaves, or shutdown.
    async fn read_client(&mut self, peer: SocketAddr) -> Result<ConnectionEnd, ReceiverError> {
        let end = match self.client.as_mut() {
            Some(stream) => {
                read_frames(stream, peer, &self.config, &self.producer, &mut self.shutdown).await?
            }
            None => ConnectionEnd::Closed,
        };
        self.reset_client();
        Ok(end)
    }

    async fn wait_before_retry(&mut self) {
        let delay = self.config.retry_delay;
        tokio::select! {
            _ = shutdown_requested(&mut self.shutdown) => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Feed `stream` through the codec into `producer` until it ends.
///
/// Interrupted reads are retried in place unless shutdown was requested.
async fn read_frames<R, P>(
    stream: &mut R,
    peer: SocketAddr,
    config: &ReceiverConfig,
    producer: &MessageProducer<P>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<ConnectionEnd, ReceiverError>
where
    R: AsyncRead + Unpin,
    P: MessageParser,
{
    let mut codec = AnswerCodec::new(config.max_payload_len);
    let mut buf = BytesMut::with_capacity(config.read_buffer_size);

    loop {
        buf.reserve(config.read_buffer_size);
        let read = tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => None,
            read = stream.read_buf(&mut buf) => Some(read),
        };

        match read {
            None => {
                debug!("shutdown requested, dropping connection from {}", peer);
                return Ok(ConnectionEnd::Shutdown);
            }
            Some(Ok(0)) => {
                debug!("remote end {} closed", peer);
                while let Some(payload) = codec.decode_eof(&mut buf)? {
                    producer.produce(&payload);
                }
                return Ok(ConnectionEnd::Closed);
            }
            Some(Ok(n)) => {
                trace!(bytes = n, "read from {}", peer);
                while let Some(payload) = codec.decode(&mut buf)? {
                    debug!(len = payload.len(), "received frame from {}", peer);
                    producer.produce(&payload);
                }
            }
            Some(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {
                if is_shutdown(shutdown) {
                    return Ok(ConnectionEnd::Shutdown);
                }
                trace!("read from {} interrupted, retrying", peer);
            }
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Resolves once shutdown is set or its sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop || shutdown.changed().await.is_err() {
            return;
        }
    }
}
