//! TCP transport for the join protocol.
//!
//! [`TcpTransport`] opens one TCP connection per candidate and exchanges
//! framed [`JoinMessage`]s over it. [`JoinListener`] is the accepting side:
//! it reads requests from every incoming connection and writes back whatever
//! the handler returns.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tidepool_types::Address;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::NetError;
use crate::frame::FrameMessage;
use crate::message::JoinMessage;
use crate::{Channel, Transport};

/// Initial read buffer capacity; join messages are small.
const READ_BUFFER_CAPACITY: usize = 4 * 1024;

/// How long an incoming connection may stay silent before it is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Write one message to `writer` under `correlation_id`.
pub async fn write_message<W>(
    writer: &mut W,
    message: &JoinMessage,
    correlation_id: i64,
) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let frames = message.encode(correlation_id);
    let mut buf = BytesMut::with_capacity(frames.encoded_len());
    frames.encode(&mut buf);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one message from `reader`, buffering partial input in `buf`.
///
/// Bytes past the end of the message stay in `buf` for the next call.
pub async fn read_message<R>(
    reader: &mut R,
    buf: &mut BytesMut,
) -> Result<(i64, JoinMessage), NetError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(frames) = FrameMessage::decode(buf)? {
            return JoinMessage::decode(&frames);
        }
        if reader.read_buf(buf).await? == 0 {
            return Err(NetError::StreamClosed);
        }
    }
}

// ---------------------------------------------------------------------------
// Outgoing side
// ---------------------------------------------------------------------------

/// Connects to candidates over plain TCP.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    _private: (),
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, addr: &Address) -> Result<Box<dyn Channel>, NetError> {
        let stream = TcpStream::connect((addr.host(), addr.port()))
            .await
            .map_err(|e| NetError::Connect(format!("{addr}: {e}")))?;
        stream.set_nodelay(true)?;
        debug!(%addr, "connected to candidate");
        Ok(Box::new(TcpChannel::new(stream)))
    }
}

/// One established join connection.
pub struct TcpChannel {
    stream: TcpStream,
    read_buf: BytesMut,
    next_correlation_id: i64,
}

impl TcpChannel {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            next_correlation_id: 1,
        }
    }
}

#[async_trait]
impl Channel for TcpChannel {
    async fn request(&mut self, message: &JoinMessage) -> Result<JoinMessage, NetError> {
        let correlation_id = self.next_correlation_id;
        self.next_correlation_id += 1;

        write_message(&mut self.stream, message, correlation_id).await?;
        let (received, response) = read_message(&mut self.stream, &mut self.read_buf).await?;

        if received != correlation_id {
            return Err(NetError::CorrelationMismatch {
                sent: correlation_id,
                received,
            });
        }
        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Incoming side
// ---------------------------------------------------------------------------

/// Accepts join connections and answers requests through a handler.
pub struct JoinListener {
    listener: TcpListener,
    idle_timeout: Duration,
}

impl JoinListener {
    /// Bind to the given address (port 0 picks a free port).
    pub async fn bind(addr: &Address) -> Result<Self, NetError> {
        let listener = TcpListener::bind((addr.host(), addr.port()))
            .await
            .map_err(|e| NetError::Connect(format!("bind {addr}: {e}")))?;
        Ok(Self {
            listener,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        })
    }

    /// Close incoming connections that send nothing for `idle_timeout`.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> Result<Address, NetError> {
        Ok(Address::from(self.listener.local_addr()?))
    }

    /// Serve connections until `shutdown` flips (or its sender is dropped).
    ///
    /// Open connections are closed on shutdown too, and whenever a peer
    /// stays silent longer than the idle timeout. For each request the handler receives the decoded message and the
    /// remote socket address; `Some(response)` is written back with the
    /// request's correlation id, `None` leaves the request unanswered.
    pub async fn serve<F, Fut>(self, handler: F, mut shutdown: watch::Receiver<bool>)
    where
        F: Fn(JoinMessage, Address) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<JoinMessage>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        info!("join listener started");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let handler = handler.clone();
                        let shutdown = shutdown.clone();
                        let idle_timeout = self.idle_timeout;
                        tokio::spawn(async move {
                            let remote = Address::from(remote);
                            handle_connection(stream, remote, handler, idle_timeout, shutdown)
                                .await;
                        });
                    }
                    Err(e) => warn!("failed to accept connection: {e}"),
                },
                _ = shutdown.changed() => {
                    info!("join listener shutting down");
                    break;
                }
            }
        }
    }
}

async fn handle_connection<F, Fut>(
    mut stream: TcpStream,
    remote: Address,
    handler: Arc<F>,
    idle_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    F: Fn(JoinMessage, Address) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<JoinMessage>> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(READ_BUFFER_CAPACITY);
    loop {
        let read = tokio::select! {
            read = tokio::time::timeout(idle_timeout, read_message(&mut stream, &mut buf)) => read,
            _ = shutdown.changed() => {
                debug!(%remote, "closing connection on shutdown");
                break;
            }
        };

        let (correlation_id, request) = match read {
            Ok(Ok(decoded)) => decoded,
            Ok(Err(NetError::StreamClosed)) => {
                debug!(%remote, "connection closed");
                break;
            }
            Ok(Err(e)) => {
                warn!(%remote, "failed to decode join message: {e}");
                break;
            }
            Err(_) => {
                debug!(%remote, ?idle_timeout, "closing idle connection");
                break;
            }
        };

        if let Some(response) = handler(request, remote.clone()).await
            && let Err(e) = write_message(&mut stream, &response, correlation_id).await
        {
            warn!(%remote, "failed to send response: {e}");
            break;
        }
    }
}
