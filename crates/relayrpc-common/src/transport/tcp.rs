//! Framed TCP connections.
//!
//! A connection is split into a [`FrameReader`] that owns the read half and
//! the decoder, and a [`FrameSink`] that queues frames for a writer task
//! owning the write half. Any number of tasks may hold a sink; frames are
//! written one at a time in queue order.
//!
//! Two idle timers are supported:
//! - read idle: [`FrameReader::next_frame`] fails with [`RpcError::Timeout`]
//!   when nothing arrives for that long, and the owner closes the connection.
//! - write idle: the writer sends a heartbeat request when nothing has been
//!   queued for that long. Only clients configure this timer.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::codec::{FrameCodec, FrameDecoder};
use crate::protocol::error::{Result, RpcError};
use crate::protocol::frame::Frame;

/// Default timeout for establishing a connection (5 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connects to `addr`, trying every address it resolves to.
///
/// Each attempt is bounded by `connect_timeout`.
pub async fn connect(addr: &str, connect_timeout: Duration) -> Result<TcpStream> {
    let socket_addrs = tokio::net::lookup_host(addr)
        .await
        .map_err(|e| RpcError::Connection(format!("Invalid address '{}': {}", addr, e)))?;

    // Try each resolved address until one succeeds
    let mut last_err = None;
    for socket_addr in socket_addrs {
        match tokio::time::timeout(connect_timeout, TcpStream::connect(socket_addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Ok(Err(e)) => {
                last_err = Some(e.to_string());
            }
            Err(_) => {
                last_err = Some(format!(
                    "timed out after {}ms",
                    connect_timeout.as_millis()
                ));
            }
        }
    }

    Err(RpcError::Connection(format!(
        "Failed to connect to {}: {}",
        addr,
        last_err.unwrap_or_else(|| "no addresses resolved".to_string())
    )))
}

/// Idle timers for a framed connection. `None` disables a timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleConfig {
    pub read_idle: Option<Duration>,
    pub write_idle: Option<Duration>,
    /// Serializer code written into heartbeat headers.
    pub heartbeat_serializer_code: u8,
}

struct Outbound {
    frame: Frame,
    ack: Option<oneshot::Sender<Result<()>>>,
}

/// Splits a stream into a frame reader and a frame sink.
///
/// Spawns the writer task and returns its handle. The writer exits when every
/// sink has been dropped or a write fails.
pub fn split_framed(
    stream: TcpStream,
    codec: Arc<FrameCodec>,
    idle: IdleConfig,
) -> (FrameReader, FrameSink, JoinHandle<()>) {
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();

    let writer = tokio::spawn(write_loop(write_half, codec.clone(), rx, idle));

    let reader = FrameReader {
        half: read_half,
        decoder: FrameDecoder::new(codec),
        read_idle: idle.read_idle,
    };

    (reader, FrameSink { tx }, writer)
}

/// Reading side of a framed connection.
pub struct FrameReader {
    half: OwnedReadHalf,
    decoder: FrameDecoder,
    read_idle: Option<Duration>,
}

impl FrameReader {
    /// Reads the next frame.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(frame))` for every decoded frame
    /// - `Ok(None)` when the peer closed the connection between frames
    /// - `Err(RpcError::Timeout)` when the read-idle timer fired
    /// - `Err(RpcError::Serialization)` for an unreadable body; the stream is
    ///   still aligned and the next call continues with the following frame
    /// - any other error means the connection is unusable
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.decoder.decode()? {
                return Ok(Some(frame));
            }

            let read = self.half.read_buf(self.decoder.buffer_mut());
            let n = match self.read_idle {
                Some(idle) => tokio::time::timeout(idle, read)
                    .await
                    .map_err(|_| RpcError::Timeout(idle.as_millis() as u64))?,
                None => read.await,
            }
            .map_err(|e| map_io_error(e, "read"))?;

            if n == 0 {
                if self.decoder.buffered() == 0 {
                    return Ok(None);
                }
                return Err(RpcError::ConnectionClosed);
            }
        }
    }

    pub fn peer_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.half.peer_addr()?)
    }
}

/// Cloneable handle for queueing frames on a connection.
#[derive(Clone)]
pub struct FrameSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl FrameSink {
    /// Queues a frame and waits until it has been written and flushed.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Outbound {
                frame,
                ack: Some(ack_tx),
            })
            .map_err(|_| RpcError::ConnectionClosed)?;
        ack_rx.await.map_err(|_| RpcError::ConnectionClosed)?
    }

    /// Queues a frame without waiting for the write.
    pub fn send_nowait(&self, frame: Frame) -> Result<()> {
        self.tx
            .send(Outbound { frame, ack: None })
            .map_err(|_| RpcError::ConnectionClosed)
    }

    /// Returns whether the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn is_active(&self) -> bool {
        !self.is_closed()
    }
}

async fn write_loop(
    mut half: OwnedWriteHalf,
    codec: Arc<FrameCodec>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    idle: IdleConfig,
) {
    let mut buf = BytesMut::with_capacity(8 * 1024);

    loop {
        let next = match idle.write_idle {
            Some(write_idle) => match tokio::time::timeout(write_idle, rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::debug!("write idle, sending heartbeat");
                    Some(Outbound {
                        frame: Frame::heartbeat_request(idle.heartbeat_serializer_code),
                        ack: None,
                    })
                }
            },
            None => rx.recv().await,
        };

        // Every sink is gone
        let Some(outbound) = next else { break };

        buf.clear();
        if let Err(e) = codec.encode_into(&outbound.frame, &mut buf) {
            // Only this frame is lost; the connection is still fine.
            tracing::warn!(error = %e, "failed to encode frame");
            if let Some(ack) = outbound.ack {
                let _ = ack.send(Err(e));
            }
            continue;
        }

        let written = match half.write_all(&buf).await {
            Ok(()) => half.flush().await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                if let Some(ack) = outbound.ack {
                    let _ = ack.send(Ok(()));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "write failed, closing connection");
                if let Some(ack) = outbound.ack {
                    let _ = ack.send(Err(map_io_error(e, "write")));
                }
                break;
            }
        }
    }

    let _ = half.shutdown().await;
}

/// Maps I/O errors to RPC errors.
pub fn map_io_error(err: std::io::Error, context: &str) -> RpcError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            RpcError::Timeout(DEFAULT_CONNECT_TIMEOUT.as_millis() as u64)
        }
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::BrokenPipe => {
            RpcError::Connection(format!("{}: Connection lost", context))
        }
        std::io::ErrorKind::UnexpectedEof => RpcError::ConnectionClosed,
        _ => RpcError::Io(err),
    }
}
