use std::sync::Arc;

use relayrpc_common::protocol::error::{Result, RpcError};
use relayrpc_common::protocol::{Frame, Message, NodeAddress};
use relayrpc_common::transport::{connect, split_framed, FrameCodec, FrameReader, FrameSink, IdleConfig};
use tokio::task::{AbortHandle, JoinHandle};

use crate::pending::PendingCalls;
use crate::pool::PoolConfig;

/// One multiplexed TCP connection to a server.
///
/// Any number of calls may be in flight at once; replies are matched to
/// callers through the shared [`PendingCalls`] table. A reader task routes
/// inbound frames and a writer task drains the outbound queue, sending
/// heartbeats while the connection is otherwise idle.
pub struct Connection {
    addr: NodeAddress,
    sink: FrameSink,
    reader_task: JoinHandle<()>,
    writer_task: AbortHandle,
}

impl Connection {
    pub async fn open(
        addr: &NodeAddress,
        codec: Arc<FrameCodec>,
        pending: Arc<PendingCalls>,
        config: &PoolConfig,
    ) -> Result<Self> {
        let stream = connect(addr.as_str(), config.connect_timeout).await?;
        let idle = IdleConfig {
            read_idle: config.read_idle,
            write_idle: config.write_idle,
            heartbeat_serializer_code: config.serializer_code,
        };
        let (reader, sink, writer) = split_framed(stream, codec, idle);
        let writer_task = writer.abort_handle();

        let reader_task = tokio::spawn(read_loop(
            addr.clone(),
            reader,
            pending,
            writer_task.clone(),
        ));

        tracing::info!(addr = %addr, "connected");

        Ok(Connection {
            addr: addr.clone(),
            sink,
            reader_task,
            writer_task,
        })
    }

    pub fn addr(&self) -> &NodeAddress {
        &self.addr
    }

    /// Returns whether both the reader and the writer are still running.
    pub fn is_active(&self) -> bool {
        !self.reader_task.is_finished() && self.sink.is_active()
    }

    /// Writes a frame, waiting until it has been flushed.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        self.sink.send(frame).await
    }

    pub fn close(&self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_loop(
    addr: NodeAddress,
    mut reader: FrameReader,
    pending: Arc<PendingCalls>,
    writer: AbortHandle,
) {
    loop {
        match reader.next_frame().await {
            Ok(Some(frame)) => {
                let kind = frame.message_type();
                match frame.message {
                    Message::Response(reply) => {
                        pending.complete(reply);
                    }
                    Message::HeartbeatResponse => {
                        tracing::debug!(addr = %addr, "heartbeat acknowledged");
                    }
                    Message::HeartbeatRequest | Message::Request(_) => {
                        tracing::warn!(addr = %addr, "ignoring unexpected {:?} frame from server", kind);
                    }
                }
            }
            Ok(None) => {
                tracing::info!(addr = %addr, "server closed connection");
                break;
            }
            Err(RpcError::Serialization(e)) => {
                // The caller of that reply will time out
                tracing::warn!(addr = %addr, error = %e, "dropping undecodable reply");
            }
            Err(RpcError::Timeout(ms)) => {
                tracing::warn!(addr = %addr, idle_ms = ms, "no traffic from server, closing connection");
                break;
            }
            Err(e) => {
                tracing::error!(addr = %addr, error = %e, "connection failed");
                break;
            }
        }
    }

    writer.abort();
}
