use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use relayrpc_common::protocol::error::Result;
use relayrpc_common::protocol::{Call, Frame, NodeAddress, Reply};
use relayrpc_common::serialization::MsgPackSerializer;
use relayrpc_common::transport::{FrameCodec, DEFAULT_CONNECT_TIMEOUT};
use tokio::sync::Mutex;

use crate::connection::Connection;
use crate::pending::{PendingCalls, PendingReply};
use crate::transport::Transport;

/// Connection pool configuration.
///
/// # Default Configuration
///
/// - `connect_timeout`: 5 seconds
/// - `read_idle`: 15 seconds without inbound traffic closes the connection
/// - `write_idle`: 5 seconds without outbound traffic sends a heartbeat
/// - `serializer_code`: MessagePack
///
/// # Example
///
/// ```rust
/// use relayrpc_client::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig {
///     write_idle: Some(Duration::from_secs(2)),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Timeout for establishing a connection
    pub connect_timeout: Duration,
    /// Close the connection after this long without inbound frames
    pub read_idle: Option<Duration>,
    /// Send a heartbeat after this long without outbound frames
    pub write_idle: Option<Duration>,
    /// Serializer code used for outgoing calls
    pub serializer_code: u8,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_idle: Some(Duration::from_secs(15)),
            write_idle: Some(Duration::from_secs(5)),
            serializer_code: MsgPackSerializer::CODE,
        }
    }
}

/// Pool of multiplexed connections, at most one per node.
///
/// # Architecture
///
/// - Connections are keyed by node address and shared by every caller
/// - Lookups of a live connection are lock-free
/// - Opening a connection happens under a pool-wide lock with a second
///   lookup, so concurrent callers never open two sockets to the same node
/// - Dead connections are evicted when next looked up or when a write fails
///
/// # Example
///
/// ```rust,no_run
/// use relayrpc_client::{ConnectionPool, PoolConfig};
/// use relayrpc_common::{Call, NodeAddress};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = ConnectionPool::new(PoolConfig::default());
/// let addr = NodeAddress::from("127.0.0.1:8080");
///
/// let pending = pool.send(&addr, Call::new("Echo", "echo", vec!["hi".into()])).await?;
/// let reply = pending.wait(Duration::from_secs(2)).await?;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool {
    config: PoolConfig,
    codec: Arc<FrameCodec>,
    pending: Arc<PendingCalls>,
    connections: DashMap<NodeAddress, Arc<Connection>>,
    connect_lock: Mutex<()>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self::with_codec(config, Arc::new(FrameCodec::new()))
    }

    pub fn with_codec(config: PoolConfig, codec: Arc<FrameCodec>) -> Self {
        Self {
            config,
            codec,
            pending: Arc::new(PendingCalls::new()),
            connections: DashMap::new(),
            connect_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn pending(&self) -> &Arc<PendingCalls> {
        &self.pending
    }

    /// Returns the live connection to `addr`, opening one if needed.
    pub async fn get_or_create(&self, addr: &NodeAddress) -> Result<Arc<Connection>> {
        if let Some(conn) = self.active(addr) {
            return Ok(conn);
        }

        let _guard = self.connect_lock.lock().await;

        // Another caller may have connected while we waited
        if let Some(conn) = self.active(addr) {
            return Ok(conn);
        }

        let conn = Arc::new(
            Connection::open(addr, self.codec.clone(), self.pending.clone(), &self.config).await?,
        );
        self.connections.insert(addr.clone(), conn.clone());
        Ok(conn)
    }

    fn active(&self, addr: &NodeAddress) -> Option<Arc<Connection>> {
        let conn = self.connections.get(addr).map(|c| c.value().clone())?;
        if conn.is_active() {
            return Some(conn);
        }

        tracing::debug!(addr = %addr, "evicting inactive connection");
        self.connections
            .remove_if(addr, |_, current| Arc::ptr_eq(current, &conn));
        conn.close();
        None
    }

    /// Registers the call as pending and writes it.
    ///
    /// On a write failure the connection is evicted and the error returned
    /// at once; no reply is awaited.
    pub async fn send(&self, addr: &NodeAddress, call: Call) -> Result<PendingReply> {
        let conn = self.get_or_create(addr).await?;
        let pending = self.pending.put(call.request_id.clone())?;

        if let Err(e) = conn
            .send(Frame::request(self.config.serializer_code, call))
            .await
        {
            tracing::warn!(addr = %addr, error = %e, "write failed");
            self.evict_connection(addr, &conn);
            return Err(e);
        }

        Ok(pending)
    }

    fn evict_connection(&self, addr: &NodeAddress, conn: &Arc<Connection>) {
        self.connections
            .remove_if(addr, |_, current| Arc::ptr_eq(current, conn));
        conn.close();
    }

    /// Closes and forgets the connection to `addr`, if any.
    pub fn evict(&self, addr: &NodeAddress) {
        if let Some((_, conn)) = self.connections.remove(addr) {
            conn.close();
        }
    }

    /// Closes every connection.
    pub fn close_all(&self) {
        let addrs: Vec<NodeAddress> = self.connections.iter().map(|e| e.key().clone()).collect();
        for addr in addrs {
            self.evict(&addr);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[async_trait]
impl Transport for ConnectionPool {
    async fn send(&self, addr: &NodeAddress, call: Call, timeout: Duration) -> Result<Reply> {
        let pending = ConnectionPool::send(self, addr, call).await?;
        pending.wait(timeout).await
    }
}
