use std::time::Duration;

use async_trait::async_trait;
use relayrpc_common::protocol::{Call, NodeAddress, Reply, Result};

/// Sends one call to one node and waits for its reply.
///
/// This is the seam between the invocation logic and the network:
/// [`ConnectionPool`](crate::ConnectionPool) is the real implementation and
/// tests substitute their own.
#[async_trait]
pub trait Transport: Send + Sync {
    /// # Errors
    ///
    /// Connection and write failures, and [`RpcError::Timeout`] if no reply
    /// arrives within `timeout`. A reply with a failure status is still `Ok`.
    ///
    /// [`RpcError::Timeout`]: relayrpc_common::RpcError::Timeout
    async fn send(&self, addr: &NodeAddress, call: Call, timeout: Duration) -> Result<Reply>;
}
