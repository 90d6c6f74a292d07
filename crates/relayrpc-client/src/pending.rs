use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relayrpc_common::protocol::error::{Result, RpcError};
use relayrpc_common::protocol::{Reply, RequestId};
use tokio::sync::oneshot;

/// Correlation table from request id to the task waiting for its reply.
///
/// Each entry is removed exactly once: by the reply that completes it, by the
/// waiter timing out, or by the waiter going away. Replies for ids that are
/// not (or no longer) pending are logged and dropped.
#[derive(Default)]
pub struct PendingCalls {
    calls: DashMap<RequestId, oneshot::Sender<Reply>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `request_id` and returns the handle to await its reply.
    ///
    /// # Errors
    ///
    /// Fails if the id is already pending.
    pub fn put(self: &Arc<Self>, request_id: RequestId) -> Result<PendingReply> {
        let (tx, rx) = oneshot::channel();
        match self.calls.entry(request_id.clone()) {
            Entry::Occupied(_) => {
                return Err(RpcError::InvalidRequest(format!(
                    "request id {} is already pending",
                    request_id
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }

        Ok(PendingReply {
            request_id,
            rx: Some(rx),
            table: self.clone(),
        })
    }

    /// Hands `reply` to its waiter. Returns `false` for orphan replies.
    pub fn complete(&self, reply: Reply) -> bool {
        match self.calls.remove(&reply.request_id) {
            Some((_, tx)) => {
                let request_id = reply.request_id.clone();
                if tx.send(reply).is_err() {
                    // Waiter dropped between removal and send
                    tracing::debug!(request_id = %request_id, "reply arrived after waiter left");
                    return false;
                }
                true
            }
            None => {
                tracing::warn!(request_id = %reply.request_id, "discarding reply for unknown request");
                false
            }
        }
    }

    /// Removes `request_id` without completing it.
    pub fn abandon(&self, request_id: &str) -> bool {
        self.calls.remove(request_id).is_some()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.calls.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// A registered call waiting for its reply.
///
/// Dropping it before the reply arrives removes the table entry.
pub struct PendingReply {
    request_id: RequestId,
    rx: Option<oneshot::Receiver<Reply>>,
    table: Arc<PendingCalls>,
}

impl PendingReply {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Waits up to `timeout` for the reply.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Timeout`] if no reply arrived in time; the entry is removed
    /// - [`RpcError::ConnectionClosed`] if the entry was abandoned, e.g. because
    ///   the connection carrying it went away
    pub async fn wait(mut self, timeout: Duration) -> Result<Reply> {
        let rx = match self.rx.take() {
            Some(rx) => rx,
            None => return Err(RpcError::ConnectionClosed),
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(RpcError::ConnectionClosed),
            Err(_) => {
                self.table.abandon(&self.request_id);
                Err(RpcError::Timeout(timeout.as_millis() as u64))
            }
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        // Already resolved entries are gone, so this only hits abandoned waits.
        self.table.abandon(&self.request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_complete_resolves_waiter() {
        let table = Arc::new(PendingCalls::new());
        let pending = table.put("a".to_string()).unwrap();
        assert_eq!(table.len(), 1);

        assert!(table.complete(Reply::success("a", Some(json!(1)))));
        let reply = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply.payload, Some(json!(1)));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_reply_before_wait_is_kept() {
        let table = Arc::new(PendingCalls::new());
        let pending = table.put("a".to_string()).unwrap();
        table.complete(Reply::success("a", None));
        assert!(pending.wait(Duration::from_millis(10)).await.is_ok());
    }

    #[test]
    fn test_orphan_reply_is_noop() {
        let table = Arc::new(PendingCalls::new());
        let _pending = table.put("a".to_string()).unwrap();

        assert!(!table.complete(Reply::success("unknown", None)));
        assert_eq!(table.len(), 1);
        assert!(table.contains("a"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let table = Arc::new(PendingCalls::new());
        let _first = table.put("a".to_string()).unwrap();
        assert!(matches!(table.put("a".to_string()), Err(RpcError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_timeout_removes_entry() {
        let table = Arc::new(PendingCalls::new());
        let pending = table.put("a".to_string()).unwrap();

        let result = pending.wait(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(RpcError::Timeout(20))));
        assert!(table.is_empty());

        // A late reply is now an orphan
        assert!(!table.complete(Reply::success("a", None)));
    }

    #[test]
    fn test_drop_removes_entry() {
        let table = Arc::new(PendingCalls::new());
        let pending = table.put("a".to_string()).unwrap();
        drop(pending);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_abandon_wakes_waiter() {
        let table = Arc::new(PendingCalls::new());
        let pending = table.put("a".to_string()).unwrap();
        assert!(table.abandon("a"));
        assert!(matches!(
            pending.wait(Duration::from_secs(1)).await,
            Err(RpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_complete_resolves_once() {
        let table = Arc::new(PendingCalls::new());
        let pending = table.put("a".to_string()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                tokio::spawn(async move { table.complete(Reply::success("a", None)) })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(pending.wait(Duration::from_secs(1)).await.is_ok());
    }
}
