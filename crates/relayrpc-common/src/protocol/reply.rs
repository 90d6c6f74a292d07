//! RelayRPC Reply Types
//!
//! This module defines the reply carried in a RESPONSE frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RequestId;

/// Status code of a successful invocation.
pub const STATUS_OK: u16 = 200;
/// Status code of any failed invocation.
pub const STATUS_FAILURE: u16 = 500;

/// The outcome of a call, returned from a server to the client.
///
/// # Reply Flow
///
/// 1. Server receives and dispatches a `Call`
/// 2. Server builds a `Reply` (success or failure)
/// 3. Reply is serialized with the serializer the call arrived with
/// 4. Client matches it to the pending call by `request_id`
///
/// # Example
///
/// ```
/// use relayrpc_common::protocol::Reply;
/// use serde_json::json;
///
/// let ok = Reply::success("req-1", Some(json!(3)));
/// assert!(ok.is_success());
///
/// let failed = Reply::failure("req-1", "Division by zero");
/// assert_eq!(failed.status, 500);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    /// Request identifier this reply corresponds to
    pub request_id: RequestId,
    /// 200 on success, 500 on failure
    pub status: u16,
    /// Human readable status message
    pub message: String,
    /// Return value (absent for failures and unit-returning methods)
    pub payload: Option<Value>,
}

impl Reply {
    /// Creates a successful reply.
    ///
    /// # Arguments
    ///
    /// * `request_id` - The id of the call being answered
    /// * `payload` - The method's return value
    pub fn success(request_id: impl Into<RequestId>, payload: Option<Value>) -> Self {
        Reply {
            request_id: request_id.into(),
            status: STATUS_OK,
            message: "success".to_string(),
            payload,
        }
    }

    /// Creates a failed reply.
    ///
    /// # Arguments
    ///
    /// * `request_id` - The id of the call being answered
    /// * `message` - Description of the failure
    pub fn failure(request_id: impl Into<RequestId>, message: impl Into<String>) -> Self {
        Reply {
            request_id: request_id.into(),
            status: STATUS_FAILURE,
            message: message.into(),
            payload: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }
}
