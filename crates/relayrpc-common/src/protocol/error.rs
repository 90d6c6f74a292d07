use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No available node for service: {0}")]
    NoAvailableNode(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Server is busy: {0}")]
    RateLimited(String),

    #[error("Remote invocation failed: {0}")]
    RemoteInvocation(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No {capability} extension registered under '{name}'")]
    UnknownExtension { capability: &'static str, name: String },

    #[error("Invocation failed after {attempts} attempts: {last}")]
    AttemptsExhausted {
        attempts: u32,
        #[source]
        last: Box<RpcError>,
    },
}

impl RpcError {
    /// Returns whether another attempt on a different node could succeed.
    ///
    /// Transport failures, timeouts and failed remote invocations are worth
    /// retrying. Failures raised on the caller's side (filters, missing nodes,
    /// malformed input) fail the same way on every node.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::Timeout(_)
                | RpcError::Connection(_)
                | RpcError::ConnectionClosed
                | RpcError::Io(_)
                | RpcError::Protocol(_)
                | RpcError::RemoteInvocation(_)
        )
    }
}

impl From<std::net::AddrParseError> for RpcError {
    fn from(err: std::net::AddrParseError) -> Self {
        RpcError::InvalidRequest(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
