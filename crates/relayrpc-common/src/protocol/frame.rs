//! Wire frame model.
//!
//! Every message on a RelayRPC connection is a frame:
//!
//! ```text
//! +-------+---------+------------+------+-------------+------------------+
//! | magic | version | serializer | type | body length | body             |
//! | 4 B   | 1 B     | 1 B        | 1 B  | 4 B (BE)    | body length B    |
//! +-------+---------+------------+------+-------------+------------------+
//! ```
//!
//! The body of a heartbeat is the literal `PING` or `PONG`; the body of a
//! request or response is produced by the serializer named in the header.

use super::{Call, Reply, Result, RpcError};

/// Magic bytes identifying a RelayRPC frame.
pub const MAGIC: [u8; 4] = *b"RRPC";
/// The only protocol version this implementation speaks.
pub const VERSION: u8 = 1;
/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 11;
/// Maximum body size (100 MB) to prevent memory exhaustion.
pub const MAX_BODY_SIZE: usize = 100 * 1024 * 1024;

pub const PING: &[u8] = b"PING";
pub const PONG: &[u8] = b"PONG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Request = 1,
    Response = 2,
    HeartbeatRequest = 3,
    HeartbeatResponse = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = RpcError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(MessageType::Request),
            2 => Ok(MessageType::Response),
            3 => Ok(MessageType::HeartbeatRequest),
            4 => Ok(MessageType::HeartbeatResponse),
            other => Err(RpcError::Protocol(format!("unknown message type {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Call),
    Response(Reply),
    HeartbeatRequest,
    HeartbeatResponse,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Request(_) => MessageType::Request,
            Message::Response(_) => MessageType::Response,
            Message::HeartbeatRequest => MessageType::HeartbeatRequest,
            Message::HeartbeatResponse => MessageType::HeartbeatResponse,
        }
    }
}

/// A decoded frame: header fields plus the typed message.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub version: u8,
    pub serializer_code: u8,
    pub message: Message,
}

impl Frame {
    pub fn new(serializer_code: u8, message: Message) -> Self {
        Frame {
            version: VERSION,
            serializer_code,
            message,
        }
    }

    pub fn request(serializer_code: u8, call: Call) -> Self {
        Frame::new(serializer_code, Message::Request(call))
    }

    pub fn response(serializer_code: u8, reply: Reply) -> Self {
        Frame::new(serializer_code, Message::Response(reply))
    }

    pub fn heartbeat_request(serializer_code: u8) -> Self {
        Frame::new(serializer_code, Message::HeartbeatRequest)
    }

    pub fn heartbeat_response(serializer_code: u8) -> Self {
        Frame::new(serializer_code, Message::HeartbeatResponse)
    }

    pub fn message_type(&self) -> MessageType {
        self.message.message_type()
    }
}
