//! Body serializers.
//!
//! A serializer turns calls and replies into frame bodies and back. Each one
//! is identified on the wire by a one-byte code carried in the frame header:
//!
//! | Code | Name      | Backend      |
//! |------|-----------|--------------|
//! | 1    | `json`    | `serde_json` |
//! | 2    | `msgpack` | `rmp-serde`  |
//!
//! Serializers are trait objects so a runtime can choose one by name from
//! configuration through the extension registry.

mod json;
mod msgpack;

pub use json::JsonSerializer;
pub use msgpack::MsgPackSerializer;

use std::sync::Arc;

use crate::protocol::{Call, Reply, Result};

/// Frame body serializer.
pub trait Serializer: Send + Sync {
    /// Name used to select this serializer from configuration.
    fn name(&self) -> &'static str;

    /// Code written into the frame header.
    fn code(&self) -> u8;

    fn serialize_call(&self, call: &Call) -> Result<Vec<u8>>;

    fn deserialize_call(&self, bytes: &[u8]) -> Result<Call>;

    fn serialize_reply(&self, reply: &Reply) -> Result<Vec<u8>>;

    fn deserialize_reply(&self, bytes: &[u8]) -> Result<Reply>;
}

/// All serializers shipped with RelayRPC.
pub fn builtin_serializers() -> Vec<Arc<dyn Serializer>> {
    vec![Arc::new(JsonSerializer), Arc::new(MsgPackSerializer)]
}
