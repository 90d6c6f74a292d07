use super::Serializer;
use crate::protocol::{Call, Reply, Result};

/// Compact binary serializer backed by `rmp-serde`.
///
/// Structs are written as maps (`to_vec_named`) so fields added with
/// `#[serde(default)]` stay readable by older peers.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackSerializer;

impl MsgPackSerializer {
    pub const CODE: u8 = 2;
}

impl Serializer for MsgPackSerializer {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn code(&self) -> u8 {
        Self::CODE
    }

    fn serialize_call(&self, call: &Call) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(call)?)
    }

    fn deserialize_call(&self, bytes: &[u8]) -> Result<Call> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    fn serialize_reply(&self, reply: &Reply) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(reply)?)
    }

    fn deserialize_reply(&self, bytes: &[u8]) -> Result<Reply> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
