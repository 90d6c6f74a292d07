use super::Serializer;
use crate::protocol::{Call, Reply, Result};

/// JSON body serializer backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub const CODE: u8 = 1;
}

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn code(&self) -> u8 {
        Self::CODE
    }

    fn serialize_call(&self, call: &Call) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(call)?)
    }

    fn deserialize_call(&self, bytes: &[u8]) -> Result<Call> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn serialize_reply(&self, reply: &Reply) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(reply)?)
    }

    fn deserialize_reply(&self, bytes: &[u8]) -> Result<Reply> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
