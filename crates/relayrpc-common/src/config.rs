//! Runtime-wide settings.
//!
//! [`RpcConfig`] names the extensions a runtime uses and the shared security
//! settings. It derives `Deserialize` so it can be filled from any
//! serde-supported source; every field has a default.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RpcConfig {
    /// Serializer name, resolved through the extension registry.
    pub serializer: String,
    /// Load balancer name, resolved through the extension registry.
    pub load_balancer: String,
    /// Discovery backend name, resolved through the extension registry.
    pub discovery: String,
    /// Shared-secret token. Enables the token filters when set.
    pub token: Option<String>,
    /// Per-interface calls per second accepted by the server. Zero disables
    /// the rate-limit filter.
    pub rate_limit_qps: f64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            serializer: "msgpack".to_string(),
            load_balancer: "consistentHash".to_string(),
            discovery: "memory".to_string(),
            token: None,
            rate_limit_qps: 100.0,
        }
    }
}
