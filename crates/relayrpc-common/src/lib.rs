//! RelayRPC Common Types and Transport
//!
//! This crate provides the protocol definitions, wire codec and shared
//! plumbing used by both the RelayRPC client and server.
//!
//! # Components
//!
//! - [`protocol`] - Calls, replies, frames, node addresses and [`RpcError`]
//! - [`serialization`] - Pluggable body serializers (JSON, MessagePack)
//! - [`transport`] - Frame codec, streaming decoder and framed TCP connections
//! - [`filter`] - Filter chains and the built-in token, rate-limit and access-log filters
//! - [`discovery`] - Service discovery trait and an in-memory implementation
//! - [`extension`] - Registry resolving pluggable capabilities by name
//! - [`config`] - Runtime-wide settings
//!
//! # Wire Format
//!
//! `[magic "RRPC"] [version] [serializer code] [message type] [4-byte BE body length] [body]`
//!
//! # Example
//!
//! ```
//! use relayrpc_common::{Call, Param, Reply};
//! use serde_json::json;
//!
//! let call = Call::new("Calculator", "add", vec![Param::from(2i64), Param::from(3i64)]);
//! let reply = Reply::success(call.request_id.clone(), Some(json!(5)));
//! assert!(reply.is_success());
//! ```

pub mod auth;
pub mod config;
pub mod discovery;
pub mod extension;
pub mod filter;
pub mod protocol;
pub mod rate_limit;
pub mod serialization;
pub mod transport;

pub use protocol::*;
