//! RelayRPC Server
//!
//! This crate provides the serving side of RelayRPC: a table of services with
//! their methods, a dispatcher that runs calls through the server filters,
//! and a TCP listener that speaks the framed wire protocol.
//!
//! Service handlers run on tokio's blocking pool, so a slow or panicking
//! handler never stalls the connection it arrived on.

pub mod dispatcher;
pub mod provider;
pub mod server;

pub use dispatcher::Dispatcher;
pub use provider::{Handler, MethodKey, ServiceDefinition, ServiceProvider};
pub use server::{server_filters, RpcServer, ServerConfig, ServerHandle};
