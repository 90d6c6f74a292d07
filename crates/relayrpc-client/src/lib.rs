//! RelayRPC Client Library
//!
//! This crate provides the calling side of RelayRPC: locating providers via
//! discovery, picking one with a load balancer, skipping failing nodes with
//! per-node circuit breakers, and retrying on other nodes.
//!
//! # Components
//!
//! - [`RpcClient`] / [`ServiceStub`]: the high-level entry points
//! - [`Invoker`]: retry orchestration across nodes
//! - [`ConnectionPool`]: one multiplexed connection per node, with heartbeats
//! - [`PendingCalls`]: request-id to waiter correlation
//! - [`load_balancer`]: random, round-robin and consistent-hash strategies
//! - [`CircuitBreaker`]: per-node failure isolation
//!
//! # Example
//!
//! ```no_run
//! use relayrpc_client::{register_defaults, ClientConfig, RpcClient};
//! use relayrpc_common::config::RpcConfig;
//! use relayrpc_common::extension::ExtensionRegistry;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ExtensionRegistry::with_defaults();
//! register_defaults(&registry);
//!
//! let client = RpcClient::from_registry(&registry, &RpcConfig::default(), ClientConfig::default())?;
//! let greeting: String = client.call("Greeter", "hello", vec!["world".into()]).await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod client;
pub mod connection;
pub mod invoker;
pub mod load_balancer;
pub mod pending;
pub mod pool;
pub mod transport;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakers, CircuitState};
pub use client::{ClientConfig, RpcClient, ServiceStub};
pub use connection::Connection;
pub use invoker::{InvocationOutcome, Invoker, RetryConfig};
pub use load_balancer::{
    ConsistentHashBalancer, LoadBalancer, RandomBalancer, RoundRobinBalancer,
};
pub use pending::{PendingCalls, PendingReply};
pub use pool::{ConnectionPool, PoolConfig};
pub use transport::Transport;

use relayrpc_common::extension::ExtensionRegistry;

/// Registers the client-side extensions (the load balancers).
pub fn register_defaults(registry: &ExtensionRegistry) {
    load_balancer::register_default_balancers(registry);
}
