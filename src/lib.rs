//! RelayRPC
//!
//! A small RPC runtime: services published under an interface name are
//! called over multiplexed TCP connections, with discovery, load balancing,
//! per-node circuit breaking and retries on the calling side.
//!
//! This crate re-exports the three building blocks:
//!
//! - [`common`]: wire protocol, serializers, filters, discovery and the
//!   extension registry
//! - [`client`]: connection pool, load balancers, circuit breakers and the
//!   invocation orchestrator
//! - [`server`]: service provider, dispatcher and TCP listener
//!
//! # Example
//!
//! ```no_run
//! use relayrpc::client::{register_defaults, ClientConfig, RpcClient};
//! use relayrpc::common::config::RpcConfig;
//! use relayrpc::common::discovery::Discovery;
//! use relayrpc::common::extension::ExtensionRegistry;
//! use relayrpc::server::{RpcServer, ServerConfig, ServiceDefinition, ServiceProvider};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ExtensionRegistry::with_defaults();
//! register_defaults(&registry);
//! let config = RpcConfig::default();
//!
//! let provider = Arc::new(ServiceProvider::new());
//! provider.add_service_provider(
//!     ServiceDefinition::new("Greeter")
//!         .method1("hello", "string", |name: String| Ok::<_, String>(format!("Hello, {}", name))),
//! );
//!
//! let server = RpcServer::from_config(ServerConfig::new("127.0.0.1:0"), provider, &config).await?;
//! let discovery = registry.resolve::<dyn Discovery>(&config.discovery)?;
//! server.publish(discovery.as_ref()).await?;
//! let handle = server.spawn();
//!
//! let client = RpcClient::from_registry(&registry, &config, ClientConfig::default())?;
//! let greeting: String = client.call("Greeter", "hello", vec!["world".into()]).await?;
//! assert_eq!(greeting, "Hello, world");
//!
//! client.shutdown().await?;
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub use relayrpc_client as client;
pub use relayrpc_common as common;
pub use relayrpc_server as server;

pub use relayrpc_client::{ClientConfig, RpcClient, ServiceStub};
pub use relayrpc_common::{Call, NodeAddress, Param, Reply, Result, RpcError};
pub use relayrpc_server::{RpcServer, ServerConfig, ServiceDefinition, ServiceProvider};
