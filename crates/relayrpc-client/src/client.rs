use std::sync::Arc;

use relayrpc_common::discovery::Discovery;
use relayrpc_common::extension::ExtensionRegistry;
use relayrpc_common::config::RpcConfig;
use relayrpc_common::filter::{ClientTokenFilter, FilterChains};
use relayrpc_common::protocol::error::Result;
use relayrpc_common::protocol::{Call, Param};
use relayrpc_common::serialization::Serializer;
use relayrpc_common::transport::FrameCodec;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakers};
use crate::invoker::{Invoker, RetryConfig};
use crate::load_balancer::{ConsistentHashBalancer, LoadBalancer};
use crate::pool::{ConnectionPool, PoolConfig};

/// Client-side tuning.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub pool: PoolConfig,
    pub retry: RetryConfig,
    pub breaker: CircuitBreakerConfig,
}

/// RelayRPC client.
///
/// Ties discovery, load balancing, circuit breaking and the connection pool
/// together. Cloning is cheap; clones share connections and breaker state.
///
/// # Example
///
/// ```no_run
/// use relayrpc_client::{ClientConfig, RpcClient};
/// use relayrpc_common::discovery::StaticDiscovery;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let discovery = Arc::new(StaticDiscovery::new().with_nodes("Calculator", ["127.0.0.1:8080"]));
/// let client = RpcClient::new(discovery, ClientConfig::default());
///
/// let sum: i64 = client
///     .call("Calculator", "add", vec![2i64.into(), 3i64.into()])
///     .await?;
/// assert_eq!(sum, 5);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RpcClient {
    invoker: Invoker,
    pool: Arc<ConnectionPool>,
    discovery: Arc<dyn Discovery>,
}

impl RpcClient {
    /// Creates a client with consistent-hash balancing and no filters.
    pub fn new(discovery: Arc<dyn Discovery>, config: ClientConfig) -> Self {
        Self::with_parts(
            discovery,
            Arc::new(ConsistentHashBalancer::new()),
            FilterChains::new(),
            Arc::new(FrameCodec::new()),
            config,
        )
    }

    pub fn with_parts(
        discovery: Arc<dyn Discovery>,
        balancer: Arc<dyn LoadBalancer>,
        filters: FilterChains,
        codec: Arc<FrameCodec>,
        config: ClientConfig,
    ) -> Self {
        let pool = Arc::new(ConnectionPool::with_codec(config.pool, codec));
        let breakers = Arc::new(CircuitBreakers::new(config.breaker));
        let invoker = Invoker::new(
            discovery.clone(),
            balancer,
            breakers,
            pool.clone(),
            filters,
            config.retry,
        );

        Self {
            invoker,
            pool,
            discovery,
        }
    }

    /// Builds a client from named extensions.
    ///
    /// The serializer, load balancer and discovery backend named in `rpc` are
    /// resolved from `registry`; see [`register_defaults`](crate::register_defaults).
    /// A configured token enables the client token filter.
    pub fn from_registry(
        registry: &ExtensionRegistry,
        rpc: &RpcConfig,
        mut config: ClientConfig,
    ) -> Result<Self> {
        let serializer = registry.resolve::<dyn Serializer>(&rpc.serializer)?;
        let balancer = registry.resolve::<dyn LoadBalancer>(&rpc.load_balancer)?;
        let discovery = registry.resolve::<dyn Discovery>(&rpc.discovery)?;

        config.pool.serializer_code = serializer.code();
        let codec = Arc::new(FrameCodec::new().with_serializer(serializer));

        let mut filters = FilterChains::new();
        if let Some(token) = &rpc.token {
            filters.client_before = filters.client_before.with(ClientTokenFilter::new(token.clone()));
        }

        tracing::info!(
            serializer = %rpc.serializer,
            load_balancer = %rpc.load_balancer,
            discovery = %rpc.discovery,
            "client configured"
        );

        Ok(Self::with_parts(discovery, balancer, filters, codec, config))
    }

    /// Invokes `interface.method(params)` and returns the raw result.
    pub async fn invoke(
        &self,
        interface: &str,
        method: &str,
        params: Vec<Param>,
    ) -> Result<Value> {
        self.invoker.invoke(Call::new(interface, method, params)).await
    }

    /// Invokes `interface.method(params)` and deserializes the result.
    pub async fn call<R: DeserializeOwned>(
        &self,
        interface: &str,
        method: &str,
        params: Vec<Param>,
    ) -> Result<R> {
        let value = self.invoke(interface, method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Returns a handle bound to one interface.
    pub fn service(&self, interface: impl Into<String>) -> ServiceStub {
        ServiceStub {
            client: self.clone(),
            interface: interface.into(),
        }
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        self.invoker.breakers()
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Closes all connections and releases the discovery backend.
    pub async fn shutdown(&self) -> Result<()> {
        self.pool.close_all();
        self.discovery.destroy().await
    }
}

/// Client handle for one interface.
///
/// ```no_run
/// # use relayrpc_client::RpcClient;
/// # async fn demo(client: RpcClient) -> relayrpc_common::Result<()> {
/// let users = client.service("UserService");
/// let name: String = users.call("nameOf", vec![42i64.into()]).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ServiceStub {
    client: RpcClient,
    interface: String,
}

impl ServiceStub {
    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub async fn invoke(&self, method: &str, params: Vec<Param>) -> Result<Value> {
        self.client.invoke(&self.interface, method, params).await
    }

    pub async fn call<R: DeserializeOwned>(&self, method: &str, params: Vec<Param>) -> Result<R> {
        self.client.call(&self.interface, method, params).await
    }
}
