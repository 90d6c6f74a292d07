//! TCP server for RelayRPC.
//!
//! # Architecture
//!
//! The server:
//! - Listens on a TCP socket for incoming connections
//! - Spawns a tokio task for each connection, reading frames until EOF, a
//!   protocol error or the read-idle timer fires
//! - Answers heartbeats inline on the connection task
//! - Spawns a task per request so slow handlers never block the connection,
//!   queueing each reply on the connection's writer
//!
//! # Example
//!
//! ```no_run
//! use relayrpc_server::{RpcServer, ServerConfig, ServiceDefinition, ServiceProvider};
//! use relayrpc_common::filter::FilterChains;
//! use std::sync::Arc;
//!
//! # async fn demo() -> relayrpc_common::Result<()> {
//! let provider = Arc::new(ServiceProvider::new());
//! provider.add_service_provider(
//!     ServiceDefinition::new("Greeter")
//!         .method1("hello", "string", |name: String| Ok::<_, String>(format!("Hello, {}", name))),
//! );
//!
//! let server = RpcServer::bind(ServerConfig::default(), provider, FilterChains::new()).await?;
//! server.run().await
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relayrpc_common::config::RpcConfig;
use relayrpc_common::discovery::Discovery;
use relayrpc_common::filter::{FilterChain, FilterChains, ServerRateLimitFilter, ServerTokenFilter};
use relayrpc_common::protocol::error::{Result, RpcError};
use relayrpc_common::protocol::{Frame, Message, NodeAddress};
use relayrpc_common::transport::{split_framed, FrameCodec, FrameSink, IdleConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::dispatcher::Dispatcher;
use crate::provider::ServiceProvider;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    ///
    /// Default: "0.0.0.0:8080"
    pub bind_addr: String,
    /// Address published to discovery. When unset, the bound address is
    /// used, with an unspecified IP replaced by 127.0.0.1.
    pub advertise_addr: Option<String>,
    /// Close a connection after this long without any inbound frame
    ///
    /// Default: 30 seconds
    pub read_idle: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            advertise_addr: None,
            read_idle: Some(Duration::from_secs(30)),
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            ..Default::default()
        }
    }

    pub fn with_advertise_addr(mut self, addr: impl Into<String>) -> Self {
        self.advertise_addr = Some(addr.into());
        self
    }

    pub fn with_read_idle(mut self, read_idle: Option<Duration>) -> Self {
        self.read_idle = read_idle;
        self
    }
}

/// Builds the server filter chains described by `config`: rate limiting when
/// `rate_limit_qps` is positive, then token checking when a token is set.
pub fn server_filters(config: &RpcConfig) -> FilterChains {
    let mut before = FilterChain::new();
    if config.rate_limit_qps > 0.0 {
        before = before.with(ServerRateLimitFilter::new(config.rate_limit_qps));
    }
    if let Some(token) = &config.token {
        before = before.with(ServerTokenFilter::new(token.clone()));
    }
    FilterChains {
        server_before: before,
        ..Default::default()
    }
}

/// A bound RelayRPC server.
pub struct RpcServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    advertised: NodeAddress,
    dispatcher: Dispatcher,
    codec: Arc<FrameCodec>,
    read_idle: Option<Duration>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl RpcServer {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if the address cannot be bound.
    pub async fn bind(
        config: ServerConfig,
        provider: Arc<ServiceProvider>,
        filters: FilterChains,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await.map_err(|e| {
            RpcError::Connection(format!("Failed to bind to {}: {}", config.bind_addr, e))
        })?;
        let local_addr = listener.local_addr().map_err(|e| {
            RpcError::Connection(format!("Failed to get local address: {}", e))
        })?;

        let advertised = match &config.advertise_addr {
            Some(addr) => NodeAddress::from(addr.as_str()),
            None => advertise_for(local_addr),
        };

        tracing::info!(addr = %local_addr, advertised = %advertised, "RelayRPC server listening");

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            listener,
            local_addr,
            advertised,
            dispatcher: Dispatcher::new(provider, filters),
            codec: Arc::new(FrameCodec::new()),
            read_idle: config.read_idle,
            shutdown: Arc::new(shutdown),
        })
    }

    /// Binds a server whose filters come from the runtime configuration.
    pub async fn from_config(
        config: ServerConfig,
        provider: Arc<ServiceProvider>,
        rpc_config: &RpcConfig,
    ) -> Result<Self> {
        Self::bind(config, provider, server_filters(rpc_config)).await
    }

    /// Replaces the codec, e.g. to add a custom serializer.
    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn advertised_addr(&self) -> &NodeAddress {
        &self.advertised
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Registers every provided service under the advertised address.
    pub async fn publish(&self, discovery: &dyn Discovery) -> Result<()> {
        for name in self.dispatcher.provider().service_names() {
            discovery.register(&name, &self.advertised).await?;
        }
        Ok(())
    }

    /// Accepts connections until the server is shut down through a
    /// [`ServerHandle`].
    pub async fn run(self) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = stopped(&mut shutdown) => break,
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
            }

            tracing::debug!(peer = %peer, "accepted connection");
            tokio::spawn(serve_connection(
                stream,
                peer,
                self.dispatcher.clone(),
                self.codec.clone(),
                self.read_idle,
                self.shutdown.subscribe(),
            ));
        }

        tracing::info!(addr = %self.local_addr, "RelayRPC server stopped");
        Ok(())
    }

    /// Runs the server on a background task.
    pub fn spawn(self) -> ServerHandle {
        let local_addr = self.local_addr;
        let advertised = self.advertised.clone();
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(self.run());

        ServerHandle {
            local_addr,
            advertised,
            shutdown,
            task,
        }
    }
}

fn advertise_for(local_addr: SocketAddr) -> NodeAddress {
    if local_addr.ip().is_unspecified() {
        NodeAddress::new(format!("127.0.0.1:{}", local_addr.port()))
    } else {
        NodeAddress::from(local_addr)
    }
}

/// Handle to a server started with [`RpcServer::spawn`].
///
/// Dropping the handle leaves the server running.
pub struct ServerHandle {
    local_addr: SocketAddr,
    advertised: NodeAddress,
    shutdown: Arc<watch::Sender<bool>>,
    task: JoinHandle<Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn advertised_addr(&self) -> &NodeAddress {
        &self.advertised
    }

    /// Stops accepting, closes every open connection and waits for the
    /// accept loop to finish.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.send_replace(true);
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(RpcError::Connection(format!("server task failed: {}", e))),
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    codec: Arc<FrameCodec>,
    read_idle: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) {
    let idle = IdleConfig {
        read_idle,
        ..Default::default()
    };
    let (mut reader, sink, _writer) = split_framed(stream, codec, idle);

    loop {
        let next = tokio::select! {
            next = reader.next_frame() => next,
            _ = stopped(&mut shutdown) => {
                tracing::debug!(peer = %peer, "server shutting down, closing connection");
                break;
            }
        };

        match next {
            Ok(Some(frame)) => match frame.message {
                Message::Request(_) => {
                    let dispatcher = dispatcher.clone();
                    let sink = sink.clone();
                    tokio::spawn(async move {
                        if let Some(reply) = dispatcher.dispatch(frame).await {
                            write_reply(&sink, peer, reply);
                        }
                    });
                }
                _ => {
                    if let Some(reply) = dispatcher.dispatch(frame).await {
                        write_reply(&sink, peer, reply);
                    }
                }
            },
            Ok(None) => {
                tracing::debug!(peer = %peer, "client closed connection");
                break;
            }
            Err(RpcError::Serialization(e)) => {
                tracing::warn!(peer = %peer, error = %e, "skipping undecodable frame");
            }
            Err(RpcError::Timeout(ms)) => {
                tracing::info!(peer = %peer, idle_ms = ms, "connection idle, closing");
                break;
            }
            Err(e @ RpcError::Protocol(_)) => {
                tracing::error!(peer = %peer, error = %e, "protocol violation, closing connection");
                break;
            }
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "connection closed");
                break;
            }
        }
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender also means stop
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn write_reply(sink: &FrameSink, peer: SocketAddr, frame: Frame) {
    if sink.send_nowait(frame).is_err() {
        tracing::debug!(peer = %peer, "connection closed before reply was written");
    }
}
