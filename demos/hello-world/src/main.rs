//! # RelayRPC hello-world
//!
//! Small command-line front end for trying RelayRPC out.
//!
//! ## Usage
//!
//! ```bash
//! # Server and client in one process
//! hello-world demo
//!
//! # Start a server exposing the Greeter and Calculator services
//! hello-world serve -b 127.0.0.1:9001 --token secret
//!
//! # Call a running server (arguments are a JSON array)
//! hello-world call -n 127.0.0.1:9001 Calculator add '[2, 3]' --types i64,i64 --token secret
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use argh::FromArgs;
use relayrpc_client::{register_defaults, ClientConfig, RpcClient};
use relayrpc_common::config::RpcConfig;
use relayrpc_common::discovery::{Discovery, StaticDiscovery};
use relayrpc_common::extension::ExtensionRegistry;
use relayrpc_common::filter::AccessLogFilter;
use relayrpc_common::Param;
use relayrpc_server::{server_filters, RpcServer, ServerConfig, ServiceDefinition, ServiceProvider};
use serde_json::Value;

#[derive(FromArgs)]
/// RelayRPC hello-world
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Demo(DemoArgs),
    Serve(ServeArgs),
    Call(CallArgs),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "demo")]
/// run a server and a client in this process
struct DemoArgs {
    /// serializer used by the client: json or msgpack
    #[argh(option, default = "\"msgpack\".into()")]
    serializer: String,

    /// shared-secret token for both sides
    #[argh(option)]
    token: Option<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// start a server
struct ServeArgs {
    /// address to bind to
    #[argh(option, short = 'b', default = "\"0.0.0.0:8080\".into()")]
    bind: String,

    /// shared-secret token callers must present
    #[argh(option)]
    token: Option<String>,

    /// per-interface calls per second (0 disables limiting)
    #[argh(option, default = "100.0")]
    qps: f64,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a method on running servers
struct CallArgs {
    /// server address; repeat for several servers
    #[argh(option, short = 'n')]
    node: Vec<String>,

    /// interface name
    #[argh(positional)]
    interface: String,

    /// method name
    #[argh(positional)]
    method: String,

    /// arguments as a JSON array
    #[argh(positional, default = "\"[]\".into()")]
    args: String,

    /// comma-separated declared parameter types, one per argument
    #[argh(option, default = "String::new()")]
    types: String,

    /// serializer: json or msgpack
    #[argh(option, default = "\"msgpack\".into()")]
    serializer: String,

    /// shared-secret token
    #[argh(option)]
    token: Option<String>,
}

fn services() -> Arc<ServiceProvider> {
    let provider = Arc::new(ServiceProvider::new());
    provider.add_service_provider(
        ServiceDefinition::new("Greeter")
            .method1("hello", "string", |name: String| {
                Ok::<_, String>(format!("Hello, {}!", name))
            }),
    );
    provider.add_service_provider(
        ServiceDefinition::new("Calculator")
            .method2("add", ["i64", "i64"], |a: i64, b: i64| Ok::<_, String>(a + b))
            .method2("divide", ["i64", "i64"], |a: i64, b: i64| {
                if b == 0 {
                    Err("Division by zero".to_string())
                } else {
                    Ok(a / b)
                }
            }),
    );
    provider
}

fn params(args: &str, types: &str) -> Result<Vec<Param>> {
    let values: Vec<Value> =
        serde_json::from_str(args).context("arguments must be a JSON array")?;
    let types: Vec<&str> = types.split(',').filter(|t| !t.is_empty()).collect();
    if types.len() != values.len() {
        anyhow::bail!(
            "got {} arguments but {} parameter types",
            values.len(),
            types.len()
        );
    }
    Ok(types
        .into_iter()
        .zip(values)
        .map(|(t, v)| Param::new(t, v))
        .collect())
}

async fn demo(args: DemoArgs) -> Result<()> {
    let registry = ExtensionRegistry::with_defaults();
    register_defaults(&registry);
    let rpc = RpcConfig {
        serializer: args.serializer,
        token: args.token,
        ..Default::default()
    };

    let discovery = registry.resolve::<dyn Discovery>(&rpc.discovery)?;
    let mut filters = server_filters(&rpc);
    filters.server_after = filters.server_after.with(AccessLogFilter);
    let server = RpcServer::bind(ServerConfig::new("127.0.0.1:0"), services(), filters).await?;
    server.publish(discovery.as_ref()).await?;
    let handle = server.spawn();

    let client = RpcClient::from_registry(&registry, &rpc, ClientConfig::default())?;

    let greeting: String = client.call("Greeter", "hello", vec!["world".into()]).await?;
    tracing::info!("Greeter.hello -> {}", greeting);

    let calculator = client.service("Calculator");
    let sum: i64 = calculator
        .call("add", vec![2i64.into(), 3i64.into()])
        .await?;
    tracing::info!("Calculator.add(2, 3) -> {}", sum);

    match calculator.invoke("divide", vec![1i64.into(), 0i64.into()]).await {
        Ok(value) => tracing::info!("Calculator.divide(1, 0) -> {}", value),
        Err(e) => tracing::info!("Calculator.divide(1, 0) failed as expected: {}", e),
    }

    client.shutdown().await?;
    handle.shutdown().await?;
    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let rpc = RpcConfig {
        token: args.token,
        rate_limit_qps: args.qps,
        ..Default::default()
    };
    let server = RpcServer::from_config(ServerConfig::new(args.bind), services(), &rpc).await?;
    tracing::info!(
        "Serving {:?} on {}",
        server.dispatcher().provider().service_names(),
        server.local_addr()
    );
    server.run().await?;
    Ok(())
}

async fn call(args: CallArgs) -> Result<()> {
    if args.node.is_empty() {
        anyhow::bail!("at least one --node is required");
    }
    let params = params(&args.args, &args.types)?;

    let registry = ExtensionRegistry::with_defaults();
    register_defaults(&registry);
    let discovery = StaticDiscovery::new()
        .with_nodes(&args.interface, args.node.iter().map(String::as_str));
    registry.register_instance::<dyn Discovery>("cli", Arc::new(discovery));
    let rpc = RpcConfig {
        serializer: args.serializer,
        discovery: "cli".to_string(),
        token: args.token,
        ..Default::default()
    };

    let client = RpcClient::from_registry(&registry, &rpc, ClientConfig::default())?;
    let result = client.invoke(&args.interface, &args.method, params).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    client.shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Keep `call` output clean for piping
    if !matches!(cli.command, Commands::Call(_)) {
        // Set default log level to INFO, but allow RUST_LOG env var to override
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Demo(args) => demo(args).await,
        Commands::Serve(args) => serve(args).await,
        Commands::Call(args) => call(args).await,
    }
}
