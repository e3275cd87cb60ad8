use anyhow::Result;
use greet_rpc::config::TransportConfig;
use greet_rpc::greet::{GreetService, GreetServiceConfig};
use greet_rpc::rpc::{RpcRouter, RpcRouterConfig};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let transport = TransportConfig::server_from_env()?;

    let mut router = RpcRouter::new(RpcRouterConfig::builder().build());
    GreetService::new(GreetServiceConfig::builder().build()).register(&mut router)?;

    let listener = TcpListener::bind(transport.addr).await?;
    info!(address = %transport.addr, tls = transport.tls, "Greet server listening");

    tokio::select! {
        result = router.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
