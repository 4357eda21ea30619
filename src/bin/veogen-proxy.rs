//! Local HTTP proxy in front of the video generator.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use veogen::proxy::{self, ProxyState};
use veogen::ConfigOverrides;

#[derive(Parser, Debug)]
#[command(name = "veogen-proxy", version, about = "Authenticated HTTP proxy for veogen")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "VIDEO_API_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "VIDEO_API_PORT", default_value_t = 8080)]
    port: u16,

    /// Secret clients must present as a bearer token or in X-API-Key.
    #[arg(long = "api-key", env = "VIDEO_API_KEY", hide_env_values = true)]
    api_key: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    veogen::init_tracing("veogen=info,tower_http=info");

    anyhow::ensure!(!args.api_key.trim().is_empty(), "VIDEO_API_KEY must not be empty");

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let state = Arc::new(ProxyState::new(args.api_key.clone(), ConfigOverrides::default()).await);
    tracing::info!(%addr, api_key = %proxy::masked(&args.api_key), "veogen proxy listening");

    proxy::serve(listener, state).await.context("server error")?;
    tracing::info!("shutdown complete");
    Ok(())
}
