use anyhow::{Context, Result};
use clap::Parser;
use manifold_auth::{OAuthFlow, TokenStore};
use manifold_core::config::parse_interval;
use manifold_core::GatewayConfig;
use manifold_gateway::MetaGateway;
use manifold_registry::Registry;
use rmcp::transport::stdio;
use rmcp::ServiceExt;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "manifold", version, about = "One MCP server that fans out to many")]
struct Args {
    /// Path to the TOML config file.
    #[arg(long, env = "MANIFOLD_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "manifold_registry=debug".
    #[arg(long, env = "MANIFOLD_LOG", default_value = "info")]
    log: String,

    /// Skip connecting peers at startup; they connect lazily or via
    /// manage_mcps.
    #[arg(long)]
    no_autoconnect: bool,
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("manifold")
        .join("config.toml")
}

fn default_cache_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("manifold")
        .join("tool_cache.json")
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    let args = Args::parse();

    // stdout carries the protocol; logs must go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&args.log)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = args.config.unwrap_or_else(default_config_path);
    let config = GatewayConfig::load_or_default(&config_path);
    tracing::info!(
        "starting manifold with {} configured peer(s)",
        config.peers.len()
    );

    let token_store = Arc::new(TokenStore::new(
        config
            .auth_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(TokenStore::default_path),
    ));
    let auth = Arc::new(OAuthFlow::new(token_store));

    let cache_path = config
        .cache_path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(default_cache_path);
    let registry = Arc::new(
        Registry::new()
            .with_credentials(auth.clone())
            .with_cache_path(cache_path),
    );

    // Cached catalogs make tools searchable before any peer is up.
    match registry.load_cache(&config.peers).await {
        Ok(n) if n > 0 => tracing::info!("hydrated {} cached catalog(s)", n),
        Ok(_) => {}
        Err(e) => tracing::warn!("tool cache unusable: {:#}", e),
    }

    if !args.no_autoconnect {
        let registry = registry.clone();
        let peers = config.peers.clone();
        tokio::spawn(async move {
            registry.connect_all(peers).await;
            if let Err(e) = registry.save_cache().await {
                tracing::debug!("could not write tool cache: {:#}", e);
            }
        });
    }

    let interval = parse_interval(&config.health_check_interval)
        .context("invalid health_check_interval in config")?;
    registry.start_background_health(interval);

    let gateway = MetaGateway::new(registry.clone(), auth, None);
    let service = gateway
        .serve(stdio())
        .await
        .context("failed to serve MCP over stdio")?;
    tracing::info!("gateway serving on stdio");

    tokio::select! {
        result = service.waiting() => {
            if let Err(e) = result {
                tracing::warn!("gateway service ended: {:?}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    if let Err(e) = registry.save_cache().await {
        tracing::debug!("could not write tool cache: {:#}", e);
    }
    registry.close().await;
    Ok(())
}
