//! Warden API server binary.
//!
//! Loads the YAML config (if any), applies environment and CLI overrides,
//! selects the operating mode once and serves the HTTP API until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use warden_api::{AppState, config::ApiConfig};
use warden_core::config::WardenConfig;
use warden_core::services::Services;

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "warden_server", about = "Warden admission and authorization server")]
struct Args {
    /// Path to a YAML config file.
    #[arg(long, env = "WARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. `0.0.0.0:8888`.
    #[arg(long, env = "BIND_ADDR")]
    bind_addr: Option<String>,

    /// SQLite URL for local mode.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long)]
    max_connections: Option<u32>,
}

fn load_config(args: &Args) -> Result<WardenConfig, warden_core::config::ConfigError> {
    let mut config = match &args.config {
        Some(path) => WardenConfig::load(path)?,
        None => {
            let mut config = WardenConfig::default();
            config.apply_env();
            config
        }
    };
    if let Some(bind_addr) = &args.bind_addr {
        config.server.bind_addr = bind_addr.clone();
    }
    if let Some(database_url) = &args.database_url {
        config.server.database_url = database_url.clone();
    }
    if let Some(max_connections) = args.max_connections {
        config.server.max_connections = max_connections;
    }
    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,warden_api=debug,warden_core=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    info!(
        bind_addr = %config.server.bind_addr,
        delegated = config.delegated.enabled,
        "starting warden_server"
    );

    let services = Services::build(&config).await?;
    let cleanup = services.spawn_cleanup_tasks();

    let state = AppState {
        services,
        config: ApiConfig::from_config(&config),
    };
    let app = warden_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    for handle in cleanup {
        handle.abort();
    }
    info!("server stopped");
    Ok(())
}
