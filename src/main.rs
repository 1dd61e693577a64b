//! Waypoint server binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use waypoint::agent::{
    ConversationStore, FileConversationStore, InMemoryConversationStore, SessionRegistry,
};
use waypoint::config::AgentConfig;
use waypoint::server::{router, AppState};

#[derive(Debug, Parser)]
#[command(name = "waypoint", version, about = "Human-in-the-loop chat agent server")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory for session histories; in-memory when unset
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("waypoint=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AgentConfig::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.data_dir.is_some() {
        config.data_dir = cli.data_dir;
    }

    let provider = waypoint::provider::create_provider(&config)?;
    let store: Arc<dyn ConversationStore> = match &config.data_dir {
        Some(dir) => Arc::new(FileConversationStore::new(dir)),
        None => Arc::new(InMemoryConversationStore::new()),
    };
    let sessions = SessionRegistry::new(store, provider)
        .with_settings(config.generation_settings())
        .with_max_steps(config.max_steps)
        .with_system_prompt(config.system_prompt.clone());

    let app = router(AppState::new(sessions))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, model = %config.model, "waypoint listening");
    axum::serve(listener, app).await?;
    Ok(())
}
