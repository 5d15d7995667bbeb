use balcao::classify::Classifier;
use balcao::collab::{self, NullCollaborator};
use balcao::config::EngineConfig;
use balcao::orchestrator::Orchestrator;
use balcao::server;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // It's not fatal if .env doesn't exist, but good to know.
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("No .env file found or failed to load: {}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Balcão daemon starting...");

    let config = EngineConfig::from_env();

    // The rule table is data: an operator can swap the shipped one for a
    // JSON document without rebuilding.
    let classifier = match std::env::var("BALCAO_RULES_FILE") {
        Ok(path) => {
            info!("Loading classification rules from {path}");
            Classifier::from_json(&std::fs::read_to_string(&path)?)?
        }
        Err(_) => Classifier::builtin()?,
    };

    let orchestrator = Orchestrator::new(config.clone(), classifier, Arc::new(NullCollaborator));
    collab::spawn_persistence_bridge(orchestrator.bus(), Arc::new(NullCollaborator));
    orchestrator.spawn_timers();

    let app = server::router(orchestrator);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {addr}");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                info!("Server stopped with error: {}", e);
            }
        }
    }

    Ok(())
}
