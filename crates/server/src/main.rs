use std::path::PathBuf;
use std::sync::Arc;

use cobalt_server::config::Config;
use cobalt_server::{ServerState, net};

#[tokio::main]
async fn main() {
    let config_path: PathBuf = std::env::args()
        .skip_while(|a| a != "--config")
        .nth(1)
        .unwrap_or_else(|| "cobalt.toml".into())
        .into();
    let bind_override = std::env::args().skip_while(|a| a != "--bind").nth(1);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    let mut config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load {}: {:#}", config_path.display(), e);
            return;
        }
    };
    if let Some(bind) = bind_override {
        config.bind = bind;
    }

    tracing::info!("Cobalt -- classic voxel protocol server");
    tracing::info!(
        "Generating {}x{}x{} world...",
        config.world.width,
        config.world.height,
        config.world.length
    );

    let bind_addr = config.bind.clone();
    let state = ServerState::new(config);
    for op in &state.config.operators {
        tracing::info!("Operator: {}", op);
    }

    tokio::select! {
        result = net::listener::run(Arc::clone(&state), &bind_addr) => {
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl+C received, shutting down...");
        }
    }

    tracing::info!("Goodbye.");
}
