use std::sync::Arc;
use tokio::net::TcpListener;

use crate::ServerState;

/// Start the TCP listener and accept game client connections.
pub async fn run(state: Arc<ServerState>, bind_addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!("Listening on {}", bind_addr);

    loop {
        let (stream, addr) = listener.accept().await?;
        tracing::info!("Connection from {}", addr);

        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = super::session::handle(stream, addr.ip(), state).await {
                tracing::warn!("Connection from {} closed: {}", addr, e);
            }
        });
    }
}
