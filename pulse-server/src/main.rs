//! Pulse sync server — serves the shared proposal state over WebSocket.
//!
//! Configuration comes from the environment (`HOST`, `PORT`, `WS_PATH`,
//! `OUTBOUND_CAPACITY`); verbosity from `RUST_LOG`.

use log::{error, info};
use std::process::ExitCode;

use pulse_sync::config::ServerConfig;
use pulse_sync::server::SyncServer;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("Starting Pulse sync server on {}{}", config.bind_addr(), config.ws_path);
    let server = SyncServer::new(config);

    let listener = match tokio::net::TcpListener::bind(server.config().bind_addr()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {e}", server.config().bind_addr());
            return ExitCode::FAILURE;
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
    };

    match server.serve_with_shutdown(listener, shutdown).await {
        Ok(()) => {
            info!("Pulse sync server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Server error: {e}");
            ExitCode::FAILURE
        }
    }
}
