//! Battleroom server binary.
//!
//! Run with: cargo run --bin battleroom-server
//! Bind address comes from `BATTLEROOM_ADDR` (default 0.0.0.0:8080).

use battleroom_server::{Server, ServerConfig, ServerError};
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = ServerConfig::default();
    if let Ok(addr) = std::env::var("BATTLEROOM_ADDR") {
        config.http_addr = addr;
    }

    println!("Starting battleroom server...");
    println!("  HTTP: http://{}", config.http_addr);
    println!("  WS:   ws://{}/api/play/{{room-id}}", config.http_addr);

    Server::new(config).run().await
}
