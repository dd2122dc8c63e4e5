//! Battleroom server: two-player timed battle sessions over WebSockets.
//!
//! Clients are routed to a named room; the room's session actor waits for
//! two participants, then runs a synchronized drift-corrected timer that
//! every connected client observes until the battle ends.

pub mod engine;
pub mod error;
pub mod rest;
pub mod room;
pub mod store;
pub mod ws;

use crate::rest::AppState;
use crate::room::{RoomManager, RoomSettings};
use crate::store::{MemoryStore, RoomStore};
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use std::sync::Arc;

pub use error::ServerError;

/// Configuration for the server.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP server.
    pub http_addr: String,
    /// Per-room settings.
    pub room: RoomSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            room: RoomSettings::default(),
        }
    }
}

/// The battleroom server: routing layer plus room registry.
pub struct Server {
    config: ServerConfig,
    store: Arc<dyn RoomStore>,
}

impl Server {
    /// Server with the default in-memory room store.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    /// Server backed by a caller-provided durable store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn RoomStore>) -> Self {
        Self { config, store }
    }

    /// Run the HTTP server until shutdown.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Server starting on HTTP {}", self.config.http_addr);

        let room_manager = Arc::new(RoomManager::new(self.store, self.config.room.clone()));
        let app_state = web::Data::new(AppState { room_manager });

        let http_addr = self.config.http_addr.clone();
        HttpServer::new(move || {
            let cors = Cors::permissive(); // Allow all origins for dev
            App::new()
                .wrap(cors)
                .app_data(app_state.clone())
                .route("/", web::get().to(rest::index))
                .route("/api/play", web::get().to(rest::play))
                .route("/api/play/{room_id}", web::get().to(ws::battle_ws))
        })
        .bind(&http_addr)?
        .run()
        .await?;

        Ok(())
    }
}
