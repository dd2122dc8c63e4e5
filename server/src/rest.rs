//! REST API handlers for actix-web.

use crate::room::RoomManager;
use actix_web::HttpResponse;
use battleroom_protocol::RoomId;
use serde::Serialize;
use std::sync::Arc;

/// Room identifier handed out by the matchmaking stub.
pub const DEFAULT_ROOM: &str = "room-test";

/// Shared application state for HTTP handlers.
pub struct AppState {
    pub room_manager: Arc<RoomManager>,
}

#[derive(Serialize)]
pub struct PlayResponse {
    #[serde(rename = "roomId")]
    pub room_id: RoomId,
}

/// GET / - liveness probe.
pub async fn index() -> HttpResponse {
    HttpResponse::Ok().body("battleroom server")
}

/// GET /api/play - room assignment.
//TODO: matching - every request is pointed at the same fixed room for now.
pub async fn play() -> HttpResponse {
    HttpResponse::Ok().json(PlayResponse {
        room_id: RoomId::new(DEFAULT_ROOM),
    })
}
