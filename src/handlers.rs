pub mod battle_royale;
pub mod websocket;

pub use battle_royale::{
    create_session, get_leaderboard, get_session, health, list_sessions, start_session, stats,
};
pub use websocket::ws_handler;

use crate::error::{AppError, SessionError};
use actix_web::{HttpRequest, error::JsonPayloadError, web};

/// リクエストボディの解析エラーも `{"error": ...}` で返す
fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::from(SessionError::InvalidInput(err.to_string())).into()
}

/// REST・WebSocketのルーティング
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/battle-royale")
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .route("", web::get().to(list_sessions))
            .route("/", web::get().to(list_sessions))
            .route("/stats", web::get().to(stats))
            .route("/create", web::post().to(create_session))
            .route("/session/{code}", web::get().to(get_session))
            .route("/session/{code}/leaderboard", web::get().to(get_leaderboard))
            .route("/session/{code}/start", web::post().to(start_session))
            .route("/health", web::get().to(health)),
    )
    .route("/health", web::get().to(health))
    .route("/ws", web::get().to(ws_handler));
}
