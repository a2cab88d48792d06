use crate::db;
use crate::error::{AppError, SessionError};
use crate::game::manager::{BattleRoyaleManager, StartSession};
use crate::game::registry::{Sessions, lock_registry};
use crate::models::{
    CreateSessionRequest, CreateSessionResponse, HealthResponse, LeaderboardResponse,
    StartSessionRequest,
};
use actix::Addr;
use actix_web::{HttpResponse, web};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

/// GET /api/battle-royale - 参加可能なセッション一覧
pub async fn list_sessions(sessions: web::Data<Sessions>) -> HttpResponse {
    let joinable = lock_registry(&sessions).list_joinable();
    HttpResponse::Ok().json(joinable)
}

/// GET /api/battle-royale/stats
pub async fn stats(sessions: web::Data<Sessions>) -> HttpResponse {
    let stats = lock_registry(&sessions).stats();
    HttpResponse::Ok().json(stats)
}

/// POST /api/battle-royale/create - セッション作成
pub async fn create_session(
    sessions: web::Data<Sessions>,
    req: web::Json<CreateSessionRequest>,
) -> Result<HttpResponse, AppError> {
    let req = req.into_inner();
    info!("POST /create: user_id={}", req.user_id);

    let mut registry = lock_registry(&sessions);
    let session = registry.create_session(&req.user_id, &req.display_name, req.settings, Utc::now())?;

    Ok(HttpResponse::Ok().json(CreateSessionResponse {
        code: session.code.clone(),
        session: session.view(),
    }))
}

/// GET /api/battle-royale/session/{code}
pub async fn get_session(
    sessions: web::Data<Sessions>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let registry = lock_registry(&sessions);
    let session = registry.get_session(&path)?;
    Ok(HttpResponse::Ok().json(session.view()))
}

/// GET /api/battle-royale/session/{code}/leaderboard
pub async fn get_leaderboard(
    sessions: web::Data<Sessions>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let registry = lock_registry(&sessions);
    let session = registry.get_session(&path)?;
    Ok(HttpResponse::Ok().json(LeaderboardResponse {
        code: session.code.clone(),
        status: session.status,
        current_round: session.current_round,
        leaderboard: session.leaderboard(),
    }))
}

/// POST /api/battle-royale/session/{code}/start - 作成者のみ開始可能
pub async fn start_session(
    sessions: web::Data<Sessions>,
    pool: web::Data<SqlitePool>,
    manager: web::Data<Addr<BattleRoyaleManager>>,
    path: web::Path<String>,
    req: web::Json<StartSessionRequest>,
) -> Result<HttpResponse, AppError> {
    let code = path.into_inner();
    info!("POST /session/{}/start: user_id={}", code, req.user_id);

    // ロケーション取得前に権限と状態を確認する（開始時に再検証される）
    let settings = lock_registry(&sessions).ensure_can_start(&code, &req.user_id)?;

    let locations = db::pick_round_locations(&pool, &settings).await?;
    if locations.is_empty() {
        return Err(SessionError::NoLocations.into());
    }

    let view = manager
        .send(StartSession {
            code,
            requester_id: req.into_inner().user_id,
            locations,
        })
        .await
        .map_err(|e| AppError::Internal(format!("Battle royale manager unavailable: {}", e)))??;

    Ok(HttpResponse::Ok().json(view))
}

/// GET /health
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
    })
}
