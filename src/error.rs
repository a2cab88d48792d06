use crate::models::SessionStatus;
use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// セッション操作のドメインエラー
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Session {0} not found")]
    NotFound(String),

    #[error("Player {0} is not part of this session")]
    NotAPlayer(String),

    #[error("Only the session creator can start the session")]
    NotCreator,

    #[error("Session is {0:?}, expected waiting")]
    NotWaiting(SessionStatus),

    #[error("Session has already finished")]
    AlreadyFinished,

    #[error("Session is full ({0} players)")]
    SessionFull(usize),

    #[error("Player is already in session {0}")]
    AlreadyInSession(String),

    #[error("Eliminated players cannot submit guesses")]
    PlayerEliminated,

    #[error("No round is currently open")]
    RoundNotOpen,

    #[error("Guess already submitted for round {0}")]
    AlreadyGuessed(u32),

    #[error("Invalid coordinates: latitude={latitude}, longitude={longitude}")]
    InvalidGuess { latitude: f64, longitude: f64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No locations available for the selected settings")]
    NoLocations,

    #[error("Could not allocate a unique session code")]
    CodeSpaceExhausted,
}

impl SessionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SessionError::NotFound(_) | SessionError::NotAPlayer(_) => StatusCode::NOT_FOUND,
            SessionError::NotCreator => StatusCode::FORBIDDEN,
            SessionError::NotWaiting(_)
            | SessionError::AlreadyFinished
            | SessionError::SessionFull(_)
            | SessionError::AlreadyInSession(_)
            | SessionError::PlayerEliminated
            | SessionError::RoundNotOpen
            | SessionError::AlreadyGuessed(_) => StatusCode::CONFLICT,
            SessionError::InvalidGuess { .. }
            | SessionError::InvalidInput(_)
            | SessionError::NoLocations => StatusCode::BAD_REQUEST,
            SessionError::CodeSpaceExhausted => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// 設定読み込みエラー
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// アプリケーション全体のエラー（HTTPレスポンスに変換される）
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Session(e) => e.status_code(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = if status.is_server_error() {
            error!("Internal error: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        HttpResponse::build(status).json(json!({ "error": message }))
    }
}
