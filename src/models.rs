use crate::db::models::Location;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// セッション状態（一方向にのみ遷移する）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,  // 参加受付中
    Active,   // ラウンド進行中
    Finished, // 終了
}

// ロケーションの難易度
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

/// ラウンドごとの脱落ルール
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EliminationRule {
    /// 最低得点タイの全員が脱落
    #[default]
    Lowest,
    /// 得点の低い順にn人が脱落
    Bottom(usize),
}

// セッション設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    pub difficulty: Option<Difficulty>,
    pub category: Option<String>,
    pub max_rounds: u32,
    pub max_players: usize,
    pub round_time_secs: u64,
    pub elimination: EliminationRule,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            difficulty: None,
            category: None,
            max_rounds: 5,
            max_players: 10,
            round_time_secs: 60,
            elimination: EliminationRule::Lowest,
        }
    }
}

// プレイヤー情報
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub user_id: String,
    pub display_name: String,
    pub score: u32,                       // 累計スコア
    pub is_alive: bool,                   // 生存フラグ
    pub is_connected: bool,               // ソケット接続中フラグ
    pub joined_at: DateTime<Utc>,
    pub eliminated_in_round: Option<u32>, // 脱落したラウンド
    pub last_round_points: Option<u32>,   // 直前ラウンドの得点
}

impl Player {
    pub fn new(user_id: String, display_name: String) -> Self {
        Self {
            user_id,
            display_name,
            score: 0,
            is_alive: true,
            is_connected: false,
            joined_at: Utc::now(),
            eliminated_in_round: None,
            last_round_points: None,
        }
    }

    pub fn to_ref(&self) -> PlayerRef {
        PlayerRef {
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

// プレイヤー参照（イベント・勝者表示用）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerRef {
    pub user_id: String,
    pub display_name: String,
}

// ラウンドの推測
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guess {
    pub latitude: f64,
    pub longitude: f64,
    pub distance_km: f64,
    pub points: u32,
    pub submitted_at: DateTime<Utc>,
}

// 進行中ラウンド
#[derive(Debug, Clone)]
pub struct RoundState {
    pub number: u32,
    pub location: Location,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub guesses: HashMap<String, Guess>,
}

// バトルロイヤルセッション
#[derive(Debug, Clone)]
pub struct Session {
    pub code: String,
    pub creator_id: String,
    pub status: SessionStatus,
    pub players: Vec<Player>, // 参加順
    pub current_round: u32,
    pub max_rounds: u32,
    pub settings: SessionSettings,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_active_at: Option<DateTime<Utc>>, // 最後の接続者が切断した時刻
    pub winner: Option<String>,
    pub locations: Vec<Location>, // 開始時に全ラウンド分を確定
    pub round: Option<RoundState>,
}

// 公開用セッション情報（未出題のロケーションは含めない）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub code: String,
    pub creator_id: String,
    pub status: SessionStatus,
    pub players: Vec<Player>,
    pub current_round: u32,
    pub max_rounds: u32,
    pub settings: SessionSettings,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub winner: Option<PlayerRef>,
    pub current_location: Option<Location>,
    pub round_deadline: Option<DateTime<Utc>>,
}

// 一覧表示用
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub code: String,
    pub creator_id: String,
    pub player_count: usize,
    pub max_players: usize,
    pub max_rounds: u32,
    pub difficulty: Option<Difficulty>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub display_name: String,
    pub score: u32,
    pub is_alive: bool,
    pub eliminated_in_round: Option<u32>,
}

// ラウンド結果（プレイヤーごと）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundResult {
    pub user_id: String,
    pub display_name: String,
    pub guess: Option<Guess>,
    pub points: u32,
    pub total_score: u32,
    pub eliminated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RegistryStats {
    pub total_sessions: usize,
    pub waiting_sessions: usize,
    pub active_sessions: usize,
    pub finished_sessions: usize,
    pub total_players: usize,
    pub connected_players: usize,
    pub sessions_created: u64,
}

// WebSocketメッセージ種別
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum WsMessage {
    // クライアント→サーバー
    JoinSession {
        code: String,
        display_name: String,
    },
    SubmitGuess {
        latitude: f64,
        longitude: f64,
    },
    LeaveSession,

    // サーバー→クライアント
    SessionJoined {
        session: SessionView,
    },
    PlayerJoined {
        player: Player,
        player_count: usize,
    },
    PlayerLeft {
        user_id: String,
        display_name: String,
        player_count: usize,
    },
    SessionStarted {
        session: SessionView,
    },
    RoundStarted {
        round: u32,
        max_rounds: u32,
        location: Location,
        deadline: DateTime<Utc>,
    },
    GuessSubmitted {
        user_id: String,
        display_name: String,
        round: u32,
    },
    GuessConfirmed {
        round: u32,
        distance_km: f64,
        points: u32,
        total_score: u32,
    },
    RoundEnded {
        round: u32,
        location: Location,
        results: Vec<RoundResult>,
    },
    PlayerEliminated {
        user_id: String,
        display_name: String,
        round: u32,
    },
    SessionEnded {
        winner: Option<PlayerRef>,
        leaderboard: Vec<LeaderboardEntry>,
    },

    // エラー
    Error {
        message: String,
    },
}

// REST リクエスト/レスポンス
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub settings: SessionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub code: String,
    pub session: SessionView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardResponse {
    pub code: String,
    pub status: SessionStatus,
    pub current_round: u32,
    pub leaderboard: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}
