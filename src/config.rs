use crate::error::ConfigError;
use std::{env, fmt::Display, str::FromStr, time::Duration};
use tracing::{info, warn};

/// サーバー設定（環境変数から読み込む）
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub timing: GameTiming,
}

/// ゲーム進行・セッション掃除のタイミング
#[derive(Debug, Clone, Copy)]
pub struct GameTiming {
    /// ラウンド終了から次ラウンド開始までの待ち時間
    pub round_intermission: Duration,
    /// 接続者のいないセッションを破棄するまでの時間
    pub idle_session_ttl: Duration,
    /// 終了済みセッションを保持する時間
    pub finished_retention: Duration,
    /// 掃除タスクの実行間隔
    pub cleanup_interval: Duration,
}

impl Default for GameTiming {
    fn default() -> Self {
        Self {
            round_intermission: Duration::from_secs(5),
            idle_session_ttl: Duration::from_secs(300),
            finished_retention: Duration::from_secs(600),
            cleanup_interval: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// `.env` があれば読み込んだうえで環境変数から設定を構築
    pub fn load() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            info!("Loaded environment from .env");
        }

        Ok(Self {
            host: try_load("HOST", "0.0.0.0")?,
            port: try_load("PORT", "8080")?,
            database_url: try_load("DATABASE_URL", "sqlite://data/battle_royale.db")?,
            timing: GameTiming {
                round_intermission: Duration::from_secs(try_load("ROUND_INTERMISSION_SECS", "5")?),
                idle_session_ttl: Duration::from_secs(try_load("SESSION_IDLE_TTL_SECS", "300")?),
                finished_retention: Duration::from_secs(try_load(
                    "FINISHED_SESSION_RETENTION_SECS",
                    "600",
                )?),
                cleanup_interval: Duration::from_secs(try_load("CLEANUP_INTERVAL_SECS", "5")?),
            },
        })
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError::InvalidValue {
            key: key.to_string(),
            reason: e.to_string(),
        }
    })
}
