pub mod models;

use crate::db::models::{Location, NewLocation};
use crate::models::SessionSettings;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;
use tracing::{info, warn};

/// 初期投入ロケーション (名前, 緯度, 経度, 難易度, カテゴリ)
const SEED_LOCATIONS: &[(&str, f64, f64, &str, &str)] = &[
    ("Eiffel Tower, Paris", 48.8584, 2.2945, "easy", "landmark"),
    ("Statue of Liberty, New York", 40.6892, -74.0445, "easy", "landmark"),
    ("Sydney Opera House", -33.8568, 151.2153, "easy", "landmark"),
    ("Colosseum, Rome", 41.8902, 12.4922, "easy", "landmark"),
    ("Shibuya Crossing, Tokyo", 35.6595, 139.7005, "easy", "city"),
    ("Times Square, New York", 40.7580, -73.9855, "easy", "city"),
    ("Christ the Redeemer, Rio de Janeiro", -22.9519, -43.2105, "easy", "landmark"),
    ("Brandenburg Gate, Berlin", 52.5163, 13.3777, "medium", "landmark"),
    ("Marina Bay, Singapore", 1.2834, 103.8607, "medium", "city"),
    ("Old Town Square, Prague", 50.0875, 14.4213, "medium", "city"),
    ("Plaza de Mayo, Buenos Aires", -34.6083, -58.3712, "medium", "city"),
    ("Table Mountain, Cape Town", -33.9628, 18.4098, "medium", "nature"),
    ("Grand Canyon South Rim", 36.0544, -112.1401, "medium", "nature"),
    ("Matterhorn, Zermatt", 45.9763, 7.6586, "medium", "nature"),
    ("Fushimi Inari Taisha, Kyoto", 34.9671, 135.7727, "medium", "landmark"),
    ("Reykjavik Harbour", 64.1500, -21.9400, "hard", "city"),
    ("Ulaanbaatar, Sukhbaatar Square", 47.9189, 106.9176, "hard", "city"),
    ("Salar de Uyuni", -20.1338, -67.4891, "hard", "nature"),
    ("Lofoten, Reine", 67.9324, 13.0887, "hard", "nature"),
    ("Hobart Waterfront, Tasmania", -42.8821, 147.3272, "hard", "city"),
    ("Valparaiso Hills", -33.0458, -71.6197, "hard", "city"),
    ("Tsingy de Bemaraha", -18.7833, 44.7667, "hard", "nature"),
];

/// データベース接続プールを初期化
pub async fn init_db(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    info!("Initializing database: {}", database_url);

    // データベースファイルのディレクトリを作成
    if let Some(parent) = Path::new(database_url.trim_start_matches("sqlite://")).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(sqlx::Error::Io)?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&format!("{}?mode=rwc", database_url))
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("Database initialized successfully");

    Ok(pool)
}

/// テーブルが空の場合のみ初期ロケーションを登録
pub async fn seed_locations(pool: &SqlitePool) -> Result<usize, sqlx::Error> {
    let existing = Location::count(pool).await?;
    if existing > 0 {
        info!("{} locations already present, skipping seed", existing);
        return Ok(0);
    }

    let mut inserted = 0;
    for (name, latitude, longitude, difficulty, category) in SEED_LOCATIONS {
        NewLocation::new(name, *latitude, *longitude, difficulty, category)
            .insert(pool)
            .await?;
        inserted += 1;
    }

    info!("Seeded {} locations", inserted);
    Ok(inserted)
}

/// セッション設定に合わせて全ラウンド分のロケーションを選ぶ
///
/// 候補がラウンド数に満たない場合は先頭から繰り返して埋める。
/// 候補がひとつもなければ空のVecを返す。
pub async fn pick_round_locations(
    pool: &SqlitePool,
    settings: &SessionSettings,
) -> Result<Vec<Location>, sqlx::Error> {
    let candidates = Location::random_batch(
        pool,
        settings.difficulty.map(|d| d.as_str()),
        settings.category.as_deref(),
        settings.max_rounds,
    )
    .await?;

    if candidates.is_empty() {
        warn!(
            "No locations match difficulty={:?}, category={:?}",
            settings.difficulty, settings.category
        );
        return Ok(candidates);
    }

    Ok(candidates
        .iter()
        .cycle()
        .take(settings.max_rounds as usize)
        .cloned()
        .collect())
}
