use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// 出題ロケーション
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub difficulty: String,
    pub category: String,
}

/// 新規ロケーション（挿入用）
#[derive(Debug, Clone)]
pub struct NewLocation {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub difficulty: String,
    pub category: String,
}

impl NewLocation {
    pub fn new(name: &str, latitude: f64, longitude: f64, difficulty: &str, category: &str) -> Self {
        Self {
            name: name.to_string(),
            latitude,
            longitude,
            difficulty: difficulty.to_string(),
            category: category.to_string(),
        }
    }

    /// ロケーションをデータベースに挿入し、採番されたIDを返す
    pub async fn insert(&self, pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO locations (name, latitude, longitude, difficulty, category, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.name)
        .bind(self.latitude)
        .bind(self.longitude)
        .bind(&self.difficulty)
        .bind(&self.category)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;

        Ok(result.last_insert_rowid())
    }
}

impl Location {
    /// IDでロケーションを取得
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Location>, sqlx::Error> {
        sqlx::query_as::<_, Location>(
            "SELECT id, name, latitude, longitude, difficulty, category FROM locations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// 条件に合うロケーションをランダムに最大`limit`件取得
    pub async fn random_batch(
        pool: &SqlitePool,
        difficulty: Option<&str>,
        category: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Location>, sqlx::Error> {
        sqlx::query_as::<_, Location>(
            r#"
            SELECT id, name, latitude, longitude, difficulty, category
            FROM locations
            WHERE (? IS NULL OR difficulty = ?)
              AND (? IS NULL OR category = ?)
            ORDER BY RANDOM()
            LIMIT ?
            "#,
        )
        .bind(difficulty)
        .bind(difficulty)
        .bind(category)
        .bind(category)
        .bind(i64::from(limit))
        .fetch_all(pool)
        .await
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM locations")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}
