use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::{Row, error::SqlState};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::diary::{Diary, DiaryPatch, DiaryQuery, NewDiary},
    repositories::store::{DiaryStore, SAME_DAY_CONFLICT},
};

const DIARY_COLUMNS: &str = "id, owner_id, content, mood, photo_url, entry_moment, \
                             created_at, updated_at, llm_feedback";

/// Name of the per-day uniqueness constraint in `migrations/0001_init.sql`.
const OWNER_DAY_CONSTRAINT: &str = "diaries_owner_day_key";

/// A helper function to map a `tokio_postgres::Row` to a `Diary`.
fn row_to_diary(row: &Row) -> Result<Diary> {
    let column = |name: &str| AppError::MissingData(name.to_string());
    Ok(Diary {
        id: row.try_get("id").map_err(|_| column("id"))?,
        owner_id: row.try_get("owner_id").map_err(|_| column("owner_id"))?,
        content: row.try_get("content").map_err(|_| column("content"))?,
        mood: row.try_get("mood").map_err(|_| column("mood"))?,
        photo_url: row.try_get("photo_url").map_err(|_| column("photo_url"))?,
        entry_moment: row.try_get("entry_moment").map_err(|_| column("entry_moment"))?,
        created_at: row.try_get("created_at").map_err(|_| column("created_at"))?,
        updated_at: row.try_get("updated_at").map_err(|_| column("updated_at"))?,
        llm_feedback: row.try_get("llm_feedback").map_err(|_| column("llm_feedback"))?,
    })
}

fn map_insert_error(e: tokio_postgres::Error) -> AppError {
    let same_day = e.code() == Some(&SqlState::UNIQUE_VIOLATION)
        && e.as_db_error().and_then(|db| db.constraint()) == Some(OWNER_DAY_CONSTRAINT);
    if same_day {
        AppError::Conflict(SAME_DAY_CONFLICT.to_string())
    } else {
        AppError::Database(e)
    }
}

/// The Postgres-backed diary store.
#[derive(Clone)]
pub struct PgDiaryStore {
    pool: Pool,
}

impl PgDiaryStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DiaryStore for PgDiaryStore {
    /// Creates a new diary.
    ///
    /// The `entry_day` column is derived from the UTC entry moment so that the
    /// `(owner_id, entry_day)` constraint decides same-day races.
    async fn create(&self, owner: Uuid, entry: NewDiary) -> Result<Diary> {
        let client = self.pool.get().await?;
        let sql = format!(
            r#"
            INSERT INTO diaries (id, owner_id, content, mood, photo_url, entry_moment, entry_day)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {DIARY_COLUMNS}
            "#
        );
        let stmt = client.prepare_cached(&sql).await?;
        let entry_day = entry.entry_moment.date_naive();
        let row = client
            .query_one(
                &stmt,
                &[
                    &Uuid::new_v4(),
                    &owner,
                    &entry.content,
                    &entry.mood,
                    &entry.photo_url,
                    &entry.entry_moment,
                    &entry_day,
                ],
            )
            .await
            .map_err(map_insert_error)?;
        row_to_diary(&row)
    }

    async fn get(&self, owner: Uuid, id: Uuid) -> Result<Diary> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {DIARY_COLUMNS} FROM diaries WHERE id = $1 AND owner_id = $2");
        let stmt = client.prepare_cached(&sql).await?;
        let row = client
            .query_opt(&stmt, &[&id, &owner])
            .await?
            .ok_or(AppError::NotFound)?;
        row_to_diary(&row)
    }

    async fn get_by_day(&self, owner: Uuid, day: NaiveDate) -> Result<Diary> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {DIARY_COLUMNS} FROM diaries WHERE owner_id = $1 AND entry_day = $2"
        );
        let stmt = client.prepare_cached(&sql).await?;
        let row = client
            .query_opt(&stmt, &[&owner, &day])
            .await?
            .ok_or(AppError::NotFound)?;
        row_to_diary(&row)
    }

    /// Lists diaries, newest first.
    ///
    /// Missing bounds are passed as NULL so a single cached statement serves
    /// every combination of filters.
    async fn list(&self, owner: Uuid, query: &DiaryQuery) -> Result<Vec<Diary>> {
        let client = self.pool.get().await?;
        let sql = format!(
            r#"
            SELECT {DIARY_COLUMNS}
            FROM diaries
            WHERE owner_id = $1
              AND ($2::timestamptz IS NULL OR entry_moment >= $2)
              AND ($3::timestamptz IS NULL OR entry_moment <= $3)
            ORDER BY entry_moment DESC, id DESC
            OFFSET $4
            LIMIT $5
            "#
        );
        let stmt = client.prepare_cached(&sql).await?;
        let start: Option<DateTime<Utc>> = query.start;
        let end: Option<DateTime<Utc>> = query.end;
        let rows = client
            .query(&stmt, &[&owner, &start, &end, &query.skip, &query.limit])
            .await?;
        rows.iter().map(row_to_diary).collect()
    }

    /// Applies a partial update.
    ///
    /// `updated_at` is bumped by at least one microsecond so that two updates
    /// inside the same clock tick still order.
    async fn update(&self, owner: Uuid, id: Uuid, patch: DiaryPatch) -> Result<Diary> {
        let client = self.pool.get().await?;
        let sql = format!(
            r#"
            UPDATE diaries
            SET content = COALESCE($3, content),
                mood = COALESCE($4, mood),
                photo_url = CASE WHEN $5 THEN $6 ELSE photo_url END,
                updated_at = GREATEST(NOW(), updated_at + INTERVAL '1 microsecond')
            WHERE id = $1 AND owner_id = $2
            RETURNING {DIARY_COLUMNS}
            "#
        );
        let stmt = client.prepare_cached(&sql).await?;
        let touch_photo = patch.photo_url.is_some();
        let photo_url: Option<String> = patch.photo_url.flatten();
        let row = client
            .query_opt(
                &stmt,
                &[&id, &owner, &patch.content, &patch.mood, &touch_photo, &photo_url],
            )
            .await?
            .ok_or(AppError::NotFound)?;
        row_to_diary(&row)
    }

    async fn delete(&self, owner: Uuid, id: Uuid) -> Result<bool> {
        let client = self.pool.get().await?;
        let stmt = client
            .prepare_cached("DELETE FROM diaries WHERE id = $1 AND owner_id = $2")
            .await?;
        let removed = client.execute(&stmt, &[&id, &owner]).await?;
        Ok(removed > 0)
    }

    async fn set_feedback(&self, owner: Uuid, id: Uuid, feedback: &str) -> Result<Diary> {
        let client = self.pool.get().await?;
        let sql = format!(
            r#"
            UPDATE diaries
            SET llm_feedback = $3,
                updated_at = GREATEST(NOW(), updated_at + INTERVAL '1 microsecond')
            WHERE id = $1 AND owner_id = $2
            RETURNING {DIARY_COLUMNS}
            "#
        );
        let stmt = client.prepare_cached(&sql).await?;
        let row = client
            .query_opt(&stmt, &[&id, &owner, &feedback])
            .await?
            .ok_or(AppError::NotFound)?;
        row_to_diary(&row)
    }

    async fn ping(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }
}
