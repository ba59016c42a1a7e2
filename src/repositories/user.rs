use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::{Row, error::SqlState};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::user::{NewUser, User},
    repositories::store::UserDirectory,
};

/// A helper function to map a `tokio_postgres::Row` to a `User`.
fn row_to_user(row: &Row) -> Result<User> {
    Ok(User {
        id: row.try_get("id").map_err(|_| AppError::MissingData("id".to_string()))?,
        external_subject_id: row
            .try_get("external_subject_id")
            .map_err(|_| AppError::MissingData("external_subject_id".to_string()))?,
        email: row.try_get("email").map_err(|_| AppError::MissingData("email".to_string()))?,
        display_name: row
            .try_get("display_name")
            .map_err(|_| AppError::MissingData("display_name".to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|_| AppError::MissingData("created_at".to_string()))?,
    })
}

/// The Postgres-backed user directory.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: Pool,
}

impl PgUserDirectory {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    /// Inserts or refreshes the user for a provider subject.
    ///
    /// A single `INSERT .. ON CONFLICT` keeps concurrent first logins for the
    /// same subject down to one row. An email already owned by a different
    /// subject is reported as a `Conflict`.
    async fn get_or_create(&self, new_user: NewUser) -> Result<User> {
        let client = self.pool.get().await?;
        let stmt = client
            .prepare_cached(
                r#"
                INSERT INTO users (id, external_subject_id, email, display_name)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (external_subject_id) DO UPDATE
                SET display_name = COALESCE(EXCLUDED.display_name, users.display_name)
                RETURNING id, external_subject_id, email, display_name, created_at
                "#,
            )
            .await?;

        let row = client
            .query_one(
                &stmt,
                &[
                    &Uuid::new_v4(),
                    &new_user.external_subject_id,
                    &new_user.email,
                    &new_user.display_name,
                ],
            )
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    AppError::Conflict("Email is already linked to another account".to_string())
                } else {
                    AppError::Database(e)
                }
            })?;
        row_to_user(&row)
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let stmt = client
            .prepare_cached(
                r#"
                SELECT id, external_subject_id, email, display_name, created_at
                FROM users
                WHERE id = $1
                "#,
            )
            .await?;
        let row = client.query_opt(&stmt, &[&user_id]).await?;
        row.map(|r| row_to_user(&r)).transpose()
    }
}
