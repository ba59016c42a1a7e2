use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::diary::{Diary, DiaryPatch, DiaryQuery, NewDiary},
    state::AppState,
    validation::diary::{validate_new_diary, validate_patch, validate_range},
};

/// Creates a diary for `owner`.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `owner` - The ID of the user who owns the diary.
/// * `entry` - The diary fields.
///
/// # Returns
///
/// A `Result` containing the created `Diary`, or `Conflict` when the owner
/// already wrote on that UTC day.
pub async fn create_diary(state: &AppState, owner: Uuid, entry: NewDiary) -> Result<Diary> {
    validate_new_diary(&entry)?;
    let diary = state.diaries.create(owner, entry).await?;
    tracing::info!("📝 Diary {} created for {}", diary.id, diary.entry_day());
    Ok(diary)
}

/// Lists diaries for `owner`, newest first.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `owner` - The ID of the user.
/// * `query` - Inclusive UTC bounds and paging.
///
/// # Returns
///
/// A `Result` containing the matching diaries.
pub async fn list_diaries(state: &AppState, owner: Uuid, query: DiaryQuery) -> Result<Vec<Diary>> {
    validate_range(query.start, query.end, query.skip, query.limit)?;
    state.diaries.list(owner, &query).await
}

/// Lists one page of diaries in a closed range.
///
/// Unlike `list_diaries`, both bounds are required. A page never holds more
/// than `MAX_LIST_LIMIT` diaries, so longer ranges must be paged with `skip`.
pub async fn diaries_in_range(state: &AppState, owner: Uuid, query: DiaryQuery) -> Result<Vec<Diary>> {
    if query.start.is_none() || query.end.is_none() {
        return Err(AppError::Validation("Both start and end are required".to_string()));
    }
    list_diaries(state, owner, query).await
}

pub async fn get_diary(state: &AppState, owner: Uuid, id: Uuid) -> Result<Diary> {
    state.diaries.get(owner, id).await
}

/// Gets the diary written on a UTC calendar day.
pub async fn get_diary_by_day(state: &AppState, owner: Uuid, day: NaiveDate) -> Result<Diary> {
    state.diaries.get_by_day(owner, day).await
}

/// Applies a partial update.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `owner` - The ID of the user.
/// * `id` - The ID of the diary.
/// * `patch` - The fields to change.
///
/// # Returns
///
/// A `Result` containing the updated `Diary`.
pub async fn update_diary(
    state: &AppState,
    owner: Uuid,
    id: Uuid,
    patch: DiaryPatch,
) -> Result<Diary> {
    validate_patch(&patch)?;
    state.diaries.update(owner, id, patch).await
}

/// Deletes a diary. A diary that does not exist, or is not owned by `owner`,
/// is `NotFound`.
pub async fn delete_diary(state: &AppState, owner: Uuid, id: Uuid) -> Result<()> {
    if state.diaries.delete(owner, id).await? {
        tracing::info!("🗑️ Diary {} deleted", id);
        Ok(())
    } else {
        Err(AppError::NotFound)
    }
}
