use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    handlers::json,
    middleware_layer::auth::CurrentUser,
    models::diary::{DEFAULT_LIST_LIMIT, DiaryPatch, DiaryQuery, MAX_LIST_LIMIT, NewDiary},
    services::diaries as diary_service,
    state::AppState,
};

/// The query parameters for listing diaries.
#[derive(Deserialize)]
pub struct ListDiariesQuery {
    #[serde(default, alias = "start_datetime")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, alias = "end_datetime")]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    DEFAULT_LIST_LIMIT
}

/// The query parameters for a closed range lookup.
///
/// Pages hold at most `MAX_LIST_LIMIT` diaries; callers page with `skip`.
#[derive(Deserialize)]
pub struct RangeQuery {
    #[serde(alias = "start_datetime")]
    pub start: DateTime<Utc>,
    #[serde(alias = "end_datetime")]
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "max_limit")]
    pub limit: i64,
}

fn max_limit() -> i64 {
    MAX_LIST_LIMIT
}

/// Creates a diary for the caller.
#[axum::debug_handler]
pub async fn create_diary(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<NewDiary>,
) -> Result<Response> {
    let diary = diary_service::create_diary(&state, user.id, req).await?;
    json::respond(StatusCode::CREATED, &diary)
}

/// Lists the caller's diaries, newest first.
#[axum::debug_handler]
pub async fn list_diaries(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(params): Query<ListDiariesQuery>,
) -> Result<Response> {
    let query = DiaryQuery {
        start: params.start,
        end: params.end,
        skip: params.skip,
        limit: params.limit,
    };
    let diaries = diary_service::list_diaries(&state, user.id, query).await?;
    json::respond(StatusCode::OK, &diaries)
}

/// Lists the caller's diaries written inside `[start, end]`, one page of
/// up to `MAX_LIST_LIMIT` at a time.
#[axum::debug_handler]
pub async fn diaries_in_range(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(params): Query<RangeQuery>,
) -> Result<Response> {
    let query = DiaryQuery {
        start: Some(params.start),
        end: Some(params.end),
        skip: params.skip,
        limit: params.limit,
    };
    let diaries = diary_service::diaries_in_range(&state, user.id, query).await?;
    json::respond(StatusCode::OK, &diaries)
}

/// Gets the diary written on a `YYYY-MM-DD` UTC day.
#[axum::debug_handler]
pub async fn diary_by_date(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(date): Path<String>,
) -> Result<Response> {
    let day = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| AppError::Validation("Date must be formatted as YYYY-MM-DD".to_string()))?;
    let diary = diary_service::get_diary_by_day(&state, user.id, day).await?;
    json::respond(StatusCode::OK, &diary)
}

#[axum::debug_handler]
pub async fn get_diary(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(diary_id): Path<Uuid>,
) -> Result<Response> {
    let diary = diary_service::get_diary(&state, user.id, diary_id).await?;
    json::respond(StatusCode::OK, &diary)
}

/// Applies a partial update to one of the caller's diaries.
#[axum::debug_handler]
pub async fn update_diary(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(diary_id): Path<Uuid>,
    Json(patch): Json<DiaryPatch>,
) -> Result<Response> {
    let diary = diary_service::update_diary(&state, user.id, diary_id, patch).await?;
    json::respond(StatusCode::OK, &diary)
}

#[axum::debug_handler]
pub async fn delete_diary(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(diary_id): Path<Uuid>,
) -> Result<Response> {
    diary_service::delete_diary(&state, user.id, diary_id).await?;
    json::message(StatusCode::OK, "Diary deleted successfully")
}
