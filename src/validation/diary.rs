use chrono::{DateTime, Utc};
use garde::Validate;

use crate::{
    error::{AppError, Result},
    models::diary::{DiaryPatch, MAX_LIST_LIMIT, NewDiary},
};

/// Lengths are checked by the garde attributes; this only rejects
/// whitespace-only text.
fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} cannot be empty", field)));
    }
    Ok(())
}

/// Validates a new diary.
pub fn validate_new_diary(entry: &NewDiary) -> Result<()> {
    entry.validate()?;
    require_text("Content", &entry.content)?;
    require_text("Mood", &entry.mood)
}

/// Validates a partial update. At least one field must be present.
pub fn validate_patch(patch: &DiaryPatch) -> Result<()> {
    if patch.is_empty() {
        return Err(AppError::Validation("Nothing to update".to_string()));
    }
    patch.validate()?;
    if let Some(content) = &patch.content {
        require_text("Content", content)?;
    }
    if let Some(mood) = &patch.mood {
        require_text("Mood", mood)?;
    }
    Ok(())
}

/// Validates listing bounds and paging.
pub fn validate_range(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    skip: i64,
    limit: i64,
) -> Result<()> {
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(AppError::Validation(
                "Range start must not be after range end".to_string(),
            ));
        }
    }
    if skip < 0 {
        return Err(AppError::Validation("skip must not be negative".to_string()));
    }
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(AppError::Validation(format!(
            "limit must be between 1 and {}",
            MAX_LIST_LIMIT
        )));
    }
    Ok(())
}
