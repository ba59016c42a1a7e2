use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Default page size for diary listings.
pub const DEFAULT_LIST_LIMIT: i64 = 100;
/// Largest page size a caller may ask for.
pub const MAX_LIST_LIMIT: i64 = 1000;

/// A single journal entry.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Diary {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub content: String,
    /// Free-form mood tag, e.g. "happy" or "worried".
    pub mood: String,
    pub photo_url: Option<String>,
    /// When the entry was written, normalized to UTC.
    pub entry_moment: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Strictly increases on every mutation.
    pub updated_at: DateTime<Utc>,
    /// Written only by the feedback relay.
    pub llm_feedback: Option<String>,
}

impl Diary {
    /// The UTC calendar day this entry occupies.
    pub fn entry_day(&self) -> NaiveDate {
        self.entry_moment.date_naive()
    }
}

/// The fields a caller supplies to create a diary.
#[derive(Deserialize, garde::Validate, Clone, Debug)]
pub struct NewDiary {
    #[garde(length(min = 1, max = 20000))]
    pub content: String,
    #[garde(length(min = 1, max = 32))]
    pub mood: String,
    #[serde(default)]
    #[garde(length(max = 2048))]
    pub photo_url: Option<String>,
    /// Accepts any RFC 3339 offset; stored as UTC.
    #[serde(alias = "diary_date", alias = "diary_datetime")]
    #[garde(skip)]
    pub entry_moment: DateTime<Utc>,
}

/// A partial update. Absent fields are left untouched.
#[derive(Deserialize, garde::Validate, Clone, Debug, Default)]
pub struct DiaryPatch {
    #[garde(length(min = 1, max = 20000))]
    pub content: Option<String>,
    #[garde(length(min = 1, max = 32))]
    pub mood: Option<String>,
    /// `Some(None)` clears the photo, `None` leaves it as is.
    #[serde(default, deserialize_with = "present")]
    #[garde(length(max = 2048))]
    pub photo_url: Option<Option<String>>,
}

impl DiaryPatch {
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.mood.is_none() && self.photo_url.is_none()
    }

    /// Applies the patch to `diary` in place.
    pub fn apply_to(&self, diary: &mut Diary) {
        if let Some(content) = &self.content {
            diary.content = content.clone();
        }
        if let Some(mood) = &self.mood {
            diary.mood = mood.clone();
        }
        if let Some(photo_url) = &self.photo_url {
            diary.photo_url = photo_url.clone();
        }
    }
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Filters for a diary listing. Both bounds are inclusive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiaryQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub skip: i64,
    pub limit: i64,
}

impl Default for DiaryQuery {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            skip: 0,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl DiaryQuery {
    pub fn contains(&self, moment: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| moment >= start) && self.end.is_none_or(|end| moment <= end)
    }
}
