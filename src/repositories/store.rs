use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{
        diary::{Diary, DiaryPatch, DiaryQuery, NewDiary},
        user::{NewUser, User},
    },
};

/// Message carried by the conflict raised for a second entry on one day.
pub const SAME_DAY_CONFLICT: &str = "A diary already exists for this date";

/// Maps external subject identifiers to internal users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Returns the user for `new_user.external_subject_id`, creating it on
    /// first sight. Atomic per subject: concurrent calls yield one record.
    /// A later call refreshes `display_name` when the provider reports one.
    async fn get_or_create(&self, new_user: NewUser) -> Result<User>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>>;
}

/// Per-owner diary persistence.
///
/// Every operation is scoped to `owner`; another owner's diary is reported
/// exactly like a missing one.
#[async_trait]
pub trait DiaryStore: Send + Sync {
    /// Fails with `Conflict` when `owner` already has an entry on the same
    /// UTC calendar day.
    async fn create(&self, owner: Uuid, entry: NewDiary) -> Result<Diary>;

    async fn get(&self, owner: Uuid, id: Uuid) -> Result<Diary>;

    async fn get_by_day(&self, owner: Uuid, day: NaiveDate) -> Result<Diary>;

    /// Newest `entry_moment` first.
    async fn list(&self, owner: Uuid, query: &DiaryQuery) -> Result<Vec<Diary>>;

    async fn update(&self, owner: Uuid, id: Uuid, patch: DiaryPatch) -> Result<Diary>;

    /// Returns whether a row was removed.
    async fn delete(&self, owner: Uuid, id: Uuid) -> Result<bool>;

    async fn set_feedback(&self, owner: Uuid, id: Uuid, feedback: &str) -> Result<Diary>;

    /// Cheap liveness check for the health endpoint.
    async fn ping(&self) -> Result<()>;
}
