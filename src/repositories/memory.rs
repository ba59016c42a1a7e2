use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{
        diary::{Diary, DiaryPatch, DiaryQuery, NewDiary},
        user::{NewUser, User},
    },
    repositories::store::{DiaryStore, SAME_DAY_CONFLICT, UserDirectory},
};

/// Process-local storage for `STORAGE_BACKEND=memory` and tests.
///
/// Uniqueness rules are checked and applied under a single write lock, which
/// gives the same outcome as the Postgres constraints.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, User>>,
    diaries: RwLock<HashMap<Uuid, Diary>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes a user and every diary it owns.
    pub async fn remove_user(&self, user_id: Uuid) -> bool {
        let removed = self.users.write().await.remove(&user_id).is_some();
        self.diaries
            .write()
            .await
            .retain(|_, diary| diary.owner_id != user_id);
        removed
    }
}

/// `now`, or one microsecond past `previous` if the clock has not moved on.
fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn get_or_create(&self, new_user: NewUser) -> Result<User> {
        let mut users = self.users.write().await;

        if let Some(user) = users
            .values_mut()
            .find(|u| u.external_subject_id == new_user.external_subject_id)
        {
            if new_user.display_name.is_some() {
                user.display_name = new_user.display_name;
            }
            return Ok(user.clone());
        }

        if users.values().any(|u| u.email == new_user.email) {
            return Err(AppError::Conflict(
                "Email is already linked to another account".to_string(),
            ));
        }

        let user = User {
            id: Uuid::new_v4(),
            external_subject_id: new_user.external_subject_id,
            email: new_user.email,
            display_name: new_user.display_name,
            created_at: Utc::now(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }
}

#[async_trait]
impl DiaryStore for MemoryStore {
    async fn create(&self, owner: Uuid, entry: NewDiary) -> Result<Diary> {
        let mut diaries = self.diaries.write().await;
        let day = entry.entry_moment.date_naive();

        if diaries
            .values()
            .any(|d| d.owner_id == owner && d.entry_day() == day)
        {
            return Err(AppError::Conflict(SAME_DAY_CONFLICT.to_string()));
        }

        let now = Utc::now();
        let diary = Diary {
            id: Uuid::new_v4(),
            owner_id: owner,
            content: entry.content,
            mood: entry.mood,
            photo_url: entry.photo_url,
            entry_moment: entry.entry_moment,
            created_at: now,
            updated_at: now,
            llm_feedback: None,
        };
        diaries.insert(diary.id, diary.clone());
        Ok(diary)
    }

    async fn get(&self, owner: Uuid, id: Uuid) -> Result<Diary> {
        self.diaries
            .read()
            .await
            .get(&id)
            .filter(|d| d.owner_id == owner)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    async fn get_by_day(&self, owner: Uuid, day: NaiveDate) -> Result<Diary> {
        self.diaries
            .read()
            .await
            .values()
            .find(|d| d.owner_id == owner && d.entry_day() == day)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    async fn list(&self, owner: Uuid, query: &DiaryQuery) -> Result<Vec<Diary>> {
        let diaries = self.diaries.read().await;
        let mut matching: Vec<Diary> = diaries
            .values()
            .filter(|d| d.owner_id == owner && query.contains(d.entry_moment))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.entry_moment
                .cmp(&a.entry_moment)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(matching
            .into_iter()
            .skip(query.skip.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect())
    }

    async fn update(&self, owner: Uuid, id: Uuid, patch: DiaryPatch) -> Result<Diary> {
        let mut diaries = self.diaries.write().await;
        let diary = diaries
            .get_mut(&id)
            .filter(|d| d.owner_id == owner)
            .ok_or(AppError::NotFound)?;
        patch.apply_to(diary);
        diary.updated_at = next_timestamp(diary.updated_at);
        Ok(diary.clone())
    }

    async fn delete(&self, owner: Uuid, id: Uuid) -> Result<bool> {
        let mut diaries = self.diaries.write().await;
        if diaries.get(&id).is_some_and(|d| d.owner_id == owner) {
            diaries.remove(&id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn set_feedback(&self, owner: Uuid, id: Uuid, feedback: &str) -> Result<Diary> {
        let mut diaries = self.diaries.write().await;
        let diary = diaries
            .get_mut(&id)
            .filter(|d| d.owner_id == owner)
            .ok_or(AppError::NotFound)?;
        diary.llm_feedback = Some(feedback.to_string());
        diary.updated_at = next_timestamp(diary.updated_at);
        Ok(diary.clone())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
