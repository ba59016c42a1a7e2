use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Represents a user in the system.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct User {
    /// The unique identifier for the user.
    pub id: Uuid,
    /// The identity provider's subject identifier.
    #[serde(rename = "firebase_uid")]
    pub external_subject_id: String,
    /// The user's email address.
    pub email: String,
    /// The user's display name, as last reported by the provider.
    pub display_name: Option<String>,
    /// The timestamp when the user was created.
    pub created_at: DateTime<Utc>,
}

/// The identity an external provider vouches for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub subject_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// Input to the user directory's get-or-create.
#[derive(garde::Validate, Clone, Debug)]
pub struct NewUser {
    #[garde(length(min = 1, max = 128))]
    pub external_subject_id: String,
    #[garde(email)]
    pub email: String,
    #[garde(length(max = 255))]
    pub display_name: Option<String>,
}
