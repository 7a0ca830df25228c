//! User, profile and session models.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Account role. The known roles are fixed; anything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Player,
    Team,
    Coach,
    Custom(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Player => "player",
            Role::Team => "team",
            Role::Coach => "coach",
            Role::Custom(name) => name,
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "player" | "athlete" => Role::Player,
            "team" => Role::Team,
            "coach" => Role::Coach,
            _ => Role::Custom(value.trim().to_string()),
        }
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Role::from(value.to_string())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Profile row as stored by the backend (`profiles` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    #[serde(default)]
    pub sport: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub followers_count: u32,
    #[serde(default)]
    pub following_count: u32,
    #[serde(default)]
    pub posts_count: u32,
}

/// Editable profile fields carried by a [`Session`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ProfileFields {
    pub sport: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub cover_url: Option<String>,
    /// Informational only; never an access-control gate.
    pub is_verified: bool,
}

/// Denormalized counters shown on the profile header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ProfileStats {
    pub followers: u32,
    pub following: u32,
    pub posts: u32,
}

/// The authenticated actor's view of itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Session {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub role: Role,
    pub profile: ProfileFields,
    pub email_verified: bool,
    pub stats: ProfileStats,
}

impl Session {
    /// Build a session from the profile row returned after sign-in.
    pub fn from_profile(record: ProfileRecord, email_verified: bool) -> Self {
        Self {
            id: record.id,
            email: record.email,
            full_name: record.full_name,
            role: record.role,
            profile: ProfileFields {
                sport: non_blank(record.sport),
                location: non_blank(record.location),
                bio: non_blank(record.bio),
                avatar_url: non_blank(record.avatar_url),
                cover_url: non_blank(record.cover_url),
                is_verified: record.is_verified,
            },
            email_verified,
            stats: ProfileStats {
                followers: record.followers_count,
                following: record.following_count,
                posts: record.posts_count,
            },
        }
    }

    /// Shallow merge: only fields present in `update` are replaced, and a
    /// blank optional field clears it.
    pub fn apply(&mut self, update: &ProfileUpdate) {
        if let Some(full_name) = &update.full_name {
            self.full_name = full_name.clone();
        }
        if let Some(role) = &update.role {
            self.role = role.clone();
        }
        let profile = &mut self.profile;
        for (target, value) in [
            (&mut profile.sport, &update.sport),
            (&mut profile.location, &update.location),
            (&mut profile.bio, &update.bio),
            (&mut profile.avatar_url, &update.avatar_url),
            (&mut profile.cover_url, &update.cover_url),
        ] {
            if let Some(value) = value {
                *target = non_blank(Some(value.clone()));
            }
        }
    }
}

/// Profile columns may hold empty strings; treat those as unset.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Partial profile update. `None` means "leave unchanged".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "binding-generation", ts(type = "string | null"))]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sport: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self == &ProfileUpdate::default()
    }
}

/// Compact user card used in follower lists and search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub full_name: String,
    pub role: Role,
    #[serde(default)]
    pub sport: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
}

impl From<&ProfileRecord> for UserSummary {
    fn from(record: &ProfileRecord) -> Self {
        Self {
            id: record.id,
            full_name: record.full_name.clone(),
            role: record.role.clone(),
            sport: record.sport.clone(),
            avatar_url: record.avatar_url.clone(),
            is_verified: record.is_verified,
        }
    }
}

/// Identity returned by the auth provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthAccount {
    pub account_id: Uuid,
    pub email_verified: bool,
}

/// Metadata attached to a new account at signup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignupMetadata {
    pub full_name: String,
    pub role: Role,
}

/// Signup form input.
#[derive(Debug, Clone, Default)]
pub struct SignupInput {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: String,
}

/// Unread counters shown in the navigation bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UnreadCounters {
    pub messages: u32,
    pub notifications: u32,
}
