//! Direct messaging models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Two-party conversation (`conversations` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub participant_one: Uuid,
    pub participant_two: Uuid,
    #[serde(default)]
    pub last_message: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Messages from the other participant not yet read by the caller.
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    /// The participant who is not `me`.
    pub fn other_participant(&self, me: Uuid) -> Uuid {
        if self.participant_one == me {
            self.participant_two
        } else {
            self.participant_one
        }
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        self.participant_one == user_id || self.participant_two == user_id
    }
}

/// Message row (`messages` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
