use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

pub const DEFAULT_TITLE: &str = "New Conversation";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

impl std::str::FromStr for Sender {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Sender::User),
            "ai" => Ok(Sender::Ai),
            _ => Err(()),
        }
    }
}

/// Embedded in its conversation; has no identity of its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub sender: Sender,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub messages: Json<Vec<Message>>, // jsonb array, append order
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Conversation {
    pub fn new(user_id: Uuid, title: Option<&str>, now: OffsetDateTime) -> Self {
        let title = title.map(str::trim).filter(|t| !t.is_empty()).unwrap_or(DEFAULT_TITLE);
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.to_string(),
            messages: Json(Vec::new()),
            created_at: now,
            updated_at: now,
        }
    }
}
