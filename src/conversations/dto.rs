use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;

use super::repo_types::{Conversation, Sender};

#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RenameRequest {
    pub title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AppendMessageRequest {
    pub sender: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageView {
    pub sender: Sender,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationView {
    pub id: String,
    pub title: String,
    pub date: String,
    pub messages: Vec<MessageView>,
}

impl From<Conversation> for ConversationView {
    fn from(c: Conversation) -> Self {
        Self {
            id: c.id.to_string(),
            title: c.title,
            date: c.updated_at.format(&Rfc3339).unwrap_or_default(),
            messages: c
                .messages
                .0
                .into_iter()
                .map(|m| MessageView {
                    sender: m.sender,
                    text: m.text,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationListResponse {
    pub success: bool,
    pub conversations: Vec<ConversationView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub success: bool,
    pub conversation: ConversationView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}
