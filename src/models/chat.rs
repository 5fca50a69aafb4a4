use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatType {
    #[serde(rename = "direct")]
    Direct,
    #[serde(rename = "team")]
    Team,
    #[serde(rename = "admin-manager")]
    AdminManager,
}

/// Denormalized snapshot of the newest message, kept on the chat so the
/// conversation list renders without a second query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastMessage {
    pub content: String,
    pub sender: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    #[serde(rename = "_id")]
    pub id: String,
    pub participants: Vec<String>,
    pub chat_type: ChatType,
    pub team_id: Option<String>,
    pub last_message: Option<LastMessage>,
    /// Soft delete: inactive chats are hidden, never removed.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&ChatType::AdminManager).unwrap(),
            "\"admin-manager\""
        );
        let parsed: ChatType = serde_json::from_str("\"direct\"").unwrap();
        assert_eq!(parsed, ChatType::Direct);
    }
}
