use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of domain events that produce notifications. The wire names
/// are part of the client contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Welcome,
    UserRegistered,
    PasswordChanged,
    ProjectCreated,
    ProjectUpdated,
    ProjectDeleted,
    ProjectDeletedByManager,
    ProjectCommentAdded,
    ProjectAttachmentAdded,
    TaskCreated,
    TaskUpdated,
    TaskStatusChanged,
    TaskAssigned,
    TaskDeleted,
    TaskCommentAdded,
    TaskAttachmentAdded,
    TeamCreated,
    TeamMemberAdded,
    TeamMemberRemoved,
    ContactSubmitted,
    ChatMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
}

/// One document per (event, recipient). Written only by the notifier;
/// after insertion only `is_read` ever changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: String,
    pub recipient: String,
    pub sender: Option<String>,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub contact_id: Option<String>,
    pub chat_id: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    pub priority: NotificationPriority,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_use_screaming_snake_wire_names() {
        assert_eq!(
            serde_json::to_string(&NotificationKind::ProjectDeletedByManager).unwrap(),
            "\"PROJECT_DELETED_BY_MANAGER\""
        );
        assert_eq!(
            serde_json::to_string(&NotificationKind::TaskCommentAdded).unwrap(),
            "\"TASK_COMMENT_ADDED\""
        );
    }

    #[test]
    fn priority_is_lowercase() {
        assert_eq!(
            serde_json::to_string(&NotificationPriority::High).unwrap(),
            "\"high\""
        );
    }
}
