pub mod chat;
pub mod contact;
pub mod message;
pub mod notification;
pub mod project;
pub mod task;
pub mod team;
pub mod user;

pub use chat::{Chat, ChatType, LastMessage};
pub use contact::{Contact, ContactStatus};
pub use message::{Message, ReadReceipt};
pub use notification::{Notification, NotificationKind, NotificationPriority};
pub use project::{Project, ProjectStatus};
pub use task::{Task, TaskPriority, TaskStatus};
pub use team::Team;
pub use user::{PublicUser, Role, User};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A comment embedded in a project or task document, addressed by its
/// own sub-id for point deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub comment_id: String,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Attachment metadata embedded in a project or task document. Only the
/// URL is stored here; the bytes live with the blob provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub attachment_id: String,
    pub file_name: String,
    pub file_url: String,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
}
