use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user: String,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub chat_id: String,
    pub sender: String,
    pub content: String,
    /// One entry per user; the mark-as-read path guards with `$ne` so a
    /// repeated call never duplicates an entry.
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}
