use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Attachment, Comment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectStatus {
    #[serde(rename = "Not Started")]
    NotStarted,
    Pending,
    #[serde(rename = "In Progress")]
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub deadline: Option<DateTime<Utc>>,
    pub team_members: Vec<String>,
    /// Nullable on purpose: a project can sit without a manager, in which
    /// case manager-directed notifications are skipped.
    pub project_manager: Option<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_uses_display_names_on_the_wire() {
        assert_eq!(
            serde_json::to_string(&ProjectStatus::NotStarted).unwrap(),
            "\"Not Started\""
        );
        assert_eq!(
            serde_json::to_string(&ProjectStatus::InProgress).unwrap(),
            "\"In Progress\""
        );
        let parsed: ProjectStatus = serde_json::from_str("\"Completed\"").unwrap();
        assert_eq!(parsed, ProjectStatus::Completed);
    }
}
