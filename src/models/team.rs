use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A team of users led by one manager. The manager is always present in
/// `members`; membership writes go through handlers that keep it there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub manager: String,
    pub members: Vec<String>,
    /// The admin account that created the team.
    pub admin: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
