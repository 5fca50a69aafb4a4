use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Manager,
    #[serde(rename = "Team Member")]
    TeamMember,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Manager => "Manager",
            Role::TeamMember => "Team Member",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "Admin" => Some(Role::Admin),
            "Manager" => Some(Role::Manager),
            "Team Member" => Some(Role::TeamMember),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub team_id: Option<String>,
    /// Accounts with this flag cannot be role-modified.
    #[serde(default)]
    pub is_protected: bool,
    pub created_at: DateTime<Utc>,
}

/// User shape returned to clients. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicUser {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub team_id: Option<String>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        PublicUser {
            user_id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            team_id: user.team_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_wire_names() {
        for role in [Role::Admin, Role::Manager, Role::TeamMember] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("team member"), None);
    }

    #[test]
    fn team_member_serializes_with_space() {
        let json = serde_json::to_string(&Role::TeamMember).unwrap();
        assert_eq!(json, "\"Team Member\"");
    }

    #[test]
    fn public_user_drops_password() {
        let user = User {
            id: "u1".into(),
            name: "Dana".into(),
            email: "dana@example.com".into(),
            password: "$2b$12$hash".into(),
            role: Role::Manager,
            team_id: Some("t1".into()),
            is_protected: false,
            created_at: Utc::now(),
        };
        let public = PublicUser::from(&user);
        let json = serde_json::to_string(&public).unwrap();
        assert!(!json.contains("hash"));
        assert!(json.contains("dana@example.com"));
    }
}
