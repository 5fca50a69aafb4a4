use mongodb::bson::doc;

use crate::auth::AuthUser;
use crate::db::MongoDB;
use crate::error::{ApiError, ApiResult};
use crate::models::{Project, Role, Task};

/// Stage one of the two-stage gate: the caller's role must be in the
/// allowed set. Resource ownership is checked separately so the two can
/// be composed per route.
pub fn require_role(user: &AuthUser, allowed: &[Role]) -> ApiResult<()> {
    if allowed.contains(&user.role) {
        Ok(())
    } else {
        Err(ApiError::forbidden("Insufficient role"))
    }
}

/// Membership predicate for a project. Admin always passes; a Manager
/// must be the project manager or a listed team member; a Team Member
/// must be a listed team member.
pub fn project_access_allowed(user_id: &str, role: Role, project: &Project) -> bool {
    match role {
        Role::Admin => true,
        Role::Manager => {
            project.project_manager.as_deref() == Some(user_id)
                || project.team_members.iter().any(|m| m == user_id)
        }
        Role::TeamMember => project.team_members.iter().any(|m| m == user_id),
    }
}

/// Membership predicate for a task. A Team Member must be assigned; a
/// Manager falls back to the parent project's rule.
pub fn task_access_allowed(user_id: &str, role: Role, task: &Task, project: &Project) -> bool {
    match role {
        Role::Admin => true,
        Role::TeamMember => task.assigned_to.iter().any(|a| a == user_id),
        Role::Manager => project_access_allowed(user_id, role, project),
    }
}

/// Stage two for project routes: fetch, then apply the membership
/// predicate. Missing documents surface as 404 before any 403.
pub async fn require_project_access(
    db: &MongoDB,
    user: &AuthUser,
    project_id: &str,
) -> ApiResult<Project> {
    let projects = db.db.collection::<Project>("projects");
    let project = match projects.find_one(doc! { "_id": project_id }).await {
        Ok(Some(project)) => project,
        Ok(None) => return Err(ApiError::not_found("Project not found")),
        Err(e) => return Err(ApiError::internal("fetching project", e)),
    };

    if project_access_allowed(&user.id, user.role, &project) {
        Ok(project)
    } else {
        Err(ApiError::forbidden("No access to this project"))
    }
}

/// Stage two for task routes. Returns the parent project as well since
/// most callers need it for notifications.
pub async fn require_task_access(
    db: &MongoDB,
    user: &AuthUser,
    task_id: &str,
) -> ApiResult<(Task, Project)> {
    let tasks = db.db.collection::<Task>("tasks");
    let task = match tasks.find_one(doc! { "_id": task_id }).await {
        Ok(Some(task)) => task,
        Ok(None) => return Err(ApiError::not_found("Task not found")),
        Err(e) => return Err(ApiError::internal("fetching task", e)),
    };

    let projects = db.db.collection::<Project>("projects");
    let project = match projects.find_one(doc! { "_id": &task.project_id }).await {
        Ok(Some(project)) => project,
        Ok(None) => return Err(ApiError::not_found("Project not found")),
        Err(e) => return Err(ApiError::internal("fetching parent project", e)),
    };

    if task_access_allowed(&user.id, user.role, &task, &project) {
        Ok((task, project))
    } else {
        Err(ApiError::forbidden("No access to this task"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProjectStatus, TaskPriority, TaskStatus};
    use chrono::Utc;

    fn project(manager: Option<&str>, members: &[&str]) -> Project {
        Project {
            id: "p1".into(),
            name: "Relaunch".into(),
            description: None,
            status: ProjectStatus::InProgress,
            deadline: None,
            team_members: members.iter().map(|m| m.to_string()).collect(),
            project_manager: manager.map(|m| m.to_string()),
            comments: vec![],
            attachments: vec![],
            created_by: "admin".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn task(assigned: &[&str]) -> Task {
        Task {
            id: "t1".into(),
            project_id: "p1".into(),
            title: "Ship it".into(),
            description: None,
            assigned_to: assigned.iter().map(|a| a.to_string()).collect(),
            status: TaskStatus::ToDo,
            priority: TaskPriority::Medium,
            due_date: None,
            comments: vec![],
            attachments: vec![],
            created_by: "mgr".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn admin_always_passes() {
        let p = project(None, &[]);
        assert!(project_access_allowed("anyone", Role::Admin, &p));
        assert!(task_access_allowed("anyone", Role::Admin, &task(&[]), &p));
    }

    #[test]
    fn manager_needs_manager_seat_or_membership() {
        let p = project(Some("mgr"), &["alice"]);
        assert!(project_access_allowed("mgr", Role::Manager, &p));
        assert!(project_access_allowed("alice", Role::Manager, &p));
        assert!(!project_access_allowed("other-mgr", Role::Manager, &p));
    }

    #[test]
    fn team_member_needs_membership() {
        let p = project(Some("mgr"), &["alice"]);
        assert!(project_access_allowed("alice", Role::TeamMember, &p));
        assert!(!project_access_allowed("bob", Role::TeamMember, &p));
        // Being project manager does not help a Team Member role.
        assert!(!project_access_allowed("mgr", Role::TeamMember, &p));
    }

    #[test]
    fn team_member_task_access_requires_assignment() {
        let p = project(Some("mgr"), &["alice", "bob"]);
        let t = task(&["alice"]);
        assert!(task_access_allowed("alice", Role::TeamMember, &t, &p));
        // In the project but not assigned: no task access.
        assert!(!task_access_allowed("bob", Role::TeamMember, &t, &p));
    }

    #[test]
    fn manager_task_access_follows_project_rule() {
        let p = project(Some("mgr"), &[]);
        let t = task(&[]);
        assert!(task_access_allowed("mgr", Role::Manager, &t, &p));
        assert!(!task_access_allowed("other", Role::Manager, &t, &p));
    }

    #[test]
    fn role_gate_rejects_outsiders() {
        let admin = AuthUser {
            id: "a".into(),
            role: Role::Admin,
        };
        let member = AuthUser {
            id: "m".into(),
            role: Role::TeamMember,
        };
        assert!(require_role(&admin, &[Role::Admin, Role::Manager]).is_ok());
        assert!(require_role(&member, &[Role::Admin, Role::Manager]).is_err());
    }
}
