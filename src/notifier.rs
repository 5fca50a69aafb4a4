use chrono::Utc;
use futures_util::StreamExt;
use log::warn;
use mongodb::bson::doc;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::MongoDB;
use crate::models::{
    Chat, Contact, Message, Notification, NotificationKind, NotificationPriority, Project, Role,
    Task, Team, User,
};

/// Computes the peer recipient set for one domain event: order-preserving
/// de-duplication, absent relations skipped, the actor never included.
fn fan_out<'a, I>(candidates: I, actor: &str) -> Vec<String>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut recipients: Vec<String> = Vec::new();
    for candidate in candidates.into_iter().flatten() {
        if candidate.is_empty() || candidate == actor {
            continue;
        }
        if !recipients.iter().any(|r| r == candidate) {
            recipients.push(candidate.to_string());
        }
    }
    recipients
}

/// Manager first, then team members. A project without a manager simply
/// contributes no manager recipient.
fn project_event_recipients(project: &Project, actor: &str) -> Vec<String> {
    let candidates = std::iter::once(project.project_manager.as_deref())
        .chain(project.team_members.iter().map(|m| Some(m.as_str())));
    fan_out(candidates, actor)
}

/// Manager first, then assignees.
fn task_event_recipients(project: &Project, task: &Task, actor: &str) -> Vec<String> {
    let candidates = std::iter::once(project.project_manager.as_deref())
        .chain(task.assigned_to.iter().map(|a| Some(a.as_str())));
    fan_out(candidates, actor)
}

#[derive(Debug, Clone, Default)]
struct Related {
    project_id: Option<String>,
    task_id: Option<String>,
    contact_id: Option<String>,
    chat_id: Option<String>,
}

fn build(
    recipient: &str,
    sender: Option<&str>,
    kind: NotificationKind,
    title: &str,
    message: String,
    priority: NotificationPriority,
    related: &Related,
) -> Notification {
    Notification {
        id: Uuid::new_v4().to_string(),
        recipient: recipient.to_string(),
        sender: sender.map(|s| s.to_string()),
        kind,
        title: title.to_string(),
        message,
        project_id: related.project_id.clone(),
        task_id: related.task_id.clone(),
        contact_id: related.contact_id.clone(),
        chat_id: related.chat_id.clone(),
        is_read: false,
        priority,
        created_at: Utc::now(),
    }
}

/// Best-effort notification fan-out. Every method catches and logs its
/// own failures; callers spawn these onto the runtime and never observe
/// an error. At-most-once: no retry, no dead-letter.
#[derive(Clone)]
pub struct Notifier {
    db: Arc<MongoDB>,
}

impl Notifier {
    pub fn new(db: Arc<MongoDB>) -> Self {
        Notifier { db }
    }

    async fn deliver(&self, notifications: Vec<Notification>) {
        if notifications.is_empty() {
            return;
        }
        let collection = self.db.db.collection::<Notification>("notifications");
        if let Err(e) = collection.insert_many(&notifications).await {
            warn!("Notification delivery failed (dropped): {}", e);
        }
    }

    async fn admin_ids(&self) -> Vec<String> {
        let users = self.db.db.collection::<User>("users");
        let mut cursor = match users.find(doc! { "role": Role::Admin.as_str() }).await {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!("Admin lookup for notification failed: {}", e);
                return Vec::new();
            }
        };
        let mut ids = Vec::new();
        while let Some(result) = cursor.next().await {
            match result {
                Ok(user) => ids.push(user.id),
                Err(e) => {
                    warn!("Admin cursor error during notification: {}", e);
                    break;
                }
            }
        }
        ids
    }

    pub async fn user_registered(&self, user: &User) {
        let related = Related::default();
        let mut batch = vec![build(
            &user.id,
            None,
            NotificationKind::Welcome,
            "Welcome to TaskPilot",
            format!("Welcome aboard, {}! Your account is ready.", user.name),
            NotificationPriority::Low,
            &related,
        )];
        let admins = fan_out(self.admin_ids().await.iter().map(|a| Some(a.as_str())), &user.id);
        for admin in &admins {
            batch.push(build(
                admin,
                Some(&user.id),
                NotificationKind::UserRegistered,
                "New user registered",
                format!("{} ({}) just signed up.", user.name, user.email),
                NotificationPriority::Low,
                &related,
            ));
        }
        self.deliver(batch).await;
    }

    pub async fn password_changed(&self, user: &User) {
        self.deliver(vec![build(
            &user.id,
            None,
            NotificationKind::PasswordChanged,
            "Password changed",
            "Your password was changed. If this wasn't you, contact an administrator.".to_string(),
            NotificationPriority::High,
            &Related::default(),
        )])
        .await;
    }

    pub async fn project_created(&self, project: &Project, actor: &str) {
        let related = Related {
            project_id: Some(project.id.clone()),
            ..Default::default()
        };
        let mut batch = vec![build(
            actor,
            None,
            NotificationKind::ProjectCreated,
            "Project created",
            format!("You successfully created project \"{}\".", project.name),
            NotificationPriority::Medium,
            &related,
        )];
        for recipient in project_event_recipients(project, actor) {
            batch.push(build(
                &recipient,
                Some(actor),
                NotificationKind::ProjectCreated,
                "Added to a new project",
                format!("You were added to the new project \"{}\".", project.name),
                NotificationPriority::Medium,
                &related,
            ));
        }
        self.deliver(batch).await;
    }

    pub async fn project_updated(&self, project: &Project, actor: &str) {
        let related = Related {
            project_id: Some(project.id.clone()),
            ..Default::default()
        };
        let mut batch = vec![build(
            actor,
            None,
            NotificationKind::ProjectUpdated,
            "Project updated",
            format!("You updated project \"{}\".", project.name),
            NotificationPriority::Low,
            &related,
        )];
        for recipient in project_event_recipients(project, actor) {
            batch.push(build(
                &recipient,
                Some(actor),
                NotificationKind::ProjectUpdated,
                "Project updated",
                format!("Project \"{}\" was updated.", project.name),
                NotificationPriority::Low,
                &related,
            ));
        }
        self.deliver(batch).await;
    }

    /// Generic fan-out to the project's people, plus the escalation path:
    /// a deletion by a Manager additionally notifies every admin through
    /// the distinct PROJECT_DELETED_BY_MANAGER kind.
    pub async fn project_deleted(&self, project: &Project, actor: &str, actor_role: Role) {
        let related = Related {
            project_id: Some(project.id.clone()),
            ..Default::default()
        };
        let mut batch = vec![build(
            actor,
            None,
            NotificationKind::ProjectDeleted,
            "Project deleted",
            format!("You deleted project \"{}\".", project.name),
            NotificationPriority::Medium,
            &related,
        )];
        for recipient in project_event_recipients(project, actor) {
            batch.push(build(
                &recipient,
                Some(actor),
                NotificationKind::ProjectDeleted,
                "Project deleted",
                format!("Project \"{}\" was deleted.", project.name),
                NotificationPriority::Medium,
                &related,
            ));
        }
        if actor_role == Role::Manager {
            let admins = fan_out(self.admin_ids().await.iter().map(|a| Some(a.as_str())), actor);
            for admin in &admins {
                batch.push(build(
                    admin,
                    Some(actor),
                    NotificationKind::ProjectDeletedByManager,
                    "Project deleted by manager",
                    format!("A manager deleted project \"{}\".", project.name),
                    NotificationPriority::High,
                    &related,
                ));
            }
        }
        self.deliver(batch).await;
    }

    pub async fn project_comment_added(&self, project: &Project, actor: &str) {
        let related = Related {
            project_id: Some(project.id.clone()),
            ..Default::default()
        };
        let batch = project_event_recipients(project, actor)
            .iter()
            .map(|recipient| {
                build(
                    recipient,
                    Some(actor),
                    NotificationKind::ProjectCommentAdded,
                    "New project comment",
                    format!("New comment on project \"{}\".", project.name),
                    NotificationPriority::Low,
                    &related,
                )
            })
            .collect();
        self.deliver(batch).await;
    }

    pub async fn project_attachment_added(&self, project: &Project, actor: &str, file_name: &str) {
        let related = Related {
            project_id: Some(project.id.clone()),
            ..Default::default()
        };
        let batch = project_event_recipients(project, actor)
            .iter()
            .map(|recipient| {
                build(
                    recipient,
                    Some(actor),
                    NotificationKind::ProjectAttachmentAdded,
                    "New project attachment",
                    format!(
                        "\"{}\" was attached to project \"{}\".",
                        file_name, project.name
                    ),
                    NotificationPriority::Low,
                    &related,
                )
            })
            .collect();
        self.deliver(batch).await;
    }

    pub async fn task_created(&self, task: &Task, project: &Project, actor: &str) {
        let related = Related {
            project_id: Some(project.id.clone()),
            task_id: Some(task.id.clone()),
            ..Default::default()
        };
        let mut batch = vec![build(
            actor,
            None,
            NotificationKind::TaskCreated,
            "Task created",
            format!("You successfully created task \"{}\".", task.title),
            NotificationPriority::Medium,
            &related,
        )];
        for recipient in task_event_recipients(project, task, actor) {
            batch.push(build(
                &recipient,
                Some(actor),
                NotificationKind::TaskCreated,
                "New task",
                format!(
                    "Task \"{}\" was created in project \"{}\".",
                    task.title, project.name
                ),
                NotificationPriority::Medium,
                &related,
            ));
        }
        self.deliver(batch).await;
    }

    pub async fn task_updated(&self, task: &Task, project: &Project, actor: &str) {
        let related = Related {
            project_id: Some(project.id.clone()),
            task_id: Some(task.id.clone()),
            ..Default::default()
        };
        let batch = task_event_recipients(project, task, actor)
            .iter()
            .map(|recipient| {
                build(
                    recipient,
                    Some(actor),
                    NotificationKind::TaskUpdated,
                    "Task updated",
                    format!("Task \"{}\" was updated.", task.title),
                    NotificationPriority::Low,
                    &related,
                )
            })
            .collect();
        self.deliver(batch).await;
    }

    pub async fn task_status_changed(&self, task: &Task, project: &Project, actor: &str) {
        let related = Related {
            project_id: Some(project.id.clone()),
            task_id: Some(task.id.clone()),
            ..Default::default()
        };
        let status = serde_json::to_string(&task.status)
            .unwrap_or_default()
            .trim_matches('"')
            .to_string();
        let batch = task_event_recipients(project, task, actor)
            .iter()
            .map(|recipient| {
                build(
                    recipient,
                    Some(actor),
                    NotificationKind::TaskStatusChanged,
                    "Task status changed",
                    format!("Task \"{}\" moved to {}.", task.title, status),
                    NotificationPriority::Medium,
                    &related,
                )
            })
            .collect();
        self.deliver(batch).await;
    }

    /// Only the users newly added to `assigned_to`, not the whole task
    /// audience.
    pub async fn task_assigned(
        &self,
        task: &Task,
        project: &Project,
        actor: &str,
        new_assignees: &[String],
    ) {
        let related = Related {
            project_id: Some(project.id.clone()),
            task_id: Some(task.id.clone()),
            ..Default::default()
        };
        let recipients = fan_out(new_assignees.iter().map(|a| Some(a.as_str())), actor);
        let batch = recipients
            .iter()
            .map(|recipient| {
                build(
                    recipient,
                    Some(actor),
                    NotificationKind::TaskAssigned,
                    "Task assigned to you",
                    format!(
                        "You were assigned to task \"{}\" in project \"{}\".",
                        task.title, project.name
                    ),
                    NotificationPriority::High,
                    &related,
                )
            })
            .collect();
        self.deliver(batch).await;
    }

    pub async fn task_deleted(&self, task: &Task, project: &Project, actor: &str) {
        let related = Related {
            project_id: Some(project.id.clone()),
            ..Default::default()
        };
        let mut batch = vec![build(
            actor,
            None,
            NotificationKind::TaskDeleted,
            "Task deleted",
            format!("You deleted task \"{}\".", task.title),
            NotificationPriority::Low,
            &related,
        )];
        for recipient in task_event_recipients(project, task, actor) {
            batch.push(build(
                &recipient,
                Some(actor),
                NotificationKind::TaskDeleted,
                "Task deleted",
                format!("Task \"{}\" was deleted.", task.title),
                NotificationPriority::Low,
                &related,
            ));
        }
        self.deliver(batch).await;
    }

    pub async fn task_comment_added(&self, task: &Task, project: &Project, actor: &str) {
        let related = Related {
            project_id: Some(project.id.clone()),
            task_id: Some(task.id.clone()),
            ..Default::default()
        };
        let batch = project_event_recipients(project, actor)
            .iter()
            .map(|recipient| {
                build(
                    recipient,
                    Some(actor),
                    NotificationKind::TaskCommentAdded,
                    "New task comment",
                    format!("New comment on task \"{}\".", task.title),
                    NotificationPriority::Low,
                    &related,
                )
            })
            .collect();
        self.deliver(batch).await;
    }

    pub async fn task_attachment_added(
        &self,
        task: &Task,
        project: &Project,
        actor: &str,
        file_name: &str,
    ) {
        let related = Related {
            project_id: Some(project.id.clone()),
            task_id: Some(task.id.clone()),
            ..Default::default()
        };
        let batch = project_event_recipients(project, actor)
            .iter()
            .map(|recipient| {
                build(
                    recipient,
                    Some(actor),
                    NotificationKind::TaskAttachmentAdded,
                    "New task attachment",
                    format!("\"{}\" was attached to task \"{}\".", file_name, task.title),
                    NotificationPriority::Low,
                    &related,
                )
            })
            .collect();
        self.deliver(batch).await;
    }

    pub async fn team_created(&self, team: &Team, actor: &str) {
        let related = Related::default();
        let mut batch = vec![build(
            actor,
            None,
            NotificationKind::TeamCreated,
            "Team created",
            format!("You successfully created team \"{}\".", team.name),
            NotificationPriority::Medium,
            &related,
        )];
        for recipient in fan_out([Some(team.manager.as_str())], actor) {
            batch.push(build(
                &recipient,
                Some(actor),
                NotificationKind::TeamCreated,
                "You manage a new team",
                format!("You were made manager of team \"{}\".", team.name),
                NotificationPriority::High,
                &related,
            ));
        }
        self.deliver(batch).await;
    }

    pub async fn team_member_added(&self, team: &Team, member_id: &str, actor: &str) {
        let candidates = [Some(member_id), Some(team.manager.as_str())];
        let batch = fan_out(candidates, actor)
            .iter()
            .map(|recipient| {
                let message = if recipient == member_id {
                    format!("You were added to team \"{}\".", team.name)
                } else {
                    format!("A new member joined team \"{}\".", team.name)
                };
                build(
                    recipient,
                    Some(actor),
                    NotificationKind::TeamMemberAdded,
                    "Team membership change",
                    message,
                    NotificationPriority::Medium,
                    &Related::default(),
                )
            })
            .collect();
        self.deliver(batch).await;
    }

    pub async fn team_member_removed(&self, team: &Team, member_id: &str, actor: &str) {
        let candidates = [Some(member_id), Some(team.manager.as_str())];
        let batch = fan_out(candidates, actor)
            .iter()
            .map(|recipient| {
                let message = if recipient == member_id {
                    format!("You were removed from team \"{}\".", team.name)
                } else {
                    format!("A member was removed from team \"{}\".", team.name)
                };
                build(
                    recipient,
                    Some(actor),
                    NotificationKind::TeamMemberRemoved,
                    "Team membership change",
                    message,
                    NotificationPriority::Medium,
                    &Related::default(),
                )
            })
            .collect();
        self.deliver(batch).await;
    }

    /// One notification per admin; the submitter is anonymous traffic and
    /// gets nothing.
    pub async fn contact_submitted(&self, contact: &Contact) {
        let related = Related {
            contact_id: Some(contact.id.clone()),
            ..Default::default()
        };
        let batch = self
            .admin_ids()
            .await
            .iter()
            .map(|admin| {
                build(
                    admin,
                    None,
                    NotificationKind::ContactSubmitted,
                    "New contact submission",
                    format!("{} wrote: {}", contact.name, contact.subject),
                    NotificationPriority::Medium,
                    &related,
                )
            })
            .collect();
        self.deliver(batch).await;
    }

    /// Offline catch-up path; live delivery is the socket broadcast.
    pub async fn chat_message(&self, chat: &Chat, message: &Message) {
        let related = Related {
            chat_id: Some(chat.id.clone()),
            ..Default::default()
        };
        let recipients = fan_out(
            chat.participants.iter().map(|p| Some(p.as_str())),
            &message.sender,
        );
        let batch = recipients
            .iter()
            .map(|recipient| {
                build(
                    recipient,
                    Some(&message.sender),
                    NotificationKind::ChatMessage,
                    "New message",
                    "You have a new chat message.".to_string(),
                    NotificationPriority::Low,
                    &related,
                )
            })
            .collect();
        self.deliver(batch).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProjectStatus, TaskPriority, TaskStatus};

    fn project(manager: Option<&str>, members: &[&str]) -> Project {
        Project {
            id: "p1".into(),
            name: "Relaunch".into(),
            description: None,
            status: ProjectStatus::NotStarted,
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
            title: "Ship".into(),
            description: None,
            assigned_to: assigned.iter().map(|a| a.to_string()).collect(),
            status: TaskStatus::ToDo,
            priority: TaskPriority::High,
            due_date: None,
            comments: vec![],
            attachments: vec![],
            created_by: "mgr".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn fan_out_excludes_actor_and_dedupes() {
        let recipients = fan_out(
            [Some("mgr"), Some("alice"), Some("mgr"), Some("bob"), Some("actor")],
            "actor",
        );
        assert_eq!(recipients, vec!["mgr", "alice", "bob"]);
    }

    #[test]
    fn fan_out_skips_absent_and_empty() {
        let recipients = fan_out([None, Some(""), Some("alice")], "actor");
        assert_eq!(recipients, vec!["alice"]);
    }

    #[test]
    fn manager_who_is_also_member_gets_one_notification() {
        let p = project(Some("mgr"), &["mgr", "alice"]);
        let recipients = project_event_recipients(&p, "actor");
        assert_eq!(recipients, vec!["mgr", "alice"]);
    }

    #[test]
    fn missing_manager_is_silently_skipped() {
        let p = project(None, &["alice", "bob"]);
        let recipients = project_event_recipients(&p, "actor");
        assert_eq!(recipients, vec!["alice", "bob"]);
    }

    #[test]
    fn acting_manager_never_receives_peer_variant() {
        let p = project(Some("mgr"), &["mgr", "alice"]);
        let recipients = project_event_recipients(&p, "mgr");
        assert_eq!(recipients, vec!["alice"]);
    }

    #[test]
    fn task_recipients_are_manager_plus_assignees() {
        let p = project(Some("mgr"), &["mgr", "alice", "bob"]);
        let t = task(&["alice", "mgr"]);
        let recipients = task_event_recipients(&p, &t, "creator");
        // Manager deduped even though also assigned; bob is not assigned.
        assert_eq!(recipients, vec!["mgr", "alice"]);
    }

    #[test]
    fn task_creator_who_is_assignee_only_gets_confirmation_slot() {
        let p = project(Some("mgr"), &[]);
        let t = task(&["creator", "alice"]);
        let recipients = task_event_recipients(&p, &t, "creator");
        assert_eq!(recipients, vec!["mgr", "alice"]);
    }

    #[test]
    fn scenario_manager_creates_project_with_one_member() {
        // Manager M creates project P with team_members = [T1]: T1 gets
        // the peer notification, M is excluded from the peer set (the
        // confirmation document is built separately), admins get nothing.
        let p = Project {
            project_manager: Some("M".into()),
            team_members: vec!["T1".into()],
            ..project(None, &[])
        };
        let recipients = project_event_recipients(&p, "M");
        assert_eq!(recipients, vec!["T1"]);
    }
}
