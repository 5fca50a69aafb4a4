use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use log::info;
use mongodb::bson::{doc, to_bson};
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::current_user;
use crate::error::{ApiError, ApiResult};
use crate::guard::{require_project_access, require_role, require_task_access};
use crate::models::{Attachment, Comment, Role, Task, TaskPriority, TaskStatus};

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub project_id: String,
    pub title: String,
    pub description: Option<String>,
    pub assigned_to: Option<Vec<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub assigned_to: Option<Vec<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct AddCommentRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct AddAttachmentRequest {
    pub file_name: String,
    pub file_url: String,
}

/// A Team Member's update may move the status and nothing else. Any other
/// populated field makes the whole request forbidden.
fn touches_only_status(payload: &UpdateTaskRequest) -> bool {
    payload.title.is_none()
        && payload.description.is_none()
        && payload.assigned_to.is_none()
        && payload.priority.is_none()
        && payload.due_date.is_none()
}

/// POST /api/tasks  (Admin, Manager with project access)
pub async fn create_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateTaskRequest>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    require_role(&user, &[Role::Admin, Role::Manager])?;
    let project = require_project_access(&data.mongodb, &user, &payload.project_id).await?;

    if payload.title.trim().is_empty() {
        return Err(ApiError::validation("Task title is required"));
    }

    let now = Utc::now();
    let new_task = Task {
        id: Uuid::new_v4().to_string(),
        project_id: project.id.clone(),
        title: payload.title.trim().to_string(),
        description: payload.description.clone(),
        assigned_to: payload.assigned_to.clone().unwrap_or_default(),
        status: payload.status.unwrap_or(TaskStatus::ToDo),
        priority: payload.priority.unwrap_or(TaskPriority::Medium),
        due_date: payload.due_date,
        comments: vec![],
        attachments: vec![],
        created_by: user.id.clone(),
        created_at: now,
        updated_at: now,
    };

    let tasks = data.mongodb.db.collection::<Task>("tasks");
    tasks
        .insert_one(&new_task)
        .await
        .map_err(|e| ApiError::internal("creating task", e))?;
    info!("Task created: {} in project {}", new_task.id, project.id);

    let notifier = data.notifier.clone();
    let task_copy = new_task.clone();
    let project_copy = project.clone();
    let actor = user.id.clone();
    actix_web::rt::spawn(async move {
        notifier.task_created(&task_copy, &project_copy, &actor).await
    });

    Ok(HttpResponse::Created().json(new_task))
}

/// GET /api/tasks/project/{project_id}
/// Role-scoped: a Team Member only sees tasks they are assigned to.
pub async fn list_tasks_by_project(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let project = require_project_access(&data.mongodb, &user, &path).await?;

    let mut filter = doc! { "project_id": &project.id };
    if user.role == Role::TeamMember {
        filter.insert("assigned_to", &user.id);
    }

    let tasks = data.mongodb.db.collection::<Task>("tasks");
    let mut cursor = tasks
        .find(filter)
        .sort(doc! { "created_at": -1 })
        .await
        .map_err(|e| ApiError::internal("fetching tasks", e))?;

    let mut result = Vec::new();
    while let Some(task) = cursor.next().await {
        match task {
            Ok(task) => result.push(task),
            Err(e) => return Err(ApiError::internal("iterating tasks", e)),
        }
    }
    Ok(HttpResponse::Ok().json(result))
}

/// GET /api/tasks/{id}
pub async fn get_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let (task, _project) = require_task_access(&data.mongodb, &user, &path).await?;
    Ok(HttpResponse::Ok().json(task))
}

/// PUT /api/tasks/{id}
pub async fn update_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateTaskRequest>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let (task, project) = require_task_access(&data.mongodb, &user, &path).await?;

    if user.role == Role::TeamMember && !touches_only_status(&payload) {
        return Err(ApiError::forbidden("Team members may only update the task status"));
    }

    let mut set_doc = doc! {};
    if let Some(title) = &payload.title {
        if title.trim().is_empty() {
            return Err(ApiError::validation("Task title cannot be empty"));
        }
        set_doc.insert("title", title.trim());
    }
    if let Some(description) = &payload.description {
        set_doc.insert("description", description.clone());
    }
    if let Some(assigned_to) = &payload.assigned_to {
        set_doc.insert("assigned_to", assigned_to.clone());
    }
    if let Some(status) = &payload.status {
        set_doc.insert(
            "status",
            to_bson(status).map_err(|e| ApiError::internal("serializing status", e))?,
        );
    }
    if let Some(priority) = &payload.priority {
        set_doc.insert(
            "priority",
            to_bson(priority).map_err(|e| ApiError::internal("serializing priority", e))?,
        );
    }
    if let Some(due_date) = &payload.due_date {
        set_doc.insert("due_date", due_date.to_rfc3339());
    }
    if set_doc.is_empty() {
        return Err(ApiError::validation("No fields to update"));
    }
    set_doc.insert("updated_at", Utc::now().to_rfc3339());

    let tasks = data.mongodb.db.collection::<Task>("tasks");
    tasks
        .update_one(doc! { "_id": &task.id }, doc! { "$set": set_doc })
        .await
        .map_err(|e| ApiError::internal("updating task", e))?;

    let updated = match tasks.find_one(doc! { "_id": &task.id }).await {
        Ok(Some(updated)) => updated,
        Ok(None) => return Err(ApiError::not_found("Task not found")),
        Err(e) => return Err(ApiError::internal("re-fetching task", e)),
    };

    let status_changed = payload.status.map_or(false, |s| s != task.status);
    let new_assignees: Vec<String> = payload
        .assigned_to
        .as_ref()
        .map(|assignees| {
            assignees
                .iter()
                .filter(|a| !task.assigned_to.contains(a))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    let notifier = data.notifier.clone();
    let task_copy = updated.clone();
    let project_copy = project.clone();
    let actor = user.id.clone();
    actix_web::rt::spawn(async move {
        if status_changed {
            notifier
                .task_status_changed(&task_copy, &project_copy, &actor)
                .await;
        } else {
            notifier.task_updated(&task_copy, &project_copy, &actor).await;
        }
        if !new_assignees.is_empty() {
            notifier
                .task_assigned(&task_copy, &project_copy, &actor, &new_assignees)
                .await;
        }
    });

    Ok(HttpResponse::Ok().json(updated))
}

/// DELETE /api/tasks/{id}  (Admin, Manager with access)
pub async fn delete_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    require_role(&user, &[Role::Admin, Role::Manager])?;
    let (task, project) = require_task_access(&data.mongodb, &user, &path).await?;

    let tasks = data.mongodb.db.collection::<Task>("tasks");
    tasks
        .delete_one(doc! { "_id": &task.id })
        .await
        .map_err(|e| ApiError::internal("deleting task", e))?;
    info!("Task deleted: {}", task.id);

    let notifier = data.notifier.clone();
    let task_copy = task.clone();
    let project_copy = project.clone();
    let actor = user.id.clone();
    actix_web::rt::spawn(async move {
        notifier.task_deleted(&task_copy, &project_copy, &actor).await
    });

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Task deleted" })))
}

/// POST /api/tasks/{id}/comments
pub async fn add_comment(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<AddCommentRequest>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let (task, project) = require_task_access(&data.mongodb, &user, &path).await?;

    if payload.content.trim().is_empty() {
        return Err(ApiError::validation("Comment content is required"));
    }

    let comment = Comment {
        comment_id: Uuid::new_v4().to_string(),
        author: user.id.clone(),
        content: payload.content.trim().to_string(),
        created_at: Utc::now(),
    };
    let comment_bson =
        to_bson(&comment).map_err(|e| ApiError::internal("serializing comment", e))?;

    let tasks = data.mongodb.db.collection::<Task>("tasks");
    tasks
        .update_one(
            doc! { "_id": &task.id },
            doc! { "$push": { "comments": comment_bson } },
        )
        .await
        .map_err(|e| ApiError::internal("adding comment", e))?;

    let notifier = data.notifier.clone();
    let task_copy = task.clone();
    let project_copy = project.clone();
    let actor = user.id.clone();
    actix_web::rt::spawn(async move {
        notifier
            .task_comment_added(&task_copy, &project_copy, &actor)
            .await
    });

    Ok(HttpResponse::Created().json(comment))
}

/// DELETE /api/tasks/{id}/comments/{comment_id}
pub async fn delete_comment(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let (task_id, comment_id) = path.into_inner();
    let (task, _project) = require_task_access(&data.mongodb, &user, &task_id).await?;

    let comment = task
        .comments
        .iter()
        .find(|c| c.comment_id == comment_id)
        .ok_or_else(|| ApiError::not_found("Comment not found"))?;

    if user.role == Role::TeamMember && comment.author != user.id {
        return Err(ApiError::forbidden("You can only delete your own comments"));
    }

    let tasks = data.mongodb.db.collection::<Task>("tasks");
    tasks
        .update_one(
            doc! { "_id": &task.id },
            doc! { "$pull": { "comments": { "comment_id": &comment_id } } },
        )
        .await
        .map_err(|e| ApiError::internal("deleting comment", e))?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Comment deleted" })))
}

/// POST /api/tasks/{id}/attachments
pub async fn add_attachment(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<AddAttachmentRequest>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let (task, project) = require_task_access(&data.mongodb, &user, &path).await?;

    if payload.file_name.trim().is_empty() || payload.file_url.trim().is_empty() {
        return Err(ApiError::validation("File name and URL are required"));
    }

    let attachment = Attachment {
        attachment_id: Uuid::new_v4().to_string(),
        file_name: payload.file_name.trim().to_string(),
        file_url: payload.file_url.trim().to_string(),
        uploaded_by: user.id.clone(),
        uploaded_at: Utc::now(),
    };
    let attachment_bson =
        to_bson(&attachment).map_err(|e| ApiError::internal("serializing attachment", e))?;

    let tasks = data.mongodb.db.collection::<Task>("tasks");
    tasks
        .update_one(
            doc! { "_id": &task.id },
            doc! { "$push": { "attachments": attachment_bson } },
        )
        .await
        .map_err(|e| ApiError::internal("adding attachment", e))?;

    let notifier = data.notifier.clone();
    let task_copy = task.clone();
    let project_copy = project.clone();
    let actor = user.id.clone();
    let file_name = attachment.file_name.clone();
    actix_web::rt::spawn(async move {
        notifier
            .task_attachment_added(&task_copy, &project_copy, &actor, &file_name)
            .await
    });

    Ok(HttpResponse::Created().json(attachment))
}

/// DELETE /api/tasks/{id}/attachments/{attachment_id}
pub async fn delete_attachment(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let (task_id, attachment_id) = path.into_inner();
    let (task, _project) = require_task_access(&data.mongodb, &user, &task_id).await?;

    let attachment = task
        .attachments
        .iter()
        .find(|a| a.attachment_id == attachment_id)
        .ok_or_else(|| ApiError::not_found("Attachment not found"))?;

    if user.role == Role::TeamMember && attachment.uploaded_by != user.id {
        return Err(ApiError::forbidden("You can only delete your own attachments"));
    }

    let tasks = data.mongodb.db.collection::<Task>("tasks");
    tasks
        .update_one(
            doc! { "_id": &task.id },
            doc! { "$pull": { "attachments": { "attachment_id": &attachment_id } } },
        )
        .await
        .map_err(|e| ApiError::internal("deleting attachment", e))?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Attachment deleted" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_update() -> UpdateTaskRequest {
        UpdateTaskRequest {
            title: None,
            description: None,
            assigned_to: None,
            status: None,
            priority: None,
            due_date: None,
        }
    }

    #[test]
    fn status_only_update_passes_the_field_rule() {
        let payload = UpdateTaskRequest {
            status: Some(TaskStatus::Completed),
            ..empty_update()
        };
        assert!(touches_only_status(&payload));
    }

    #[test]
    fn any_other_field_fails_the_field_rule() {
        let payload = UpdateTaskRequest {
            status: Some(TaskStatus::Completed),
            title: Some("renamed".into()),
            ..empty_update()
        };
        assert!(!touches_only_status(&payload));

        let payload = UpdateTaskRequest {
            priority: Some(TaskPriority::High),
            ..empty_update()
        };
        assert!(!touches_only_status(&payload));

        let payload = UpdateTaskRequest {
            assigned_to: Some(vec!["u1".into()]),
            ..empty_update()
        };
        assert!(!touches_only_status(&payload));
    }

    #[test]
    fn empty_update_is_status_only_but_rejected_later() {
        // No fields at all passes the role rule and then fails the
        // "No fields to update" validation.
        assert!(touches_only_status(&empty_update()));
    }
}
