use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use log::{info, warn};
use mongodb::bson::{doc, to_bson, Document};
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::current_user;
use crate::error::{ApiError, ApiResult};
use crate::guard::{require_project_access, require_role};
use crate::models::{Attachment, Comment, Project, ProjectStatus, Role, Task};

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
    pub status: Option<ProjectStatus>,
    pub deadline: Option<DateTime<Utc>>,
    pub team_members: Option<Vec<String>>,
    pub project_manager: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<ProjectStatus>,
    pub deadline: Option<DateTime<Utc>>,
    pub team_members: Option<Vec<String>>,
    pub project_manager: Option<String>,
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

/// Role-scoped listing filter: Admin sees everything, a Manager sees
/// projects they run or sit on, a Team Member sees projects they sit on.
fn list_filter(user_id: &str, role: Role) -> Document {
    match role {
        Role::Admin => doc! {},
        Role::Manager => doc! {
            "$or": [
                { "project_manager": user_id },
                { "team_members": user_id },
            ]
        },
        Role::TeamMember => doc! { "team_members": user_id },
    }
}

/// POST /api/projects  (Admin, Manager)
pub async fn create_project(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateProjectRequest>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    require_role(&user, &[Role::Admin, Role::Manager])?;

    if payload.name.trim().is_empty() {
        return Err(ApiError::validation("Project name is required"));
    }

    // A Manager creating a project runs it unless they named someone else.
    let project_manager = payload.project_manager.clone().or_else(|| {
        if user.role == Role::Manager {
            Some(user.id.clone())
        } else {
            None
        }
    });

    let now = Utc::now();
    let new_project = Project {
        id: Uuid::new_v4().to_string(),
        name: payload.name.trim().to_string(),
        description: payload.description.clone(),
        status: payload.status.unwrap_or(ProjectStatus::NotStarted),
        deadline: payload.deadline,
        team_members: payload.team_members.clone().unwrap_or_default(),
        project_manager,
        comments: vec![],
        attachments: vec![],
        created_by: user.id.clone(),
        created_at: now,
        updated_at: now,
    };

    let projects = data.mongodb.db.collection::<Project>("projects");
    projects
        .insert_one(&new_project)
        .await
        .map_err(|e| ApiError::internal("creating project", e))?;
    info!("Project created: {}", new_project.id);

    let notifier = data.notifier.clone();
    let project_copy = new_project.clone();
    let actor = user.id.clone();
    actix_web::rt::spawn(async move { notifier.project_created(&project_copy, &actor).await });

    Ok(HttpResponse::Created().json(new_project))
}

/// GET /api/projects
pub async fn list_projects(req: HttpRequest, data: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let projects = data.mongodb.db.collection::<Project>("projects");

    let mut cursor = projects
        .find(list_filter(&user.id, user.role))
        .sort(doc! { "created_at": -1 })
        .await
        .map_err(|e| ApiError::internal("fetching projects", e))?;

    let mut result = Vec::new();
    while let Some(project) = cursor.next().await {
        match project {
            Ok(project) => result.push(project),
            Err(e) => return Err(ApiError::internal("iterating projects", e)),
        }
    }
    Ok(HttpResponse::Ok().json(result))
}

/// GET /api/projects/{id}
pub async fn get_project(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let project = require_project_access(&data.mongodb, &user, &path).await?;
    Ok(HttpResponse::Ok().json(project))
}

/// PUT /api/projects/{id}  (Admin, Manager with access)
pub async fn update_project(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateProjectRequest>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    require_role(&user, &[Role::Admin, Role::Manager])?;
    let project = require_project_access(&data.mongodb, &user, &path).await?;

    let mut set_doc = doc! {};
    if let Some(name) = &payload.name {
        if name.trim().is_empty() {
            return Err(ApiError::validation("Project name cannot be empty"));
        }
        set_doc.insert("name", name.trim());
    }
    if let Some(description) = &payload.description {
        set_doc.insert("description", description.clone());
    }
    if let Some(status) = &payload.status {
        set_doc.insert(
            "status",
            to_bson(status).map_err(|e| ApiError::internal("serializing status", e))?,
        );
    }
    if let Some(deadline) = &payload.deadline {
        set_doc.insert("deadline", deadline.to_rfc3339());
    }
    if let Some(team_members) = &payload.team_members {
        set_doc.insert("team_members", team_members.clone());
    }
    if let Some(project_manager) = &payload.project_manager {
        set_doc.insert("project_manager", project_manager.clone());
    }
    if set_doc.is_empty() {
        return Err(ApiError::validation("No fields to update"));
    }
    set_doc.insert("updated_at", Utc::now().to_rfc3339());

    let projects = data.mongodb.db.collection::<Project>("projects");
    projects
        .update_one(doc! { "_id": &project.id }, doc! { "$set": set_doc })
        .await
        .map_err(|e| ApiError::internal("updating project", e))?;

    let updated = match projects.find_one(doc! { "_id": &project.id }).await {
        Ok(Some(updated)) => updated,
        Ok(None) => return Err(ApiError::not_found("Project not found")),
        Err(e) => return Err(ApiError::internal("re-fetching project", e)),
    };

    let notifier = data.notifier.clone();
    let project_copy = updated.clone();
    let actor = user.id.clone();
    actix_web::rt::spawn(async move { notifier.project_updated(&project_copy, &actor).await });

    Ok(HttpResponse::Ok().json(updated))
}

/// DELETE /api/projects/{id}  (Admin, Manager with access)
/// Cascade: the project document first, then its tasks. The two deletes
/// are not atomic; a reader between them sees orphan tasks briefly.
pub async fn delete_project(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    require_role(&user, &[Role::Admin, Role::Manager])?;
    let project = require_project_access(&data.mongodb, &user, &path).await?;

    let projects = data.mongodb.db.collection::<Project>("projects");
    projects
        .delete_one(doc! { "_id": &project.id })
        .await
        .map_err(|e| ApiError::internal("deleting project", e))?;

    let tasks = data.mongodb.db.collection::<Task>("tasks");
    match tasks.delete_many(doc! { "project_id": &project.id }).await {
        Ok(result) => info!(
            "Project {} deleted with {} tasks",
            project.id, result.deleted_count
        ),
        Err(e) => warn!("Project {} deleted but task cascade failed: {}", project.id, e),
    }

    let notifier = data.notifier.clone();
    let project_copy = project.clone();
    let actor = user.id.clone();
    let actor_role = user.role;
    actix_web::rt::spawn(async move {
        notifier.project_deleted(&project_copy, &actor, actor_role).await
    });

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Project deleted" })))
}

/// POST /api/projects/{id}/comments
pub async fn add_comment(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<AddCommentRequest>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let project = require_project_access(&data.mongodb, &user, &path).await?;

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

    let projects = data.mongodb.db.collection::<Project>("projects");
    projects
        .update_one(
            doc! { "_id": &project.id },
            doc! { "$push": { "comments": comment_bson } },
        )
        .await
        .map_err(|e| ApiError::internal("adding comment", e))?;

    let notifier = data.notifier.clone();
    let project_copy = project.clone();
    let actor = user.id.clone();
    actix_web::rt::spawn(async move {
        notifier.project_comment_added(&project_copy, &actor).await
    });

    Ok(HttpResponse::Created().json(comment))
}

/// DELETE /api/projects/{id}/comments/{comment_id}
/// The author may remove their own comment; Admin and Managers with
/// access may remove any.
pub async fn delete_comment(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let (project_id, comment_id) = path.into_inner();
    let project = require_project_access(&data.mongodb, &user, &project_id).await?;

    let comment = project
        .comments
        .iter()
        .find(|c| c.comment_id == comment_id)
        .ok_or_else(|| ApiError::not_found("Comment not found"))?;

    if user.role == Role::TeamMember && comment.author != user.id {
        return Err(ApiError::forbidden("You can only delete your own comments"));
    }

    let projects = data.mongodb.db.collection::<Project>("projects");
    projects
        .update_one(
            doc! { "_id": &project.id },
            doc! { "$pull": { "comments": { "comment_id": &comment_id } } },
        )
        .await
        .map_err(|e| ApiError::internal("deleting comment", e))?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Comment deleted" })))
}

/// POST /api/projects/{id}/attachments
pub async fn add_attachment(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<AddAttachmentRequest>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let project = require_project_access(&data.mongodb, &user, &path).await?;

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

    let projects = data.mongodb.db.collection::<Project>("projects");
    projects
        .update_one(
            doc! { "_id": &project.id },
            doc! { "$push": { "attachments": attachment_bson } },
        )
        .await
        .map_err(|e| ApiError::internal("adding attachment", e))?;

    let notifier = data.notifier.clone();
    let project_copy = project.clone();
    let actor = user.id.clone();
    let file_name = attachment.file_name.clone();
    actix_web::rt::spawn(async move {
        notifier
            .project_attachment_added(&project_copy, &actor, &file_name)
            .await
    });

    Ok(HttpResponse::Created().json(attachment))
}

/// DELETE /api/projects/{id}/attachments/{attachment_id}
pub async fn delete_attachment(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let (project_id, attachment_id) = path.into_inner();
    let project = require_project_access(&data.mongodb, &user, &project_id).await?;

    let attachment = project
        .attachments
        .iter()
        .find(|a| a.attachment_id == attachment_id)
        .ok_or_else(|| ApiError::not_found("Attachment not found"))?;

    if user.role == Role::TeamMember && attachment.uploaded_by != user.id {
        return Err(ApiError::forbidden("You can only delete your own attachments"));
    }

    let projects = data.mongodb.db.collection::<Project>("projects");
    projects
        .update_one(
            doc! { "_id": &project.id },
            doc! { "$pull": { "attachments": { "attachment_id": &attachment_id } } },
        )
        .await
        .map_err(|e| ApiError::internal("deleting attachment", e))?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Attachment deleted" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_list_filter_is_unscoped() {
        assert_eq!(list_filter("a", Role::Admin), doc! {});
    }

    #[test]
    fn manager_list_filter_covers_both_seats() {
        let filter = list_filter("mgr", Role::Manager);
        let arr = filter.get_array("$or").unwrap();
        assert_eq!(arr.len(), 2);
    }

    #[test]
    fn team_member_list_filter_is_membership_only() {
        let filter = list_filter("tm", Role::TeamMember);
        assert_eq!(filter, doc! { "team_members": "tm" });
    }
}
