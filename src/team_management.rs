use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use futures_util::StreamExt;
use log::{info, warn};
use mongodb::bson::doc;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::current_user;
use crate::error::{ApiError, ApiResult};
use crate::guard::require_role;
use crate::models::{PublicUser, Role, Team, User};

#[derive(Debug, Deserialize)]
pub struct CreateTeamRequest {
    pub name: String,
    pub description: Option<String>,
    pub manager_id: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTeamRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: String,
}

/// Invariant: the manager is always a member. Applied at construction so
/// no team document ever exists without it.
fn build_team(admin: &str, manager: &str, name: &str, description: Option<String>) -> Team {
    let now = Utc::now();
    Team {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        description,
        manager: manager.to_string(),
        members: vec![manager.to_string()],
        admin: admin.to_string(),
        created_at: now,
        updated_at: now,
    }
}

fn is_team_member(team: &Team, user_id: &str) -> bool {
    team.members.iter().any(|m| m == user_id)
}

/// POST /api/teams  (Admin)
/// Two sequential writes: team insert, then the manager's team_id. Not
/// atomic; a failure between them leaves the manager unlinked.
pub async fn create_team(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateTeamRequest>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    require_role(&user, &[Role::Admin])?;

    if payload.name.trim().is_empty() {
        return Err(ApiError::validation("Team name is required"));
    }

    let teams = data.mongodb.db.collection::<Team>("teams");
    match teams.find_one(doc! { "name": payload.name.trim() }).await {
        Ok(Some(_)) => return Err(ApiError::conflict("A team with this name already exists")),
        Ok(None) => {}
        Err(e) => return Err(ApiError::internal("checking team name", e)),
    }

    let users = data.mongodb.db.collection::<User>("users");
    let manager = match users.find_one(doc! { "_id": &payload.manager_id }).await {
        Ok(Some(manager)) => manager,
        Ok(None) => return Err(ApiError::not_found("Manager user not found")),
        Err(e) => return Err(ApiError::internal("fetching manager", e)),
    };
    if manager.role != Role::Manager {
        return Err(ApiError::validation("Chosen user does not have the Manager role"));
    }
    if manager.team_id.is_some() {
        return Err(ApiError::conflict("Manager already leads a team"));
    }

    let new_team = build_team(
        &user.id,
        &manager.id,
        payload.name.trim(),
        payload.description.clone(),
    );
    teams
        .insert_one(&new_team)
        .await
        .map_err(|e| ApiError::internal("creating team", e))?;

    if let Err(e) = users
        .update_one(
            doc! { "_id": &manager.id },
            doc! { "$set": { "team_id": &new_team.id } },
        )
        .await
    {
        warn!(
            "Team {} created but manager {} link failed: {}",
            new_team.id, manager.id, e
        );
    }

    info!("Team created: {} (manager {})", new_team.name, manager.id);

    let notifier = data.notifier.clone();
    let team_copy = new_team.clone();
    let actor = user.id.clone();
    actix_web::rt::spawn(async move { notifier.team_created(&team_copy, &actor).await });

    Ok(HttpResponse::Created().json(new_team))
}

/// GET /api/teams  (Admin)
pub async fn list_teams(req: HttpRequest, data: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    require_role(&user, &[Role::Admin])?;

    let teams = data.mongodb.db.collection::<Team>("teams");
    let mut cursor = teams
        .find(doc! {})
        .await
        .map_err(|e| ApiError::internal("fetching teams", e))?;

    let mut result = Vec::new();
    while let Some(team) = cursor.next().await {
        match team {
            Ok(team) => result.push(team),
            Err(e) => return Err(ApiError::internal("iterating teams", e)),
        }
    }
    Ok(HttpResponse::Ok().json(result))
}

async fn fetch_team(data: &AppState, team_id: &str) -> ApiResult<Team> {
    let teams = data.mongodb.db.collection::<Team>("teams");
    match teams.find_one(doc! { "_id": team_id }).await {
        Ok(Some(team)) => Ok(team),
        Ok(None) => Err(ApiError::not_found("Team not found")),
        Err(e) => Err(ApiError::internal("fetching team", e)),
    }
}

/// GET /api/teams/{id}
pub async fn get_team(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let team = fetch_team(&data, &path).await?;

    if user.role != Role::Admin && !is_team_member(&team, &user.id) {
        return Err(ApiError::forbidden("Not a member of this team"));
    }
    Ok(HttpResponse::Ok().json(team))
}

/// GET /api/teams/{id}/members
pub async fn get_team_members(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let team = fetch_team(&data, &path).await?;

    if user.role != Role::Admin && !is_team_member(&team, &user.id) {
        return Err(ApiError::forbidden("Not a member of this team"));
    }

    let users = data.mongodb.db.collection::<User>("users");
    let mut cursor = users
        .find(doc! { "_id": { "$in": &team.members } })
        .await
        .map_err(|e| ApiError::internal("fetching team members", e))?;

    let mut members = Vec::new();
    while let Some(result) = cursor.next().await {
        match result {
            Ok(member) => members.push(PublicUser::from(&member)),
            Err(e) => return Err(ApiError::internal("iterating team members", e)),
        }
    }
    Ok(HttpResponse::Ok().json(members))
}

fn can_manage_team(user_role: Role, user_id: &str, team: &Team) -> bool {
    user_role == Role::Admin || (user_role == Role::Manager && team.manager == user_id)
}

/// PUT /api/teams/{id}  (Admin or the team's manager)
pub async fn update_team(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateTeamRequest>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let team = fetch_team(&data, &path).await?;

    if !can_manage_team(user.role, &user.id, &team) {
        return Err(ApiError::forbidden("Only an admin or the team manager can update the team"));
    }

    let mut set_doc = doc! { "updated_at": Utc::now().to_rfc3339() };
    if let Some(name) = &payload.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::validation("Team name cannot be empty"));
        }
        if name != team.name {
            let teams = data.mongodb.db.collection::<Team>("teams");
            match teams.find_one(doc! { "name": name }).await {
                Ok(Some(_)) => {
                    return Err(ApiError::conflict("A team with this name already exists"))
                }
                Ok(None) => {}
                Err(e) => return Err(ApiError::internal("checking team name", e)),
            }
        }
        set_doc.insert("name", name);
    }
    if let Some(description) = &payload.description {
        set_doc.insert("description", description.clone());
    }

    let teams = data.mongodb.db.collection::<Team>("teams");
    teams
        .update_one(doc! { "_id": &team.id }, doc! { "$set": set_doc })
        .await
        .map_err(|e| ApiError::internal("updating team", e))?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Team updated" })))
}

/// DELETE /api/teams/{id}  (Admin)
/// Team delete plus a member-unlink sweep; the two writes are sequential.
pub async fn delete_team(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    require_role(&user, &[Role::Admin])?;
    let team = fetch_team(&data, &path).await?;

    let teams = data.mongodb.db.collection::<Team>("teams");
    teams
        .delete_one(doc! { "_id": &team.id })
        .await
        .map_err(|e| ApiError::internal("deleting team", e))?;

    let users = data.mongodb.db.collection::<User>("users");
    if let Err(e) = users
        .update_many(
            doc! { "team_id": &team.id },
            doc! { "$set": { "team_id": null } },
        )
        .await
    {
        warn!("Team {} deleted but member unlink failed: {}", team.id, e);
    }

    info!("Team deleted: {}", team.name);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Team deleted" })))
}

/// POST /api/teams/{id}/members  (Admin or the team's manager)
pub async fn add_member(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<AddMemberRequest>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let team = fetch_team(&data, &path).await?;

    if !can_manage_team(user.role, &user.id, &team) {
        return Err(ApiError::forbidden("Only an admin or the team manager can add members"));
    }
    if is_team_member(&team, &payload.user_id) {
        return Err(ApiError::conflict("User is already a member of this team"));
    }

    let users = data.mongodb.db.collection::<User>("users");
    let member = match users.find_one(doc! { "_id": &payload.user_id }).await {
        Ok(Some(member)) => member,
        Ok(None) => return Err(ApiError::not_found("User not found")),
        Err(e) => return Err(ApiError::internal("fetching user", e)),
    };
    if member.team_id.is_some() {
        return Err(ApiError::conflict("User already belongs to a team"));
    }

    let teams = data.mongodb.db.collection::<Team>("teams");
    teams
        .update_one(
            doc! { "_id": &team.id },
            doc! { "$addToSet": { "members": &member.id } },
        )
        .await
        .map_err(|e| ApiError::internal("adding team member", e))?;

    if let Err(e) = users
        .update_one(
            doc! { "_id": &member.id },
            doc! { "$set": { "team_id": &team.id } },
        )
        .await
    {
        warn!("Member {} added to {} but user link failed: {}", member.id, team.id, e);
    }

    let notifier = data.notifier.clone();
    let team_copy = team.clone();
    let member_id = member.id.clone();
    let actor = user.id.clone();
    actix_web::rt::spawn(async move {
        notifier.team_member_added(&team_copy, &member_id, &actor).await
    });

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Member added" })))
}

/// DELETE /api/teams/{id}/members/{user_id}  (Admin or the team's manager)
pub async fn remove_member(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let (team_id, member_id) = path.into_inner();
    let team = fetch_team(&data, &team_id).await?;

    if !can_manage_team(user.role, &user.id, &team) {
        return Err(ApiError::forbidden("Only an admin or the team manager can remove members"));
    }
    if member_id == team.manager {
        // Removing the manager would break the manager-in-members invariant.
        return Err(ApiError::validation("The team manager cannot be removed from the team"));
    }
    if !is_team_member(&team, &member_id) {
        return Err(ApiError::not_found("User is not a member of this team"));
    }

    let teams = data.mongodb.db.collection::<Team>("teams");
    teams
        .update_one(
            doc! { "_id": &team.id },
            doc! { "$pull": { "members": &member_id } },
        )
        .await
        .map_err(|e| ApiError::internal("removing team member", e))?;

    let users = data.mongodb.db.collection::<User>("users");
    if let Err(e) = users
        .update_one(doc! { "_id": &member_id }, doc! { "$set": { "team_id": null } })
        .await
    {
        warn!("Member {} removed from {} but user unlink failed: {}", member_id, team.id, e);
    }

    let notifier = data.notifier.clone();
    let team_copy = team.clone();
    let removed = member_id.clone();
    let actor = user.id.clone();
    actix_web::rt::spawn(async move {
        notifier.team_member_removed(&team_copy, &removed, &actor).await
    });

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Member removed" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_is_always_a_member_after_build() {
        let team = build_team("admin-1", "mgr-1", "Platform", None);
        assert!(team.members.iter().any(|m| m == "mgr-1"));
        assert_eq!(team.manager, "mgr-1");
        assert_eq!(team.admin, "admin-1");
    }

    #[test]
    fn team_management_rights() {
        let team = build_team("admin-1", "mgr-1", "Platform", None);
        assert!(can_manage_team(Role::Admin, "someone", &team));
        assert!(can_manage_team(Role::Manager, "mgr-1", &team));
        assert!(!can_manage_team(Role::Manager, "mgr-2", &team));
        assert!(!can_manage_team(Role::TeamMember, "mgr-1", &team));
    }
}
