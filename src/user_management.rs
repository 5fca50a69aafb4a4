use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::StreamExt;
use log::info;
use mongodb::bson::doc;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::current_user;
use crate::error::{ApiError, ApiResult};
use crate::guard::require_role;
use crate::models::{PublicUser, Role, User};

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub email: String,
}

/// The only legal role transitions: Team Member <-> Manager. Admin is
/// immutable in both directions.
fn role_change_allowed(current: Role, next: Role) -> bool {
    matches!(
        (current, next),
        (Role::TeamMember, Role::Manager) | (Role::Manager, Role::TeamMember)
    )
}

/// GET /api/users  (Admin, Manager)
pub async fn list_users(req: HttpRequest, data: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    require_role(&user, &[Role::Admin, Role::Manager])?;

    let users = data.mongodb.db.collection::<User>("users");
    let mut cursor = users
        .find(doc! {})
        .sort(doc! { "name": 1 })
        .await
        .map_err(|e| ApiError::internal("fetching users", e))?;

    let mut result = Vec::new();
    while let Some(found) = cursor.next().await {
        match found {
            Ok(found) => result.push(PublicUser::from(&found)),
            Err(e) => return Err(ApiError::internal("iterating users", e)),
        }
    }
    Ok(HttpResponse::Ok().json(result))
}

/// GET /api/users/{id}
pub async fn get_user_by_id(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    current_user(&req)?;

    let users = data.mongodb.db.collection::<User>("users");
    match users.find_one(doc! { "_id": &*path }).await {
        Ok(Some(found)) => Ok(HttpResponse::Ok().json(PublicUser::from(&found))),
        Ok(None) => Err(ApiError::not_found("User not found")),
        Err(e) => Err(ApiError::internal("fetching user", e)),
    }
}

/// GET /api/users/search?email=
pub async fn search_users(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<SearchQuery>,
) -> ApiResult<HttpResponse> {
    current_user(&req)?;

    let users = data.mongodb.db.collection::<User>("users");
    let filter = doc! { "email": { "$regex": &query.email, "$options": "i" } };
    let mut cursor = users
        .find(filter)
        .await
        .map_err(|e| ApiError::internal("searching users", e))?;

    let mut result = Vec::new();
    while let Some(found) = cursor.next().await {
        match found {
            Ok(found) => result.push(PublicUser::from(&found)),
            Err(e) => return Err(ApiError::internal("iterating users", e)),
        }
    }
    Ok(HttpResponse::Ok().json(result))
}

/// PUT /api/users/{id}/role  (Admin)
pub async fn update_user_role(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateRoleRequest>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    require_role(&user, &[Role::Admin])?;

    let users = data.mongodb.db.collection::<User>("users");
    let target = match users.find_one(doc! { "_id": &*path }).await {
        Ok(Some(target)) => target,
        Ok(None) => return Err(ApiError::not_found("User not found")),
        Err(e) => return Err(ApiError::internal("fetching user", e)),
    };

    if target.is_protected {
        return Err(ApiError::forbidden("This account's role cannot be changed"));
    }
    if !role_change_allowed(target.role, payload.role) {
        return Err(ApiError::forbidden("Role transition not allowed"));
    }

    users
        .update_one(
            doc! { "_id": &target.id },
            doc! { "$set": { "role": payload.role.as_str() } },
        )
        .await
        .map_err(|e| ApiError::internal("updating role", e))?;

    info!(
        "Role of {} changed: {} -> {}",
        target.id,
        target.role.as_str(),
        payload.role.as_str()
    );
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Role updated" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_and_manager_swap_both_ways() {
        assert!(role_change_allowed(Role::TeamMember, Role::Manager));
        assert!(role_change_allowed(Role::Manager, Role::TeamMember));
    }

    #[test]
    fn admin_is_immutable_in_both_directions() {
        assert!(!role_change_allowed(Role::Admin, Role::Manager));
        assert!(!role_change_allowed(Role::Admin, Role::TeamMember));
        assert!(!role_change_allowed(Role::Manager, Role::Admin));
        assert!(!role_change_allowed(Role::TeamMember, Role::Admin));
    }

    #[test]
    fn no_op_transitions_are_rejected() {
        assert!(!role_change_allowed(Role::Manager, Role::Manager));
        assert!(!role_change_allowed(Role::TeamMember, Role::TeamMember));
    }
}
