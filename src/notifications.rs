use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::StreamExt;
use mongodb::bson::doc;

use crate::app_state::AppState;
use crate::auth::current_user;
use crate::error::{ApiError, ApiResult};
use crate::models::Notification;

/// GET /api/notifications
/// The caller's feed, newest first. Recipient scoping is the filter
/// itself; there is no way to read another user's feed.
pub async fn list_notifications(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let collection = data.mongodb.db.collection::<Notification>("notifications");

    let mut cursor = collection
        .find(doc! { "recipient": &user.id })
        .sort(doc! { "created_at": -1 })
        .await
        .map_err(|e| ApiError::internal("fetching notifications", e))?;

    let mut notifications = Vec::new();
    while let Some(result) = cursor.next().await {
        match result {
            Ok(notification) => notifications.push(notification),
            Err(e) => return Err(ApiError::internal("iterating notifications", e)),
        }
    }

    Ok(HttpResponse::Ok().json(notifications))
}

/// PUT /api/notifications/{id}/read
pub async fn mark_read(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let notification_id = path.into_inner();
    let collection = data.mongodb.db.collection::<Notification>("notifications");

    let result = collection
        .update_one(
            doc! { "_id": &notification_id, "recipient": &user.id },
            doc! { "$set": { "is_read": true } },
        )
        .await
        .map_err(|e| ApiError::internal("marking notification read", e))?;

    if result.matched_count == 0 {
        return Err(ApiError::not_found("Notification not found"));
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Notification marked as read" })))
}

/// PUT /api/notifications/read-all
pub async fn mark_all_read(req: HttpRequest, data: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let collection = data.mongodb.db.collection::<Notification>("notifications");

    let result = collection
        .update_many(
            doc! { "recipient": &user.id, "is_read": false },
            doc! { "$set": { "is_read": true } },
        )
        .await
        .map_err(|e| ApiError::internal("marking all notifications read", e))?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "updated": result.modified_count })))
}

/// DELETE /api/notifications/{id}
pub async fn delete_notification(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let notification_id = path.into_inner();
    let collection = data.mongodb.db.collection::<Notification>("notifications");

    let result = collection
        .delete_one(doc! { "_id": &notification_id, "recipient": &user.id })
        .await
        .map_err(|e| ApiError::internal("deleting notification", e))?;

    if result.deleted_count == 0 {
        return Err(ApiError::not_found("Notification not found"));
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Notification deleted" })))
}

/// DELETE /api/notifications
pub async fn delete_all_notifications(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let collection = data.mongodb.db.collection::<Notification>("notifications");

    let result = collection
        .delete_many(doc! { "recipient": &user.id })
        .await
        .map_err(|e| ApiError::internal("deleting notifications", e))?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "deleted": result.deleted_count })))
}
