use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use futures_util::StreamExt;
use log::info;
use mongodb::bson::{doc, to_bson};
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::{current_user, is_valid_email};
use crate::error::{ApiError, ApiResult};
use crate::guard::require_role;
use crate::models::{Contact, ContactStatus, Role};

#[derive(Debug, Deserialize)]
pub struct SubmitContactRequest {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateContactStatusRequest {
    pub status: ContactStatus,
}

/// POST /api/contact  (public)
pub async fn submit_contact(
    data: web::Data<AppState>,
    payload: web::Json<SubmitContactRequest>,
) -> ApiResult<HttpResponse> {
    if payload.name.trim().is_empty()
        || payload.subject.trim().is_empty()
        || payload.message.trim().is_empty()
    {
        return Err(ApiError::validation("Name, subject and message are required"));
    }
    if !is_valid_email(&payload.email) {
        return Err(ApiError::validation("Invalid email address"));
    }

    let contact = Contact {
        id: Uuid::new_v4().to_string(),
        name: payload.name.trim().to_string(),
        email: payload.email.clone(),
        subject: payload.subject.trim().to_string(),
        message: payload.message.trim().to_string(),
        status: ContactStatus::Unread,
        created_at: Utc::now(),
    };

    let contacts = data.mongodb.db.collection::<Contact>("contacts");
    contacts
        .insert_one(&contact)
        .await
        .map_err(|e| ApiError::internal("saving contact submission", e))?;
    info!("Contact submission from {}", contact.email);

    let notifier = data.notifier.clone();
    let contact_copy = contact.clone();
    actix_web::rt::spawn(async move { notifier.contact_submitted(&contact_copy).await });

    Ok(HttpResponse::Created().json(serde_json::json!({ "message": "Thank you for reaching out" })))
}

/// GET /api/contact  (Admin)
pub async fn list_contacts(req: HttpRequest, data: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    require_role(&user, &[Role::Admin])?;

    let contacts = data.mongodb.db.collection::<Contact>("contacts");
    let mut cursor = contacts
        .find(doc! {})
        .sort(doc! { "created_at": -1 })
        .await
        .map_err(|e| ApiError::internal("fetching contacts", e))?;

    let mut result = Vec::new();
    while let Some(contact) = cursor.next().await {
        match contact {
            Ok(contact) => result.push(contact),
            Err(e) => return Err(ApiError::internal("iterating contacts", e)),
        }
    }
    Ok(HttpResponse::Ok().json(result))
}

/// PUT /api/contact/{id}/status  (Admin)
pub async fn update_contact_status(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateContactStatusRequest>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    require_role(&user, &[Role::Admin])?;

    let status_bson =
        to_bson(&payload.status).map_err(|e| ApiError::internal("serializing status", e))?;
    let contacts = data.mongodb.db.collection::<Contact>("contacts");
    let result = contacts
        .update_one(
            doc! { "_id": &*path },
            doc! { "$set": { "status": status_bson } },
        )
        .await
        .map_err(|e| ApiError::internal("updating contact", e))?;

    if result.matched_count == 0 {
        return Err(ApiError::not_found("Contact submission not found"));
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Contact updated" })))
}

/// DELETE /api/contact/{id}  (Admin)
pub async fn delete_contact(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    require_role(&user, &[Role::Admin])?;

    let contacts = data.mongodb.db.collection::<Contact>("contacts");
    let result = contacts
        .delete_one(doc! { "_id": &*path })
        .await
        .map_err(|e| ApiError::internal("deleting contact", e))?;

    if result.deleted_count == 0 {
        return Err(ApiError::not_found("Contact submission not found"));
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Contact deleted" })))
}
