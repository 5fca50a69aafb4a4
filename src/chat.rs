use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use futures_util::StreamExt;
use log::info;
use mongodb::bson::doc;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::current_user;
use crate::chat_server::RoomBroadcast;
use crate::error::{ApiError, ApiResult};
use crate::guard::require_role;
use crate::models::{Chat, ChatType, LastMessage, Message, ReadReceipt, Role, Team, User};

#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub chat_type: Option<ChatType>,
    /// Required for direct chats.
    pub participant_id: Option<String>,
    /// Required for team chats.
    pub team_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

async fn require_chat_participant(
    data: &AppState,
    user_id: &str,
    chat_id: &str,
) -> ApiResult<Chat> {
    let chats = data.mongodb.db.collection::<Chat>("chats");
    let chat = match chats.find_one(doc! { "_id": chat_id, "is_active": true }).await {
        Ok(Some(chat)) => chat,
        Ok(None) => return Err(ApiError::not_found("Chat not found")),
        Err(e) => return Err(ApiError::internal("fetching chat", e)),
    };
    if !chat.participants.iter().any(|p| p == user_id) {
        return Err(ApiError::forbidden("Not a participant of this chat"));
    }
    Ok(chat)
}

fn new_chat(participants: Vec<String>, chat_type: ChatType, team_id: Option<String>) -> Chat {
    let now = Utc::now();
    Chat {
        id: Uuid::new_v4().to_string(),
        participants,
        chat_type,
        team_id,
        last_message: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

/// POST /api/chats/create-chat
/// Direct chats are find-or-create. The existence check and the insert
/// are two separate operations with no uniqueness constraint underneath,
/// so two concurrent calls for the same pair can both insert.
pub async fn create_chat(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateChatRequest>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let chats = data.mongodb.db.collection::<Chat>("chats");

    match payload.chat_type.unwrap_or(ChatType::Direct) {
        ChatType::Direct => {
            let participant_id = payload
                .participant_id
                .as_ref()
                .ok_or_else(|| ApiError::validation("participant_id is required for a direct chat"))?;
            if participant_id == &user.id {
                return Err(ApiError::validation("Cannot open a direct chat with yourself"));
            }

            let users = data.mongodb.db.collection::<User>("users");
            match users.find_one(doc! { "_id": participant_id }).await {
                Ok(Some(_)) => {}
                Ok(None) => return Err(ApiError::not_found("User not found")),
                Err(e) => return Err(ApiError::internal("fetching chat participant", e)),
            }

            let existing = chats
                .find_one(doc! {
                    "chat_type": "direct",
                    "is_active": true,
                    "participants": { "$all": [&user.id, participant_id] },
                })
                .await
                .map_err(|e| ApiError::internal("searching for existing chat", e))?;
            if let Some(chat) = existing {
                return Ok(HttpResponse::Ok().json(chat));
            }

            let chat = new_chat(
                vec![user.id.clone(), participant_id.clone()],
                ChatType::Direct,
                None,
            );
            chats
                .insert_one(&chat)
                .await
                .map_err(|e| ApiError::internal("creating chat", e))?;
            Ok(HttpResponse::Created().json(chat))
        }
        ChatType::Team => {
            let team_id = payload
                .team_id
                .as_ref()
                .ok_or_else(|| ApiError::validation("team_id is required for a team chat"))?;

            let teams = data.mongodb.db.collection::<Team>("teams");
            let team = match teams.find_one(doc! { "_id": team_id }).await {
                Ok(Some(team)) => team,
                Ok(None) => return Err(ApiError::not_found("Team not found")),
                Err(e) => return Err(ApiError::internal("fetching team", e)),
            };
            if user.role != Role::Admin && team.manager != user.id {
                return Err(ApiError::forbidden(
                    "Only an admin or the team manager can open the team chat",
                ));
            }

            let existing = chats
                .find_one(doc! { "chat_type": "team", "team_id": team_id, "is_active": true })
                .await
                .map_err(|e| ApiError::internal("searching for existing chat", e))?;
            if let Some(chat) = existing {
                return Ok(HttpResponse::Ok().json(chat));
            }

            let chat = new_chat(team.members.clone(), ChatType::Team, Some(team.id.clone()));
            chats
                .insert_one(&chat)
                .await
                .map_err(|e| ApiError::internal("creating chat", e))?;
            info!("Team chat created for team {}", team.id);
            Ok(HttpResponse::Created().json(chat))
        }
        ChatType::AdminManager => {
            require_role(&user, &[Role::Admin, Role::Manager])?;

            let existing = chats
                .find_one(doc! { "chat_type": "admin-manager", "is_active": true })
                .await
                .map_err(|e| ApiError::internal("searching for existing chat", e))?;
            if let Some(chat) = existing {
                return Ok(HttpResponse::Ok().json(chat));
            }

            // Every admin and manager is a participant of the shared room.
            let users = data.mongodb.db.collection::<User>("users");
            let mut cursor = users
                .find(doc! { "role": { "$in": ["Admin", "Manager"] } })
                .await
                .map_err(|e| ApiError::internal("fetching admins and managers", e))?;
            let mut participants = Vec::new();
            while let Some(result) = cursor.next().await {
                match result {
                    Ok(user) => participants.push(user.id),
                    Err(e) => return Err(ApiError::internal("iterating users", e)),
                }
            }

            let chat = new_chat(participants, ChatType::AdminManager, None);
            chats
                .insert_one(&chat)
                .await
                .map_err(|e| ApiError::internal("creating chat", e))?;
            Ok(HttpResponse::Created().json(chat))
        }
    }
}

/// GET /api/chats
pub async fn get_user_chats(req: HttpRequest, data: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let chats = data.mongodb.db.collection::<Chat>("chats");

    let mut cursor = chats
        .find(doc! { "participants": &user.id, "is_active": true })
        .sort(doc! { "updated_at": -1 })
        .await
        .map_err(|e| ApiError::internal("fetching chats", e))?;

    let mut result = Vec::new();
    while let Some(chat) = cursor.next().await {
        match chat {
            Ok(chat) => result.push(chat),
            Err(e) => return Err(ApiError::internal("iterating chats", e)),
        }
    }
    Ok(HttpResponse::Ok().json(result))
}

/// GET /api/chats/{id}/messages
pub async fn get_messages(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let chat = require_chat_participant(&data, &user.id, &path).await?;

    let messages = data.mongodb.db.collection::<Message>("messages");
    let mut cursor = messages
        .find(doc! { "chat_id": &chat.id, "is_deleted": false })
        .sort(doc! { "created_at": 1 })
        .await
        .map_err(|e| ApiError::internal("fetching messages", e))?;

    let mut result = Vec::new();
    while let Some(message) = cursor.next().await {
        match message {
            Ok(message) => result.push(message),
            Err(e) => return Err(ApiError::internal("iterating messages", e)),
        }
    }
    Ok(HttpResponse::Ok().json(result))
}

/// POST /api/chats/{id}/messages
/// The authoritative write path. The socket broadcast that follows is
/// best-effort live delivery, not the system of record.
pub async fn send_message(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<SendMessageRequest>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let chat = require_chat_participant(&data, &user.id, &path).await?;

    if payload.content.trim().is_empty() {
        return Err(ApiError::validation("Message content is required"));
    }

    let message = Message {
        id: Uuid::new_v4().to_string(),
        chat_id: chat.id.clone(),
        sender: user.id.clone(),
        content: payload.content.trim().to_string(),
        read_by: vec![ReadReceipt {
            user: user.id.clone(),
            read_at: Utc::now(),
        }],
        is_deleted: false,
        created_at: Utc::now(),
    };

    let messages = data.mongodb.db.collection::<Message>("messages");
    messages
        .insert_one(&message)
        .await
        .map_err(|e| ApiError::internal("persisting message", e))?;

    // Denormalized snapshot for the conversation list.
    let last = LastMessage {
        content: message.content.clone(),
        sender: message.sender.clone(),
        sent_at: message.created_at,
    };
    let last_bson = mongodb::bson::to_bson(&last)
        .map_err(|e| ApiError::internal("serializing last message", e))?;
    let chats = data.mongodb.db.collection::<Chat>("chats");
    let _ = chats
        .update_one(
            doc! { "_id": &chat.id },
            doc! { "$set": {
                "last_message": last_bson,
                "updated_at": Utc::now().to_rfc3339(),
            } },
        )
        .await;

    if let Ok(payload_json) = serde_json::to_value(&message) {
        data.chat_server.do_send(RoomBroadcast {
            chat_id: chat.id.clone(),
            event: "new_message".to_string(),
            payload: payload_json,
            skip_session: None,
            skip_user: Some(user.id.clone()),
        });
    }

    let notifier = data.notifier.clone();
    let chat_copy = chat.clone();
    let message_copy = message.clone();
    actix_web::rt::spawn(async move { notifier.chat_message(&chat_copy, &message_copy).await });

    Ok(HttpResponse::Created().json(message))
}

/// PUT /api/chats/{id}/read
/// Idempotent: the `$ne` clause keeps a second call from appending a
/// duplicate receipt.
pub async fn mark_chat_read(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let chat = require_chat_participant(&data, &user.id, &path).await?;

    let messages = data.mongodb.db.collection::<Message>("messages");
    let result = messages
        .update_many(
            doc! {
                "chat_id": &chat.id,
                "sender": { "$ne": &user.id },
                "read_by.user": { "$ne": &user.id },
            },
            doc! { "$push": { "read_by": {
                "user": &user.id,
                "read_at": Utc::now().to_rfc3339(),
            } } },
        )
        .await
        .map_err(|e| ApiError::internal("marking chat read", e))?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "marked": result.modified_count })))
}

/// DELETE /api/chats/{id}
pub async fn delete_chat(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&req)?;
    let chat = require_chat_participant(&data, &user.id, &path).await?;

    let chats = data.mongodb.db.collection::<Chat>("chats");
    chats
        .update_one(
            doc! { "_id": &chat.id },
            doc! { "$set": { "is_active": false } },
        )
        .await
        .map_err(|e| ApiError::internal("deleting chat", e))?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Chat deleted" })))
}
