use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{info, warn};
use mongodb::bson::doc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::models::{PublicUser, Role, Team, User};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

/// The authenticated caller, attached to request extensions by the bearer
/// middleware in `main.rs`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub role: Role,
}

pub fn create_jwt(user_id: &str, role: Role, secret: &str) -> String {
    let expiration = Utc::now() + Duration::days(7);
    let claims = Claims {
        sub: user_id.to_string(),
        role: role.as_str().to_string(),
        exp: expiration.timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
    .expect("JWT encoding cannot fail with HS256")
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Pulls the `AuthUser` placed in extensions by the middleware, or fails
/// with 401 for routes reached without a valid token.
pub fn current_user(req: &HttpRequest) -> ApiResult<AuthUser> {
    req.extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| ApiError::unauthorized("Unauthorized"))
}

pub fn is_valid_email(email: &str) -> bool {
    // Shape check only; deliverability is the mail provider's problem.
    let re = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static email regex");
    re.is_match(email)
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Option<Role>,
    pub team_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// POST /api/auth/register
pub async fn register(
    data: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> ApiResult<HttpResponse> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::validation("Name is required"));
    }
    if !is_valid_email(&payload.email) {
        return Err(ApiError::validation("Invalid email address"));
    }
    if payload.password.len() < 6 {
        return Err(ApiError::validation(
            "Password must be at least 6 characters",
        ));
    }
    let role = payload.role.unwrap_or(Role::TeamMember);
    if role == Role::Admin {
        return Err(ApiError::validation("Cannot register as Admin"));
    }

    let users = data.mongodb.db.collection::<User>("users");
    match users.find_one(doc! { "email": &payload.email }).await {
        Ok(Some(_)) => return Err(ApiError::conflict("Email already registered")),
        Ok(None) => {}
        Err(e) => return Err(ApiError::internal("checking email uniqueness", e)),
    }

    // Optional team join: validated before the user document exists so a
    // bad team id fails the whole registration.
    let team = match &payload.team_id {
        Some(team_id) => {
            let teams = data.mongodb.db.collection::<Team>("teams");
            match teams.find_one(doc! { "_id": team_id }).await {
                Ok(Some(team)) => Some(team),
                Ok(None) => return Err(ApiError::not_found("Team not found")),
                Err(e) => return Err(ApiError::internal("fetching team", e)),
            }
        }
        None => None,
    };

    let hashed_password = hash(&payload.password, DEFAULT_COST)
        .map_err(|e| ApiError::internal("hashing password", e))?;

    let new_user = User {
        id: Uuid::new_v4().to_string(),
        name: payload.name.trim().to_string(),
        email: payload.email.clone(),
        password: hashed_password,
        role,
        team_id: team.as_ref().map(|t| t.id.clone()),
        is_protected: false,
        created_at: Utc::now(),
    };

    users
        .insert_one(&new_user)
        .await
        .map_err(|e| ApiError::internal("creating user", e))?;

    // Second write of the join sequence; not atomic with the insert.
    if let Some(team) = &team {
        let teams = data.mongodb.db.collection::<Team>("teams");
        if let Err(e) = teams
            .update_one(
                doc! { "_id": &team.id },
                doc! { "$addToSet": { "members": &new_user.id } },
            )
            .await
        {
            warn!("User {} created but team join failed: {}", new_user.id, e);
        }
    }

    info!("User registered: {} ({})", new_user.email, role.as_str());

    let notifier = data.notifier.clone();
    let user_copy = new_user.clone();
    actix_web::rt::spawn(async move { notifier.user_registered(&user_copy).await });

    let token = create_jwt(&new_user.id, new_user.role, &data.config.jwt_secret);
    Ok(HttpResponse::Created().json(serde_json::json!({
        "token": token,
        "user": PublicUser::from(&new_user),
    })))
}

/// POST /api/auth/login
pub async fn login(
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    let users = data.mongodb.db.collection::<User>("users");
    let user = match users.find_one(doc! { "email": &payload.email }).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(ApiError::unauthorized("Invalid credentials")),
        Err(e) => return Err(ApiError::internal("fetching user for login", e)),
    };

    if !verify(&payload.password, &user.password).unwrap_or(false) {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let token = create_jwt(&user.id, user.role, &data.config.jwt_secret);
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "token": token,
        "user": PublicUser::from(&user),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_round_trip_preserves_identity_and_role() {
        let token = create_jwt("user-1", Role::Manager, "test-secret");
        let claims = validate_jwt(&token, "test-secret").unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.role, "Manager");
        assert_eq!(Role::parse(&claims.role), Some(Role::Manager));
    }

    #[test]
    fn jwt_rejects_wrong_secret() {
        let token = create_jwt("user-1", Role::Admin, "test-secret");
        assert!(validate_jwt(&token, "other-secret").is_err());
    }

    #[test]
    fn jwt_expiry_is_seven_days_out() {
        let token = create_jwt("user-1", Role::TeamMember, "test-secret");
        let claims = validate_jwt(&token, "test-secret").unwrap();
        let week = (Utc::now() + Duration::days(7)).timestamp() as usize;
        assert!(claims.exp <= week);
        assert!(claims.exp > week - 60);
    }

    #[test]
    fn email_shape_check() {
        assert!(is_valid_email("a@b.co"));
        assert!(is_valid_email("first.last@sub.domain.org"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("spaces in@mail.com"));
        assert!(!is_valid_email("missing@tld"));
    }
}
