mod app_state;
mod auth;
mod chat;
mod chat_server;
mod config;
mod contact;
mod db;
mod error;
mod guard;
mod models;
mod notifications;
mod notifier;
mod password_reset;
mod project;
mod task;
mod team_management;
mod user_management;
mod web_socket_server;

use std::env;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix::Actor;
use actix_cors::Cors;
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http,
    middleware::Logger,
    web, App, Error, HttpMessage, HttpResponse, HttpServer,
};
use env_logger::Env;
use futures::future::{ok, Ready};
use log::info;

use crate::app_state::AppState;
use crate::auth::{validate_jwt, AuthUser};
use crate::models::Role;
use crate::notifier::Notifier;

#[derive(Debug)]
pub struct Authentication;

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware { service })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // A bearer header, when present, must verify; public routes are
        // reached without one and protected handlers check extensions.
        if let Some(auth_header) = req.headers().get(http::header::AUTHORIZATION) {
            if let Ok(auth_str) = auth_header.to_str() {
                if auth_str.starts_with("Bearer ") {
                    let token = auth_str.trim_start_matches("Bearer ").trim().to_string();
                    match verify_token(&token) {
                        Ok(user) => {
                            req.extensions_mut().insert(user);
                        }
                        Err(e) => {
                            let (req_parts, _payload) = req.into_parts();
                            let resp = HttpResponse::Unauthorized()
                                .json(serde_json::json!({ "message": e }))
                                .map_into_boxed_body();
                            let srv_resp = ServiceResponse::new(req_parts, resp);
                            return Box::pin(async move { Ok(srv_resp) });
                        }
                    }
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

fn verify_token(token: &str) -> Result<AuthUser, String> {
    let secret = env::var("JWT_SECRET").map_err(|_| "Server misconfigured".to_string())?;
    let claims = validate_jwt(token, &secret).map_err(|e| format!("Invalid token: {}", e))?;
    let role = Role::parse(&claims.role).ok_or_else(|| "Invalid token: unknown role".to_string())?;
    Ok(AuthUser {
        id: claims.sub,
        role,
    })
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = config::Config::from_env();
    let mongodb = Arc::new(db::MongoDB::init(&config.mongo_uri, &config.database_name).await);
    let notifier = Notifier::new(mongodb.clone());
    let chat_server = chat_server::ChatServer::new().start();

    let frontend_origin = config.frontend_origin.clone();
    let bind_addr = config.bind_addr.clone();
    info!("Server running at http://{}", bind_addr);
    info!("Allowed CORS origin: {}", frontend_origin);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(Authentication)
            .app_data(web::Data::new(AppState {
                chat_server: chat_server.clone(),
                mongodb: mongodb.clone(),
                notifier: notifier.clone(),
                config: config.clone(),
            }))
            .service(
                web::scope("/api")
                    .service(
                        web::scope("/auth")
                            .route("/register", web::post().to(auth::register))
                            .route("/login", web::post().to(auth::login)),
                    )
                    .service(
                        web::scope("/projects")
                            .route("", web::get().to(project::list_projects))
                            .route("", web::post().to(project::create_project))
                            .route("/{id}", web::get().to(project::get_project))
                            .route("/{id}", web::put().to(project::update_project))
                            .route("/{id}", web::delete().to(project::delete_project))
                            .route("/{id}/comments", web::post().to(project::add_comment))
                            .route(
                                "/{id}/comments/{comment_id}",
                                web::delete().to(project::delete_comment),
                            )
                            .route("/{id}/attachments", web::post().to(project::add_attachment))
                            .route(
                                "/{id}/attachments/{attachment_id}",
                                web::delete().to(project::delete_attachment),
                            ),
                    )
                    .service(
                        web::scope("/tasks")
                            .route(
                                "/project/{project_id}",
                                web::get().to(task::list_tasks_by_project),
                            )
                            .route("", web::post().to(task::create_task))
                            .route("/{id}", web::get().to(task::get_task))
                            .route("/{id}", web::put().to(task::update_task))
                            .route("/{id}", web::delete().to(task::delete_task))
                            .route("/{id}/comments", web::post().to(task::add_comment))
                            .route(
                                "/{id}/comments/{comment_id}",
                                web::delete().to(task::delete_comment),
                            )
                            .route("/{id}/attachments", web::post().to(task::add_attachment))
                            .route(
                                "/{id}/attachments/{attachment_id}",
                                web::delete().to(task::delete_attachment),
                            ),
                    )
                    .service(
                        web::scope("/teams")
                            .route("", web::post().to(team_management::create_team))
                            .route("", web::get().to(team_management::list_teams))
                            .route("/{id}", web::get().to(team_management::get_team))
                            .route("/{id}", web::put().to(team_management::update_team))
                            .route("/{id}", web::delete().to(team_management::delete_team))
                            .route(
                                "/{id}/members",
                                web::get().to(team_management::get_team_members),
                            )
                            .route("/{id}/members", web::post().to(team_management::add_member))
                            .route(
                                "/{id}/members/{user_id}",
                                web::delete().to(team_management::remove_member),
                            ),
                    )
                    .service(
                        web::scope("/users")
                            .route("", web::get().to(user_management::list_users))
                            .route("/search", web::get().to(user_management::search_users))
                            .route("/{id}", web::get().to(user_management::get_user_by_id))
                            .route(
                                "/{id}/role",
                                web::put().to(user_management::update_user_role),
                            ),
                    )
                    .service(
                        web::scope("/chats")
                            .route("/create-chat", web::post().to(chat::create_chat))
                            .route("", web::get().to(chat::get_user_chats))
                            .route("/{id}/messages", web::get().to(chat::get_messages))
                            .route("/{id}/messages", web::post().to(chat::send_message))
                            .route("/{id}/read", web::put().to(chat::mark_chat_read))
                            .route("/{id}", web::delete().to(chat::delete_chat)),
                    )
                    .service(
                        web::scope("/notifications")
                            .route("", web::get().to(notifications::list_notifications))
                            .route("", web::delete().to(notifications::delete_all_notifications))
                            .route("/read-all", web::put().to(notifications::mark_all_read))
                            .route("/{id}/read", web::put().to(notifications::mark_read))
                            .route(
                                "/{id}",
                                web::delete().to(notifications::delete_notification),
                            ),
                    )
                    .service(
                        web::scope("/password-reset")
                            .route(
                                "/forgot-password",
                                web::post().to(password_reset::forgot_password),
                            )
                            .route(
                                "/verify-reset-token/{token}",
                                web::get().to(password_reset::verify_reset_token),
                            )
                            .route(
                                "/reset-password/{token}",
                                web::post().to(password_reset::reset_password),
                            ),
                    )
                    .service(
                        web::scope("/contact")
                            .route("", web::post().to(contact::submit_contact))
                            .route("", web::get().to(contact::list_contacts))
                            .route(
                                "/{id}/status",
                                web::put().to(contact::update_contact_status),
                            )
                            .route("/{id}", web::delete().to(contact::delete_contact)),
                    ),
            )
            .service(web::resource("/ws").route(web::get().to(web_socket_server::ws_index)))
    })
    .bind(&bind_addr)?
    .run()
    .await
}
