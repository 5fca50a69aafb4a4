use crate::chat_server::ChatServer;
use crate::config::Config;
use crate::db::MongoDB;
use crate::notifier::Notifier;
use actix::Addr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub chat_server: Addr<ChatServer>,
    pub mongodb: Arc<MongoDB>,
    pub notifier: Notifier,
    pub config: Config,
}
