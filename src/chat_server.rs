use actix::prelude::*;
use log::info;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::models::PublicUser;

/// A serialized wire frame pushed to one websocket session.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Frame(pub String);

pub fn envelope(event: &str, data: &Value) -> String {
    serde_json::json!({ "event": event, "data": data }).to_string()
}

struct PresenceEntry<T> {
    sessions: Vec<(String, T)>,
    profile: PublicUser,
}

/// The online-user directory: user id -> live sessions + profile. Owned
/// by the `ChatServer` actor, which serializes all mutation; it is local
/// to this process and cannot back a multi-instance deployment.
pub struct PresenceDirectory<T> {
    users: HashMap<String, PresenceEntry<T>>,
}

impl<T> PresenceDirectory<T> {
    pub fn new() -> Self {
        PresenceDirectory {
            users: HashMap::new(),
        }
    }

    /// Registers a session. Returns true when this is the user's first
    /// live session, i.e. they just came online.
    pub fn add(&mut self, session_id: &str, handle: T, profile: PublicUser) -> bool {
        let entry = self
            .users
            .entry(profile.user_id.clone())
            .or_insert_with(|| PresenceEntry {
                sessions: Vec::new(),
                profile,
            });
        entry.sessions.push((session_id.to_string(), handle));
        entry.sessions.len() == 1
    }

    /// Drops a session. Returns true when it was the user's last one,
    /// i.e. they just went offline.
    pub fn remove(&mut self, user_id: &str, session_id: &str) -> bool {
        if let Some(entry) = self.users.get_mut(user_id) {
            entry.sessions.retain(|(sid, _)| sid != session_id);
            if entry.sessions.is_empty() {
                self.users.remove(user_id);
                return true;
            }
        }
        false
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn all_handles(&self) -> impl Iterator<Item = &T> {
        self.users
            .values()
            .flat_map(|entry| entry.sessions.iter().map(|(_, handle)| handle))
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub session_id: String,
    pub user: PublicUser,
    pub addr: Recipient<Frame>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub session_id: String,
    pub user_id: String,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct JoinChat {
    pub session_id: String,
    pub chat_id: String,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct LeaveChat {
    pub session_id: String,
    pub chat_id: String,
}

/// Fan a frame out to every session currently joined to a chat room.
/// `skip_session` excludes the sender's own socket (websocket path);
/// `skip_user` excludes every session of a user (HTTP path).
#[derive(Message)]
#[rtype(result = "()")]
pub struct RoomBroadcast {
    pub chat_id: String,
    pub event: String,
    pub payload: Value,
    pub skip_session: Option<String>,
    pub skip_user: Option<String>,
}

pub struct ChatServer {
    presence: PresenceDirectory<Recipient<Frame>>,
    /// chat id -> joined session ids.
    rooms: HashMap<String, HashSet<String>>,
    /// session id -> (user id, address).
    sessions: HashMap<String, (String, Recipient<Frame>)>,
}

impl ChatServer {
    pub fn new() -> Self {
        ChatServer {
            presence: PresenceDirectory::new(),
            rooms: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    fn broadcast_all(&self, event: &str, data: &Value) {
        let frame = envelope(event, data);
        for handle in self.presence.all_handles() {
            handle.do_send(Frame(frame.clone()));
        }
    }
}

impl Actor for ChatServer {
    type Context = Context<Self>;
}

impl Handler<Connect> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) {
        let user_id = msg.user.user_id.clone();
        info!("Chat session connected: {} (user {})", msg.session_id, user_id);

        self.sessions
            .insert(msg.session_id.clone(), (user_id.clone(), msg.addr.clone()));
        let came_online = self.presence.add(&msg.session_id, msg.addr, msg.user.clone());

        if came_online {
            self.broadcast_all(
                "user_online",
                &serde_json::json!({ "userId": user_id, "user": msg.user }),
            );
        }
    }
}

impl Handler<Disconnect> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) {
        info!("Chat session disconnected: {}", msg.session_id);

        self.sessions.remove(&msg.session_id);
        for members in self.rooms.values_mut() {
            members.remove(&msg.session_id);
        }
        self.rooms.retain(|_, members| !members.is_empty());

        let went_offline = self.presence.remove(&msg.user_id, &msg.session_id);
        if went_offline {
            self.broadcast_all(
                "user_offline",
                &serde_json::json!({ "userId": msg.user_id }),
            );
        }
    }
}

impl Handler<JoinChat> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: JoinChat, _: &mut Context<Self>) {
        self.rooms
            .entry(msg.chat_id)
            .or_default()
            .insert(msg.session_id);
    }
}

impl Handler<LeaveChat> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: LeaveChat, _: &mut Context<Self>) {
        if let Some(members) = self.rooms.get_mut(&msg.chat_id) {
            members.remove(&msg.session_id);
            if members.is_empty() {
                self.rooms.remove(&msg.chat_id);
            }
        }
    }
}

impl Handler<RoomBroadcast> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: RoomBroadcast, _: &mut Context<Self>) {
        let members = match self.rooms.get(&msg.chat_id) {
            Some(members) => members,
            None => return,
        };
        let frame = envelope(&msg.event, &msg.payload);

        for session_id in members {
            if msg.skip_session.as_deref() == Some(session_id.as_str()) {
                continue;
            }
            if let Some((user_id, addr)) = self.sessions.get(session_id) {
                if msg.skip_user.as_deref() == Some(user_id.as_str()) {
                    continue;
                }
                addr.do_send(Frame(frame.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn profile(user_id: &str) -> PublicUser {
        PublicUser {
            user_id: user_id.to_string(),
            name: user_id.to_string(),
            email: format!("{}@example.com", user_id),
            role: Role::TeamMember,
            team_id: None,
        }
    }

    #[test]
    fn first_session_brings_user_online() {
        let mut directory: PresenceDirectory<()> = PresenceDirectory::new();
        assert!(directory.add("s1", (), profile("alice")));
        assert!(directory.is_online("alice"));
        // A second tab is not a second online transition.
        assert!(!directory.add("s2", (), profile("alice")));
    }

    #[test]
    fn last_session_takes_user_offline() {
        let mut directory: PresenceDirectory<()> = PresenceDirectory::new();
        directory.add("s1", (), profile("alice"));
        directory.add("s2", (), profile("alice"));
        assert!(!directory.remove("alice", "s1"));
        assert!(directory.is_online("alice"));
        assert!(directory.remove("alice", "s2"));
        assert!(!directory.is_online("alice"));
    }

    #[test]
    fn removing_unknown_session_is_a_noop() {
        let mut directory: PresenceDirectory<()> = PresenceDirectory::new();
        directory.add("s1", (), profile("alice"));
        assert!(!directory.remove("alice", "s9"));
        assert!(!directory.remove("bob", "s1"));
        assert!(directory.is_online("alice"));
    }

    #[test]
    fn envelope_carries_event_name_verbatim() {
        let frame = envelope("message_read_receipt", &serde_json::json!({ "chatId": "c1" }));
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["event"], "message_read_receipt");
        assert_eq!(parsed["data"]["chatId"], "c1");
    }
}
