use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;

use tokio::sync::mpsc;

use crate::signal::OutboundMessage;

pub type Outbox = mpsc::UnboundedSender<String>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ConnectionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            _ => None,
        }
    }
}

pub struct Client {
    pub id: ConnectionId,
    pub role: Option<Role>,
    pub user_id: Option<String>,
    pub classe: Option<String>,
    tx: Outbox,
}

impl Client {
    pub fn new(id: ConnectionId, tx: Outbox) -> Self {
        Self {
            id,
            role: None,
            user_id: None,
            classe: None,
            tx,
        }
    }

    pub fn is_teacher(&self) -> bool {
        self.role == Some(Role::Teacher)
    }

    pub fn is_student(&self) -> bool {
        self.role == Some(Role::Student)
    }

    /// The id a teacher is known by: its user id, falling back to the connection id.
    pub fn identity(&self) -> &str {
        self.user_id.as_deref().unwrap_or(self.id.as_str())
    }

    // false once the socket writer is gone
    fn send_text(&self, text: String) -> bool {
        self.tx.send(text).is_ok()
    }
}

#[derive(Default)]
pub struct Registry {
    by_id: HashMap<ConnectionId, Client>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, client: Client) {
        self.by_id.insert(client.id.clone(), client);
    }

    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.by_id.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Client> {
        self.by_id.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Client> {
        self.by_id.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn find_by_user_id(&self, user_id: &str) -> Option<&Client> {
        self.by_id
            .values()
            .find(|c| c.user_id.as_deref() == Some(user_id))
    }

    pub fn send_to(&self, id: &str, msg: &OutboundMessage) -> bool {
        let Some(client) = self.by_id.get(id) else {
            tracing::debug!(target_id = %id, "dropping message for unknown connection");
            return false;
        };
        let Some(text) = msg.to_text() else {
            return false;
        };
        let delivered = client.send_text(text);
        if !delivered {
            tracing::debug!(target_id = %id, "connection closed before delivery");
        }
        delivered
    }

    /// Sends to every student whose class is in `target_classes`; an empty
    /// list reaches all students. Returns the number of queued deliveries.
    pub fn broadcast_to_students(&self, msg: &OutboundMessage, target_classes: &[String]) -> usize {
        let Some(text) = msg.to_text() else {
            return 0;
        };
        let mut delivered = 0;
        for client in self.by_id.values().filter(|c| c.is_student()) {
            if !class_admitted(target_classes, client.classe.as_deref()) {
                continue;
            }
            if client.send_text(text.clone()) {
                delivered += 1;
            } else {
                tracing::debug!(client_id = %client.id, "student closed before delivery");
            }
        }
        delivered
    }
}

pub fn class_admitted(target_classes: &[String], classe: Option<&str>) -> bool {
    if target_classes.is_empty() {
        return true;
    }
    match classe {
        Some(classe) => target_classes.iter().any(|c| c == classe),
        None => false,
    }
}
