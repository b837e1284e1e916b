//! The signaling state machine.
//!
//! A [`Relay`] owns the client registry, the broadcast session and the
//! reverse-screen links. Every event is handled synchronously to completion;
//! callers serialize access (see [`crate::app_state::AppState`]).

use std::time::{Duration, Instant};

use serde_json::Value;
use uuid::Uuid;

use crate::link::{LinkEvent, LinkTable, ScreenLink};
use crate::registry::{Client, ConnectionId, Outbox, Registry, Role};
use crate::session::BroadcastSession;
use crate::signal::{CloseReason, Declined, InboundMessage, LinkClosed, OutboundMessage, ScreenRequest};

pub struct Relay {
    clients: Registry,
    session: BroadcastSession,
    links: LinkTable,
    link_timeout: Duration,
    next_seq: u64,
}

impl Relay {
    pub fn new(link_timeout: Duration) -> Self {
        Self {
            clients: Registry::new(),
            session: BroadcastSession::default(),
            links: LinkTable::new(),
            link_timeout,
            next_seq: 0,
        }
    }

    pub fn session(&self) -> &BroadcastSession {
        &self.session
    }

    pub fn client(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn link(&self, id: &str) -> Option<&ScreenLink> {
        self.links.get(id)
    }

    pub fn connect(&mut self, tx: Outbox) -> ConnectionId {
        self.next_seq += 1;
        let id = ConnectionId::new(format!("client-{:x}-{}", self.next_seq, Uuid::new_v4().simple()));
        self.clients.insert(Client::new(id.clone(), tx));
        self.clients.send_to(
            id.as_str(),
            &OutboundMessage::Connected {
                client_id: id.to_string(),
            },
        );
        tracing::info!(client_id = %id, clients = self.clients.len(), "client connected");
        id
    }

    // malformed frames are logged and dropped, the connection stays up
    pub fn handle_text(&mut self, from: &ConnectionId, raw: &str) {
        match InboundMessage::parse(raw) {
            Ok(msg) => self.handle(from, msg),
            Err(e) => tracing::warn!(client_id = %from, error = %e, "dropping malformed message"),
        }
    }

    pub fn handle(&mut self, from: &ConnectionId, msg: InboundMessage) {
        if !self.clients.contains(from.as_str()) {
            tracing::debug!(client_id = %from, kind = msg.kind(), "message from unknown connection");
            return;
        }
        tracing::debug!(client_id = %from, kind = msg.kind(), "handling message");
        let now = Instant::now();
        match msg {
            InboundMessage::Register { role, user_id, classe } => self.register(from, role, user_id, classe),
            InboundMessage::StartShare { target_classes } => self.start_share(from, target_classes.unwrap_or_default()),
            InboundMessage::StopShare {} => self.stop_share(from),
            InboundMessage::Offer { payload } => {
                let msg = OutboundMessage::Offer {
                    payload,
                    from: from.to_string(),
                };
                self.clients.broadcast_to_students(&msg, self.session.target_classes());
            }
            InboundMessage::Answer { payload, to } => {
                if let Some(to) = to {
                    let msg = OutboundMessage::Answer {
                        payload,
                        from: from.to_string(),
                    };
                    self.clients.send_to(&to, &msg);
                }
            }
            InboundMessage::IceCandidate { payload, to } => {
                let msg = OutboundMessage::IceCandidate {
                    payload,
                    from: from.to_string(),
                };
                match to {
                    Some(to) => {
                        self.clients.send_to(&to, &msg);
                    }
                    None => {
                        self.clients.broadcast_to_students(&msg, self.session.target_classes());
                    }
                }
            }
            InboundMessage::RequestStudentScreen { student_id } => {
                if let Some(student_id) = student_id {
                    self.request_student_screen(from, &student_id, now);
                }
            }
            InboundMessage::StudentScreenOffer { payload, to, link_id } => {
                if let Some(to) = to {
                    self.student_screen_offer(from, &to, link_id.as_deref(), payload, now);
                }
            }
            InboundMessage::StudentScreenAnswer { payload, to, link_id } => {
                if let Some(to) = to {
                    let link_id = self.advance_link(link_id.as_deref(), from.as_str(), &to, LinkEvent::Answer, now);
                    let msg = OutboundMessage::StudentScreenAnswer {
                        payload,
                        from: from.to_string(),
                        link_id,
                    };
                    self.clients.send_to(&to, &msg);
                }
            }
            InboundMessage::StudentScreenIce { payload, to, link_id } => {
                if let Some(to) = to {
                    let link_id = self.advance_ice(link_id.as_deref(), from.as_str(), &to, now);
                    let msg = OutboundMessage::StudentScreenIce {
                        payload,
                        from: from.to_string(),
                        link_id,
                    };
                    self.clients.send_to(&to, &msg);
                }
            }
            InboundMessage::DeclineScreenRequest { teacher_id, link_id } => {
                if let Some(teacher_id) = teacher_id {
                    self.decline_screen_request(from, &teacher_id, link_id.as_deref());
                }
            }
            InboundMessage::CloseStudentScreen { link_id } => {
                if let Some(link_id) = link_id {
                    self.close_student_screen(from, &link_id);
                }
            }
            InboundMessage::Ping {} => {
                self.clients.send_to(from.as_str(), &OutboundMessage::Pong {});
            }
            InboundMessage::Unknown => {
                tracing::debug!(client_id = %from, "ignoring unknown message type");
            }
        }
    }

    pub fn disconnect(&mut self, id: &ConnectionId) {
        let Some(client) = self.clients.remove(id.as_str()) else {
            return;
        };
        tracing::info!(client_id = %id, clients = self.clients.len(), "client disconnected");

        if client.is_teacher() && self.session.is_owned_by(client.identity()) {
            tracing::info!(client_id = %id, teacher_id = %client.identity(), "sharing teacher left, ending broadcast");
            self.session.clear();
            self.clients.broadcast_to_students(&OutboundMessage::stop_share(), &[]);
        }

        for link in self.links.close_involving(id.as_str()) {
            if let Some(peer) = link.peer_of(id.as_str()) {
                self.notify_closed(peer, &link, CloseReason::Disconnected);
            }
            tracing::info!(link_id = %link.id, "screen link closed by disconnect");
        }
    }

    pub fn expire_links(&mut self, now: Instant) -> usize {
        let expired = self.links.close_stale(now, self.link_timeout);
        for link in &expired {
            tracing::info!(link_id = %link.id, state = ?link.state, "screen link timed out");
            self.notify_closed(&link.teacher, link, CloseReason::Timeout);
            self.notify_closed(&link.student, link, CloseReason::Timeout);
        }
        expired.len()
    }

    fn register(&mut self, from: &ConnectionId, role: Option<String>, user_id: Option<String>, classe: Option<String>) {
        let parsed_role = role.as_deref().and_then(Role::parse);
        if role.is_some() && parsed_role.is_none() {
            tracing::debug!(client_id = %from, role = ?role, "unrecognised role");
        }
        let Some(client) = self.clients.get_mut(from.as_str()) else {
            return;
        };
        client.role = parsed_role;
        client.user_id = user_id;
        client.classe = classe;
        tracing::info!(
            client_id = %from,
            role = ?client.role,
            user_id = ?client.user_id,
            classe = ?client.classe,
            "client registered"
        );

        let late_joiner = client.is_student() && self.session.admits(client.classe.as_deref());
        if late_joiner {
            if let Some(teacher_id) = self.session.teacher_id() {
                let notice = OutboundMessage::teacher_sharing(teacher_id);
                self.clients.send_to(from.as_str(), &notice);
            }
        }
    }

    fn start_share(&mut self, from: &ConnectionId, target_classes: Vec<String>) {
        let Some(teacher) = self.clients.get(from.as_str()).filter(|c| c.is_teacher()) else {
            tracing::debug!(client_id = %from, "start-share from non-teacher ignored");
            return;
        };
        let teacher_id = teacher.identity().to_owned();
        self.session.start(teacher_id.clone(), target_classes);
        let reached = self
            .clients
            .broadcast_to_students(&OutboundMessage::teacher_sharing(teacher_id.as_str()), self.session.target_classes());
        tracing::info!(
            teacher_id = %teacher_id,
            targets = ?self.session.target_classes(),
            students = reached,
            "broadcast started"
        );
    }

    fn stop_share(&mut self, from: &ConnectionId) {
        if !self.clients.get(from.as_str()).is_some_and(Client::is_teacher) {
            tracing::debug!(client_id = %from, "stop-share from non-teacher ignored");
            return;
        }
        self.session.clear();
        let reached = self.clients.broadcast_to_students(&OutboundMessage::stop_share(), &[]);
        tracing::info!(client_id = %from, students = reached, "broadcast stopped");
    }

    fn request_student_screen(&mut self, from: &ConnectionId, student_user_id: &str, now: Instant) {
        let Some(student) = self.clients.find_by_user_id(student_user_id) else {
            tracing::debug!(client_id = %from, student_id = %student_user_id, "requested student is not connected");
            return;
        };
        let student_conn = student.id.clone();
        // a fresh request replaces whatever view of this student the teacher had
        for old in self.links.close_pair(from.as_str(), student_conn.as_str()) {
            tracing::info!(link_id = %old.id, "screen link superseded");
            self.notify_closed(&student_conn, &old, CloseReason::Superseded);
        }
        let link = self
            .links
            .open(from.clone(), student_conn.clone(), Some(student_user_id.to_owned()), now);
        tracing::info!(link_id = %link.id, teacher = %from, student = %student_conn, "screen link requested");
        let msg = OutboundMessage::ScreenRequest {
            payload: ScreenRequest {
                teacher_id: from.to_string(),
                link_id: link.id.clone(),
            },
        };
        self.clients.send_to(student_conn.as_str(), &msg);
    }

    fn student_screen_offer(
        &mut self,
        from: &ConnectionId,
        to: &str,
        link_id: Option<&str>,
        payload: Option<Value>,
        now: Instant,
    ) {
        let link_id = self.advance_link(link_id, to, from.as_str(), LinkEvent::Offer, now);
        let student_id = self.clients.get(from.as_str()).and_then(|c| c.user_id.clone());
        let msg = OutboundMessage::StudentScreenOffer {
            payload,
            from: from.to_string(),
            student_id,
            link_id,
        };
        self.clients.send_to(to, &msg);
    }

    // candidates flow both ways
    fn advance_ice(&mut self, link_id: Option<&str>, from: &str, to: &str, now: Instant) -> Option<String> {
        self.advance_link(link_id, from, to, LinkEvent::Ice, now)
            .or_else(|| self.advance_link(link_id, to, from, LinkEvent::Ice, now))
    }

    fn advance_link(
        &mut self,
        link_id: Option<&str>,
        teacher: &str,
        student: &str,
        event: LinkEvent,
        now: Instant,
    ) -> Option<String> {
        let link = self.links.resolve(link_id, teacher, student)?;
        link.advance(event, now);
        Some(link.id.clone())
    }

    fn decline_screen_request(&mut self, from: &ConnectionId, teacher_id: &str, link_id: Option<&str>) {
        let link_id = self
            .links
            .resolve(link_id, teacher_id, from.as_str())
            .map(|l| l.id.clone());
        if let Some(id) = &link_id {
            self.links.close(id);
            tracing::info!(link_id = %id, "screen request declined");
        }
        let student_id = self.clients.get(from.as_str()).and_then(|c| c.user_id.clone());
        let msg = OutboundMessage::StudentDeclined {
            payload: Declined { student_id, link_id },
        };
        self.clients.send_to(teacher_id, &msg);
    }

    fn close_student_screen(&mut self, from: &ConnectionId, link_id: &str) {
        if !self.links.get(link_id).is_some_and(|l| l.involves(from.as_str())) {
            tracing::debug!(client_id = %from, link_id = %link_id, "close for unknown or foreign link ignored");
            return;
        }
        if let Some(link) = self.links.close(link_id) {
            if let Some(peer) = link.peer_of(from.as_str()) {
                self.notify_closed(peer, &link, CloseReason::Closed);
            }
            tracing::info!(link_id = %link.id, "screen link closed");
        }
    }

    fn notify_closed(&self, to: &ConnectionId, link: &ScreenLink, reason: CloseReason) {
        let msg = OutboundMessage::StudentScreenClosed {
            payload: LinkClosed {
                link_id: link.id.clone(),
                student_id: link.student_user_id.clone(),
                reason,
            },
        };
        self.clients.send_to(to.as_str(), &msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Peer {
        id: ConnectionId,
        rx: mpsc::UnboundedReceiver<String>,
    }

    impl Peer {
        fn recv(&mut self) -> Option<Value> {
            self.rx.try_recv().ok().map(|text| serde_json::from_str(&text).unwrap())
        }

        fn drain(&mut self) -> Vec<Value> {
            std::iter::from_fn(|| self.recv()).collect()
        }
    }

    fn relay() -> Relay {
        Relay::new(Duration::from_secs(60))
    }

    fn connect(relay: &mut Relay) -> Peer {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = relay.connect(tx);
        let mut peer = Peer { id, rx };
        assert_eq!(peer.recv().unwrap()["type"], "connected");
        peer
    }

    fn send(relay: &mut Relay, peer: &Peer, msg: Value) {
        relay.handle_text(&peer.id, &msg.to_string());
    }

    fn register(relay: &mut Relay, role: &str, user_id: Option<&str>, classe: Option<&str>) -> Peer {
        let peer = connect(relay);
        send(relay, &peer, json!({"type": "register", "role": role, "userId": user_id, "classe": classe}));
        peer
    }

    #[test]
    fn connect_acknowledges_with_unique_ids() {
        let mut relay = relay();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let a = relay.connect(tx.clone());
        let b = relay.connect(tx);

        assert_ne!(a, b);
        assert!(a.as_str().starts_with("client-"));
        let ack: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(ack, json!({"type": "connected", "clientId": a.as_str()}));
        assert_eq!(relay.client(a.as_str()).unwrap().role, None);
        assert_eq!(relay.client_count(), 2);
    }

    #[test]
    fn latest_register_wins() {
        let mut relay = relay();
        let peer = register(&mut relay, "student", Some("s1"), Some("6e"));
        send(&mut relay, &peer, json!({"type": "register", "role": "teacher", "userId": "t9"}));

        let client = relay.client(peer.id.as_str()).unwrap();
        assert_eq!(client.role, Some(Role::Teacher));
        assert_eq!(client.user_id.as_deref(), Some("t9"));
        assert_eq!(client.classe, None);
    }

    #[test]
    fn malformed_input_is_dropped_and_connection_kept() {
        let mut relay = relay();
        let mut peer = register(&mut relay, "student", Some("s1"), None);

        relay.handle_text(&peer.id, "{not json");
        relay.handle_text(&peer.id, r#"{"payload":{}}"#);
        relay.handle_text(&peer.id, r#"{"type":"mystery"}"#);

        assert!(relay.client(peer.id.as_str()).is_some());
        assert!(peer.drain().is_empty());
        send(&mut relay, &peer, json!({"type": "ping"}));
        assert_eq!(peer.recv().unwrap(), json!({"type": "pong"}));
    }

    #[test]
    fn late_joiner_in_target_class_is_told_about_broadcast() {
        let mut relay = relay();
        let teacher = register(&mut relay, "teacher", Some("t1"), None);
        send(&mut relay, &teacher, json!({"type": "start-share", "targetClasses": ["6e"]}));

        let mut a = register(&mut relay, "student", Some("a"), Some("6e"));
        let mut b = register(&mut relay, "student", Some("b"), Some("5e"));

        assert_eq!(
            a.drain(),
            vec![json!({"type": "teacher-sharing", "payload": {"active": true, "teacherId": "t1"}})]
        );
        assert!(b.drain().is_empty());
    }

    #[test]
    fn broadcast_offer_reaches_only_target_classes() {
        let mut relay = relay();
        let teacher = register(&mut relay, "teacher", Some("t1"), None);
        send(&mut relay, &teacher, json!({"type": "start-share", "targetClasses": ["6e"]}));
        let mut a = register(&mut relay, "student", Some("a"), Some("6e"));
        let mut b = register(&mut relay, "student", Some("b"), Some("5e"));
        a.drain();

        send(&mut relay, &teacher, json!({"type": "offer", "payload": {"sdp": "X"}}));

        assert_eq!(
            a.drain(),
            vec![json!({"type": "offer", "payload": {"sdp": "X"}, "from": teacher.id.as_str()})]
        );
        assert!(b.drain().is_empty());
    }

    #[test]
    fn start_share_notifies_matching_students_and_ignores_non_teachers() {
        let mut relay = relay();
        let mut a = register(&mut relay, "student", Some("a"), Some("6e"));
        let mut b = register(&mut relay, "student", Some("b"), None);
        let teacher = register(&mut relay, "teacher", None, None);

        send(&mut relay, &a, json!({"type": "start-share"}));
        assert!(!relay.session().is_active());

        send(&mut relay, &teacher, json!({"type": "start-share"}));
        let expected = json!({"type": "teacher-sharing", "payload": {"active": true, "teacherId": teacher.id.as_str()}});
        assert_eq!(a.drain(), vec![expected.clone()]);
        assert_eq!(b.drain(), vec![expected]);
        assert_eq!(relay.session().teacher_id(), Some(teacher.id.as_str()));
    }

    #[test]
    fn stop_share_always_reaches_every_student() {
        let mut relay = relay();
        let teacher = register(&mut relay, "teacher", Some("t1"), None);
        let mut a = register(&mut relay, "student", Some("a"), Some("6e"));
        let mut b = register(&mut relay, "student", Some("b"), Some("5e"));

        send(&mut relay, &teacher, json!({"type": "stop-share"}));
        assert_eq!(a.drain(), vec![json!({"type": "stop-share", "payload": {}})]);
        assert_eq!(b.drain().len(), 1);

        send(&mut relay, &teacher, json!({"type": "start-share", "targetClasses": ["6e"]}));
        a.drain();
        send(&mut relay, &teacher, json!({"type": "stop-share"}));
        assert!(!relay.session().is_active());
        assert!(relay.session().target_classes().is_empty());
        assert_eq!(a.drain().len(), 1);
        assert_eq!(b.drain(), vec![json!({"type": "stop-share", "payload": {}})]);

        send(&mut relay, &a, json!({"type": "stop-share"}));
        assert!(b.drain().is_empty());
    }

    #[test]
    fn sharing_teacher_disconnect_ends_broadcast_once() {
        let mut relay = relay();
        let teacher = register(&mut relay, "teacher", Some("t1"), None);
        send(&mut relay, &teacher, json!({"type": "start-share", "targetClasses": ["6e"]}));
        let mut a = register(&mut relay, "student", Some("a"), Some("6e"));
        let mut b = register(&mut relay, "student", Some("b"), Some("5e"));
        a.drain();

        relay.disconnect(&teacher.id);

        assert!(!relay.session().is_active());
        assert_eq!(a.drain(), vec![json!({"type": "stop-share", "payload": {}})]);
        assert_eq!(b.drain(), vec![json!({"type": "stop-share", "payload": {}})]);

        let mut c = register(&mut relay, "student", Some("c"), Some("6e"));
        assert!(c.drain().is_empty());
    }

    #[test]
    fn teacher_without_user_id_is_matched_by_connection_id_on_disconnect() {
        let mut relay = relay();
        let teacher = register(&mut relay, "teacher", None, None);
        let mut a = register(&mut relay, "student", Some("a"), None);
        send(&mut relay, &teacher, json!({"type": "start-share"}));
        a.drain();

        relay.disconnect(&teacher.id);

        assert!(!relay.session().is_active());
        assert_eq!(a.drain().len(), 1);
    }

    #[test]
    fn other_teacher_disconnect_leaves_broadcast_running() {
        let mut relay = relay();
        let sharing = register(&mut relay, "teacher", Some("t1"), None);
        let other = register(&mut relay, "teacher", Some("t2"), None);
        let mut a = register(&mut relay, "student", Some("a"), None);
        send(&mut relay, &sharing, json!({"type": "start-share"}));
        a.drain();

        relay.disconnect(&other.id);

        assert!(relay.session().is_owned_by("t1"));
        assert!(a.drain().is_empty());
        assert!(relay.client(other.id.as_str()).is_none());
    }

    #[test]
    fn answer_and_ice_unicast_by_connection_id() {
        let mut relay = relay();
        let mut teacher = register(&mut relay, "teacher", Some("t1"), None);
        let mut a = register(&mut relay, "student", Some("a"), None);
        let mut b = register(&mut relay, "student", Some("b"), None);

        send(&mut relay, &a, json!({"type": "answer", "payload": "A", "to": teacher.id.as_str()}));
        assert_eq!(
            teacher.drain(),
            vec![json!({"type": "answer", "payload": "A", "from": a.id.as_str()})]
        );

        send(&mut relay, &teacher, json!({"type": "ice-candidate", "payload": "C", "to": a.id.as_str()}));
        assert_eq!(a.drain().len(), 1);
        assert!(b.drain().is_empty());

        send(&mut relay, &teacher, json!({"type": "ice-candidate", "payload": "C"}));
        assert_eq!(a.drain().len(), 1);
        assert_eq!(b.drain().len(), 1);

        send(&mut relay, &a, json!({"type": "answer", "payload": "A", "to": "client-gone"}));
        send(&mut relay, &a, json!({"type": "answer", "payload": "A"}));
        assert!(teacher.drain().is_empty());
    }

    #[test]
    fn untargeted_ice_follows_class_filter() {
        let mut relay = relay();
        let teacher = register(&mut relay, "teacher", Some("t1"), None);
        send(&mut relay, &teacher, json!({"type": "start-share", "targetClasses": ["6e"]}));
        let mut a = register(&mut relay, "student", Some("a"), Some("6e"));
        let mut b = register(&mut relay, "student", Some("b"), Some("5e"));
        let mut c = register(&mut relay, "student", Some("c"), None);
        a.drain();

        send(&mut relay, &teacher, json!({"type": "ice-candidate", "payload": {"candidate": "x"}}));

        assert_eq!(
            a.drain(),
            vec![json!({"type": "ice-candidate", "payload": {"candidate": "x"}, "from": teacher.id.as_str()})]
        );
        assert!(b.drain().is_empty());
        assert!(c.drain().is_empty());
    }

    #[test]
    fn screen_request_for_absent_student_is_silent() {
        let mut relay = relay();
        let mut teacher = register(&mut relay, "teacher", Some("t1"), None);
        let mut a = register(&mut relay, "student", Some("a"), None);

        send(&mut relay, &teacher, json!({"type": "request-student-screen", "studentId": "s1"}));

        assert!(teacher.drain().is_empty());
        assert!(a.drain().is_empty());
        assert_eq!(relay.link_count(), 0);
    }

    #[test]
    fn reverse_screen_negotiation() {
        let mut relay = relay();
        let mut teacher = register(&mut relay, "teacher", Some("t1"), None);
        let mut student = register(&mut relay, "student", Some("s1"), Some("6e"));

        send(&mut relay, &teacher, json!({"type": "request-student-screen", "studentId": "s1"}));
        let request = student.recv().unwrap();
        assert_eq!(request["type"], "screen-request");
        assert_eq!(request["payload"]["teacherId"], teacher.id.as_str());
        let link_id = request["payload"]["linkId"].as_str().unwrap().to_owned();

        send(&mut relay, &student, json!({"type": "student-screen-offer", "payload": "Y", "to": teacher.id.as_str()}));
        assert_eq!(
            teacher.drain(),
            vec![json!({
                "type": "student-screen-offer",
                "payload": "Y",
                "from": student.id.as_str(),
                "studentId": "s1",
                "linkId": link_id,
            })]
        );

        send(&mut relay, &teacher, json!({"type": "student-screen-answer", "payload": "Z", "to": student.id.as_str()}));
        assert_eq!(
            student.drain(),
            vec![json!({"type": "student-screen-answer", "payload": "Z", "from": teacher.id.as_str(), "linkId": link_id})]
        );

        send(&mut relay, &student, json!({"type": "student-screen-ice", "payload": "I", "to": teacher.id.as_str()}));
        assert_eq!(teacher.drain()[0]["linkId"], link_id.as_str());
        assert_eq!(relay.link(&link_id).unwrap().state, crate::link::LinkState::Active);
    }

    fn view_student(relay: &mut Relay, teacher: &mut Peer, student: &mut Peer, user_id: &str) -> String {
        send(relay, teacher, json!({"type": "request-student-screen", "studentId": user_id}));
        let request = student.drain().pop().unwrap();
        let link_id = request["payload"]["linkId"].as_str().unwrap().to_owned();
        send(relay, student, json!({"type": "student-screen-offer", "payload": "O", "to": teacher.id.as_str()}));
        send(relay, teacher, json!({"type": "student-screen-answer", "payload": "A", "to": student.id.as_str()}));
        send(relay, student, json!({"type": "student-screen-ice", "payload": "I", "to": teacher.id.as_str()}));
        teacher.drain();
        link_id
    }

    #[test]
    fn repeated_views_of_one_student_keep_a_single_link() {
        let mut relay = relay();
        let mut teacher = register(&mut relay, "teacher", Some("t1"), None);
        let mut student = register(&mut relay, "student", Some("s1"), None);

        let mut previous = view_student(&mut relay, &mut teacher, &mut student, "s1");
        assert_eq!(relay.link(&previous).unwrap().state, crate::link::LinkState::Active);
        for _ in 0..4 {
            send(&mut relay, &teacher, json!({"type": "request-student-screen", "studentId": "s1"}));
            let notices = student.drain();
            assert_eq!(
                notices[0],
                json!({"type": "student-screen-closed", "payload": {"linkId": previous, "studentId": "s1", "reason": "superseded"}})
            );
            assert_eq!(notices[1]["type"], "screen-request");
            previous = notices[1]["payload"]["linkId"].as_str().unwrap().to_owned();
        }

        assert_eq!(relay.link_count(), 1);
        assert!(relay.link(&previous).is_some());
    }

    #[test]
    fn views_of_different_students_coexist() {
        let mut relay = relay();
        let mut teacher = register(&mut relay, "teacher", Some("t1"), None);
        let mut s1 = register(&mut relay, "student", Some("s1"), None);
        let mut s2 = register(&mut relay, "student", Some("s2"), None);

        view_student(&mut relay, &mut teacher, &mut s1, "s1");
        view_student(&mut relay, &mut teacher, &mut s2, "s2");

        assert_eq!(relay.link_count(), 2);
        assert!(s1.drain().is_empty());
    }

    #[test]
    fn student_screen_offer_without_link_is_still_relayed() {
        let mut relay = relay();
        let mut teacher = register(&mut relay, "teacher", Some("t1"), None);
        let student = register(&mut relay, "student", Some("s1"), None);

        send(&mut relay, &student, json!({"type": "student-screen-offer", "payload": "Y", "to": teacher.id.as_str()}));

        assert_eq!(
            teacher.drain(),
            vec![json!({"type": "student-screen-offer", "payload": "Y", "from": student.id.as_str(), "studentId": "s1"})]
        );
    }

    #[test]
    fn decline_closes_link_and_tells_teacher() {
        let mut relay = relay();
        let mut teacher = register(&mut relay, "teacher", Some("t1"), None);
        let mut student = register(&mut relay, "student", Some("s1"), None);
        send(&mut relay, &teacher, json!({"type": "request-student-screen", "studentId": "s1"}));
        let link_id = student.recv().unwrap()["payload"]["linkId"].clone();

        send(&mut relay, &student, json!({"type": "decline-screen-request", "teacherId": teacher.id.as_str()}));

        assert_eq!(
            teacher.drain(),
            vec![json!({"type": "student-declined", "payload": {"studentId": "s1", "linkId": link_id}})]
        );
        assert_eq!(relay.link_count(), 0);
    }

    #[test]
    fn explicit_close_notifies_the_other_party() {
        let mut relay = relay();
        let teacher = register(&mut relay, "teacher", Some("t1"), None);
        let mut student = register(&mut relay, "student", Some("s1"), None);
        let outsider = register(&mut relay, "student", Some("s2"), None);
        send(&mut relay, &teacher, json!({"type": "request-student-screen", "studentId": "s1"}));
        let link_id = student.recv().unwrap()["payload"]["linkId"].as_str().unwrap().to_owned();

        send(&mut relay, &outsider, json!({"type": "close-student-screen", "linkId": link_id}));
        assert_eq!(relay.link_count(), 1);

        send(&mut relay, &teacher, json!({"type": "close-student-screen", "linkId": link_id}));
        assert_eq!(
            student.drain(),
            vec![json!({"type": "student-screen-closed", "payload": {"linkId": link_id, "studentId": "s1", "reason": "closed"}})]
        );
        assert_eq!(relay.link_count(), 0);
    }

    #[test]
    fn disconnect_tears_down_screen_links() {
        let mut relay = relay();
        let mut teacher = register(&mut relay, "teacher", Some("t1"), None);
        let s1 = register(&mut relay, "student", Some("s1"), None);
        let mut s2 = register(&mut relay, "student", Some("s2"), None);
        send(&mut relay, &teacher, json!({"type": "request-student-screen", "studentId": "s1"}));
        send(&mut relay, &teacher, json!({"type": "request-student-screen", "studentId": "s2"}));
        s2.drain();
        assert_eq!(relay.link_count(), 2);

        relay.disconnect(&s1.id);
        let closed = teacher.drain();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0]["payload"]["reason"], "disconnected");
        assert_eq!(relay.link_count(), 1);

        relay.disconnect(&teacher.id);
        let closed = s2.drain();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0]["type"], "student-screen-closed");
        assert_eq!(relay.link_count(), 0);
    }

    #[test]
    fn stalled_negotiation_expires() {
        let mut relay = Relay::new(Duration::from_secs(10));
        let mut teacher = register(&mut relay, "teacher", Some("t1"), None);
        let mut student = register(&mut relay, "student", Some("s1"), None);
        send(&mut relay, &teacher, json!({"type": "request-student-screen", "studentId": "s1"}));
        student.drain();

        assert_eq!(relay.expire_links(Instant::now()), 0);
        assert_eq!(relay.expire_links(Instant::now() + Duration::from_secs(11)), 1);

        assert_eq!(teacher.drain()[0]["payload"]["reason"], "timeout");
        assert_eq!(student.drain()[0]["payload"]["reason"], "timeout");
        assert_eq!(relay.link_count(), 0);
    }
}
