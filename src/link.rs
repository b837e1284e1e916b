//! Reverse screen viewing links.
//!
//! Each teacher-to-student view is tracked as its own entity under a
//! generated id, so a teacher can watch several students at once and a
//! student reconnecting does not inherit a stale negotiation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::registry::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Requested,
    Offering,
    Answered,
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Offer,
    Answer,
    // first candidate after the answer
    Ice,
}

impl LinkState {
    /// Out-of-order events leave the state unchanged.
    pub fn on(self, event: LinkEvent) -> LinkState {
        match (self, event) {
            (LinkState::Requested, LinkEvent::Offer) => LinkState::Offering,
            (LinkState::Offering, LinkEvent::Answer) => LinkState::Answered,
            (LinkState::Answered, LinkEvent::Ice) => LinkState::Active,
            (state, _) => state,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScreenLink {
    pub id: String,
    pub teacher: ConnectionId,
    pub student: ConnectionId,
    pub student_user_id: Option<String>,
    pub state: LinkState,
    seq: u64,
    last_activity: Instant,
}

impl ScreenLink {
    pub fn advance(&mut self, event: LinkEvent, now: Instant) {
        let next = self.state.on(event);
        if next != self.state {
            tracing::debug!(link_id = %self.id, from = ?self.state, to = ?next, "screen link state change");
            self.state = next;
        }
        self.last_activity = now;
    }

    pub fn peer_of(&self, conn: &str) -> Option<&ConnectionId> {
        if self.teacher.as_str() == conn {
            Some(&self.student)
        } else if self.student.as_str() == conn {
            Some(&self.teacher)
        } else {
            None
        }
    }

    pub fn involves(&self, conn: &str) -> bool {
        self.peer_of(conn).is_some()
    }

    /// Negotiations that never reach `Active` are abandoned after `timeout`.
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        self.state != LinkState::Active && now.saturating_duration_since(self.last_activity) >= timeout
    }
}

#[derive(Debug, Default)]
pub struct LinkTable {
    links: HashMap<String, ScreenLink>,
    next_seq: u64,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ScreenLink> {
        self.links.get(id)
    }

    pub fn open(
        &mut self,
        teacher: ConnectionId,
        student: ConnectionId,
        student_user_id: Option<String>,
        now: Instant,
    ) -> &ScreenLink {
        let id = format!("link-{}", Uuid::new_v4().simple());
        self.next_seq += 1;
        let link = ScreenLink {
            id: id.clone(),
            teacher,
            student,
            student_user_id,
            state: LinkState::Requested,
            seq: self.next_seq,
            last_activity: now,
        };
        self.links.entry(id).or_insert(link)
    }

    /// Finds the link between `teacher` and `student`.
    ///
    /// An explicit `link_id` must name a link between exactly those two
    /// connections; without one the most recently opened link of the pair wins.
    pub fn resolve(&mut self, link_id: Option<&str>, teacher: &str, student: &str) -> Option<&mut ScreenLink> {
        let belongs = |l: &ScreenLink| l.teacher.as_str() == teacher && l.student.as_str() == student;
        match link_id {
            Some(id) => self.links.get_mut(id).filter(|l| belongs(l)),
            None => self
                .links
                .values_mut()
                .filter(|l| belongs(l))
                .max_by_key(|l| l.seq),
        }
    }

    pub fn close(&mut self, id: &str) -> Option<ScreenLink> {
        self.links.remove(id).map(|mut link| {
            link.state = LinkState::Closed;
            link
        })
    }

    /// Retires every link between `teacher` and `student`.
    pub fn close_pair(&mut self, teacher: &str, student: &str) -> Vec<ScreenLink> {
        self.close_where(|l| l.teacher.as_str() == teacher && l.student.as_str() == student)
    }

    pub fn close_involving(&mut self, conn: &str) -> Vec<ScreenLink> {
        self.close_where(|l| l.involves(conn))
    }

    pub fn close_stale(&mut self, now: Instant, timeout: Duration) -> Vec<ScreenLink> {
        self.close_where(|l| l.is_stale(now, timeout))
    }

    fn close_where(&mut self, pred: impl Fn(&ScreenLink) -> bool) -> Vec<ScreenLink> {
        let ids: Vec<String> = self
            .links
            .values()
            .filter(|l| pred(l))
            .map(|l| l.id.clone())
            .collect();
        ids.iter().filter_map(|id| self.close(id)).collect()
    }
}
