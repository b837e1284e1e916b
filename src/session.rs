use crate::registry::class_admitted;

/// The single teacher-to-class broadcast a relay tracks.
///
/// Active exactly when a teacher id is recorded, so an active session
/// without an owner cannot be represented.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastSession {
    teacher_id: Option<String>,
    target_classes: Vec<String>,
}

impl BroadcastSession {
    pub fn is_active(&self) -> bool {
        self.teacher_id.is_some()
    }

    pub fn teacher_id(&self) -> Option<&str> {
        self.teacher_id.as_deref()
    }

    /// Classes the current (or last cleared) broadcast targets. Empty means everyone.
    pub fn target_classes(&self) -> &[String] {
        &self.target_classes
    }

    /// Replaces whatever was being broadcast before.
    pub fn start(&mut self, teacher_id: impl Into<String>, target_classes: Vec<String>) {
        self.teacher_id = Some(teacher_id.into());
        self.target_classes = target_classes;
    }

    pub fn clear(&mut self) {
        self.teacher_id = None;
        self.target_classes.clear();
    }

    pub fn is_owned_by(&self, identity: &str) -> bool {
        self.teacher_id.as_deref() == Some(identity)
    }

    /// Whether a student in `classe` should see this broadcast.
    pub fn admits(&self, classe: Option<&str>) -> bool {
        self.is_active() && class_admitted(&self.target_classes, classe)
    }
}
