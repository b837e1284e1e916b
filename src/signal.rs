//! Wire protocol spoken on the signaling socket.
//!
//! Every frame is a JSON object with a `type` field. Negotiation payloads
//! (SDP, ICE candidates) are carried as opaque [`Value`]s and never inspected.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{RelayError, Result};

/// Messages a browser peer sends to the relay.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum InboundMessage {
    Register {
        #[serde(default)]
        role: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        user_id: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        classe: Option<String>,
    },
    StartShare {
        #[serde(default)]
        target_classes: Option<Vec<String>>,
    },
    StopShare {},
    Offer {
        #[serde(default)]
        payload: Option<Value>,
    },
    Answer {
        #[serde(default)]
        payload: Option<Value>,
        #[serde(default)]
        to: Option<String>,
    },
    IceCandidate {
        #[serde(default)]
        payload: Option<Value>,
        #[serde(default)]
        to: Option<String>,
    },
    RequestStudentScreen {
        #[serde(default, deserialize_with = "lenient_string")]
        student_id: Option<String>,
    },
    StudentScreenOffer {
        #[serde(default)]
        payload: Option<Value>,
        #[serde(default)]
        to: Option<String>,
        #[serde(default)]
        link_id: Option<String>,
    },
    StudentScreenAnswer {
        #[serde(default)]
        payload: Option<Value>,
        #[serde(default)]
        to: Option<String>,
        #[serde(default)]
        link_id: Option<String>,
    },
    StudentScreenIce {
        #[serde(default)]
        payload: Option<Value>,
        #[serde(default)]
        to: Option<String>,
        #[serde(default)]
        link_id: Option<String>,
    },
    DeclineScreenRequest {
        #[serde(default)]
        teacher_id: Option<String>,
        #[serde(default)]
        link_id: Option<String>,
    },
    CloseStudentScreen {
        #[serde(default)]
        link_id: Option<String>,
    },
    Ping {},
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Parses one text frame.
    ///
    /// Frames that are not JSON objects with a string `type` are rejected;
    /// a well-formed frame with an unrecognised type becomes [`InboundMessage::Unknown`].
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        match value.get("type") {
            Some(Value::String(_)) => Ok(serde_json::from_value(value)?),
            _ => Err(RelayError::MissingType),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Register { .. } => "register",
            InboundMessage::StartShare { .. } => "start-share",
            InboundMessage::StopShare {} => "stop-share",
            InboundMessage::Offer { .. } => "offer",
            InboundMessage::Answer { .. } => "answer",
            InboundMessage::IceCandidate { .. } => "ice-candidate",
            InboundMessage::RequestStudentScreen { .. } => "request-student-screen",
            InboundMessage::StudentScreenOffer { .. } => "student-screen-offer",
            InboundMessage::StudentScreenAnswer { .. } => "student-screen-answer",
            InboundMessage::StudentScreenIce { .. } => "student-screen-ice",
            InboundMessage::DeclineScreenRequest { .. } => "decline-screen-request",
            InboundMessage::CloseStudentScreen { .. } => "close-student-screen",
            InboundMessage::Ping {} => "ping",
            InboundMessage::Unknown => "unknown",
        }
    }
}

// user ids and class labels arrive as strings or numbers; anything else counts as absent
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
        Other(serde::de::IgnoredAny),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Text(s)) => Some(s),
        Some(Raw::Number(n)) => Some(n.to_string()),
        Some(Raw::Other(_)) | None => None,
    })
}

/// Messages the relay sends to peers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    Connected {
        client_id: String,
    },
    TeacherSharing {
        payload: SharingNotice,
    },
    StopShare {
        payload: Empty,
    },
    Offer {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        from: String,
    },
    Answer {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        from: String,
    },
    IceCandidate {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        from: String,
    },
    ScreenRequest {
        payload: ScreenRequest,
    },
    StudentScreenOffer {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        from: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        student_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        link_id: Option<String>,
    },
    StudentScreenAnswer {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        from: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        link_id: Option<String>,
    },
    StudentScreenIce {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        from: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        link_id: Option<String>,
    },
    StudentDeclined {
        payload: Declined,
    },
    StudentScreenClosed {
        payload: LinkClosed,
    },
    Pong {},
}

impl OutboundMessage {
    pub fn stop_share() -> Self {
        OutboundMessage::StopShare { payload: Empty {} }
    }

    pub fn teacher_sharing(teacher_id: impl Into<String>) -> Self {
        OutboundMessage::TeacherSharing {
            payload: SharingNotice {
                active: true,
                teacher_id: teacher_id.into(),
            },
        }
    }

    pub fn to_text(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize outbound message");
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Empty {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharingNotice {
    pub active: bool,
    pub teacher_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenRequest {
    pub teacher_id: String,
    pub link_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Declined {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseReason {
    Closed,
    Declined,
    Disconnected,
    Superseded,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkClosed {
    pub link_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    pub reason: CloseReason,
}
