//! Typed wire events
//!
//! Every message on a channel is a JSON object
//! `{ "type": string, "issue_id"?: string, "payload"?: object }`.
//! It is parsed exactly once here into [`StreamEvent`]; nothing downstream
//! branches on raw wire strings.

use crate::sse::SseFrame;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::fmt;

/// Named sub-stream a message arrived on (the SSE `event:` label)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Unlabelled messages
    Message,
    /// Issue mutations
    Mutations,
    /// Agent lifecycle
    Agents,
    /// Hook activity
    Hooks,
    /// Decision points
    Decisions,
    /// Agent mail
    Mail,
    /// Any label we do not know
    Other,
}

impl Channel {
    /// Map an SSE event label to a channel
    #[must_use]
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            None | Some("message") => Self::Message,
            Some("mutations" | "mutation") => Self::Mutations,
            Some("agents" | "agent") => Self::Agents,
            Some("hooks" | "hook") => Self::Hooks,
            Some("decisions" | "decision") => Self::Decisions,
            Some("mail") => Self::Mail,
            Some(_) => Self::Other,
        }
    }

    /// Canonical label
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Mutations => "mutations",
            Self::Agents => "agents",
            Self::Hooks => "hooks",
            Self::Decisions => "decisions",
            Self::Mail => "mail",
            Self::Other => "other",
        }
    }

    /// Whether mutation events may arrive on this channel
    #[inline]
    #[must_use]
    pub fn carries_mutations(&self) -> bool {
        matches!(self, Self::Message | Self::Mutations)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of issue mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    /// Status changed
    Status,
    /// Attributes edited
    Update,
    /// Issue created
    Create,
    /// Issue deleted
    Delete,
}

impl MutationKind {
    /// Parse wire type
    #[must_use]
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "status" => Some(Self::Status),
            "update" => Some(Self::Update),
            "create" => Some(Self::Create),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Whether the event changes graph structure rather than attributes
    #[inline]
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Create | Self::Delete)
    }
}

/// Fields carried by a mutation payload
///
/// Each field is `None` when absent. `assignee` distinguishes absent
/// (`None`) from explicitly cleared (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MutationFields {
    #[serde(default, alias = "new_status")]
    pub status: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present_or_null")]
    pub assignee: Option<Option<String>>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub issue_type: Option<String>,
}

impl MutationFields {
    /// No recognised field present
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.title.is_none()
            && self.assignee.is_none()
            && self.priority.is_none()
            && self.issue_type.is_none()
    }
}

fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// A change notification for one issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationEvent {
    /// What happened
    pub kind: MutationKind,
    /// Affected issue, when the backend names it
    pub target_id: Option<String>,
    /// Changed fields
    pub fields: MutationFields,
}

/// Any other event on the bus (agents, hooks, decisions, mail)
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    /// Sub-stream
    pub channel: Channel,
    /// Wire `type`
    pub kind: String,
    /// Related issue, if any
    pub issue_id: Option<String>,
    /// Raw payload
    pub payload: Value,
}

/// Parsed channel event
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Issue mutation
    Mutation(MutationEvent),
    /// Other bus traffic
    Bus(BusEvent),
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    issue_id: Option<String>,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

impl StreamEvent {
    /// Parse a frame; `None` for anything that is not a well-formed event
    #[must_use]
    pub fn from_frame(frame: &SseFrame) -> Option<Self> {
        let wire: WireEvent = serde_json::from_str(&frame.data).ok()?;
        let channel = Channel::from_label(frame.event.as_deref());
        let payload = wire.payload.unwrap_or_default();
        let issue_id = wire.issue_id.or_else(|| payload_issue_id(&payload));

        if channel.carries_mutations() {
            if let Some(kind) = MutationKind::parse(&wire.kind) {
                let fields = serde_json::from_value(Value::Object(payload)).ok()?;
                return Some(Self::Mutation(MutationEvent {
                    kind,
                    target_id: issue_id,
                    fields,
                }));
            }
        }

        Some(Self::Bus(BusEvent {
            channel,
            kind: wire.kind,
            issue_id,
            payload: Value::Object(payload),
        }))
    }

    /// Issue this event is about
    #[must_use]
    pub fn issue_id(&self) -> Option<&str> {
        match self {
            Self::Mutation(m) => m.target_id.as_deref(),
            Self::Bus(b) => b.issue_id.as_deref(),
        }
    }
}

fn payload_issue_id(payload: &Map<String, Value>) -> Option<String> {
    payload
        .get("issue_id")
        .or_else(|| payload.get("id"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}
