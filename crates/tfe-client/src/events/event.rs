use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::StreamFailure;

/// Lifecycle notifications pushed by the event service.
///
/// Tags this client does not know yet decode into [`EventType::Other`] and are
/// delivered like any other event.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    OrganizationCreated,
    OrganizationDeleted,
    WorkspaceCreated,
    WorkspaceDeleted,
    RunCreated,
    RunCompleted,
    RunCanceled,
    RunApplied,
    RunPlanned,
    RunPlannedAndFinished,
    PlanQueued,
    ApplyQueued,
    /// Reserved for failures synthesized by the client.
    Error,
    /// Tag added server-side after this client was built, kept verbatim.
    Other(String),
}

impl EventType {
    /// Wire tag of this event type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::OrganizationCreated => "organization_created",
            Self::OrganizationDeleted => "organization_deleted",
            Self::WorkspaceCreated => "workspace_created",
            Self::WorkspaceDeleted => "workspace_deleted",
            Self::RunCreated => "run_created",
            Self::RunCompleted => "run_completed",
            Self::RunCanceled => "run_canceled",
            Self::RunApplied => "run_applied",
            Self::RunPlanned => "run_planned",
            Self::RunPlannedAndFinished => "run_planned_and_finished",
            Self::PlanQueued => "plan_queued",
            Self::ApplyQueued => "apply_queued",
            Self::Error => "error",
            Self::Other(tag) => tag.as_str(),
        }
    }

    fn from_tag(tag: String) -> Self {
        match tag.as_str() {
            "organization_created" => Self::OrganizationCreated,
            "organization_deleted" => Self::OrganizationDeleted,
            "workspace_created" => Self::WorkspaceCreated,
            "workspace_deleted" => Self::WorkspaceDeleted,
            "run_created" => Self::RunCreated,
            "run_completed" => Self::RunCompleted,
            "run_canceled" => Self::RunCanceled,
            "run_applied" => Self::RunApplied,
            "run_planned" => Self::RunPlanned,
            "run_planned_and_finished" => Self::RunPlannedAndFinished,
            "plan_queued" => Self::PlanQueued,
            "apply_queued" => Self::ApplyQueued,
            "error" => Self::Error,
            _ => Self::Other(tag),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from_tag)
    }
}

/// One server-pushed notification.
///
/// The payload is kept as raw JSON; no schema is enforced at this layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    /// Creates an event from its parts.
    pub fn new(kind: EventType, payload: serde_json::Value) -> Self {
        Self { kind, payload }
    }

    pub(crate) fn from_failure(failure: &StreamFailure) -> Self {
        Self {
            kind: EventType::Error,
            payload: serde_json::json!({
                "kind": failure.kind,
                "message": failure.message,
            }),
        }
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Whether this is the client's synthetic `error` event.
    pub fn is_error(&self) -> bool {
        self.kind == EventType::Error
    }

    /// Structured failure carried by an `error` event.
    ///
    /// Returns `None` for other event types, and for `error` events whose
    /// payload was not produced by this client.
    pub fn failure(&self) -> Option<StreamFailure> {
        if !self.is_error() {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StreamFailureKind;

    #[test]
    fn decodes_type_tag_and_raw_payload() {
        let event =
            Event::decode(br#"{"type":"run_planned_and_finished","payload":{"run":"run-1"}}"#)
                .expect("decode");
        assert_eq!(event.kind, EventType::RunPlannedAndFinished);
        assert_eq!(event.payload["run"], "run-1");
    }

    #[test]
    fn missing_payload_decodes_as_null() {
        let event = Event::decode(br#"{"type":"plan_queued"}"#).expect("decode");
        assert_eq!(event.payload, serde_json::Value::Null);
    }

    #[test]
    fn unknown_type_is_kept_verbatim() {
        let event = Event::decode(br#"{"type":"workspace_locked","payload":{"ws":"ws-1"}}"#)
            .expect("decode");
        assert_eq!(event.kind, EventType::Other("workspace_locked".into()));
        assert_eq!(event.kind.to_string(), "workspace_locked");
        assert!(!event.is_error());
    }

    #[test]
    fn malformed_frames_are_decode_errors() {
        assert!(Event::decode(b"not json").is_err());
        assert!(Event::decode(br#"{"payload":{}}"#).is_err());
        assert!(Event::decode(br#"{"type":42}"#).is_err());
    }

    #[test]
    fn failure_round_trips_through_error_payload() {
        let failure = StreamFailure::new(StreamFailureKind::Decode, "bad frame");
        let event = Event::from_failure(&failure);
        assert!(event.is_error());
        assert_eq!(event.failure(), Some(failure));
        assert_eq!(
            Event::new(EventType::RunCreated, serde_json::Value::Null).failure(),
            None
        );
    }

    #[test]
    fn display_matches_wire_tag() {
        assert_eq!(EventType::WorkspaceDeleted.to_string(), "workspace_deleted");
        let wire = serde_json::to_value(EventType::ApplyQueued).expect("serialize");
        assert_eq!(wire, EventType::ApplyQueued.as_str());
        let other = serde_json::to_value(EventType::Other("run_paused".into())).expect("serialize");
        assert_eq!(other, "run_paused");
    }
}
