//! Notification event contract for the switchboard engine.
//!
//! This crate is shared by the engine and whatever produces assistant hook
//! events (shell hooks, editor plugins) to prevent schema drift. The engine
//! consumes these events; it never produces them. Events carry a project
//! identifier rather than a pane identifier because the notification source
//! has no pane-level addressing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Seconds of input inactivity before the producer emits an `Idle` event.
/// Part of the contract: consumers may display "idle" as soon as they see
/// the event without re-deriving the threshold.
pub const IDLE_THRESHOLD_SECS: u64 = 60;

pub const MAX_EVENT_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PermissionRequest,
    Idle,
    Activity,
    Error,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PermissionRequest => "permission_request",
            NotificationKind::Idle => "idle",
            NotificationKind::Activity => "activity",
            NotificationKind::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationEvent {
    pub project_id: String,
    pub kind: NotificationKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventError {
    pub code: String,
    pub message: String,
}

impl EventError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for EventError {}

impl NotificationEvent {
    pub fn validate(&self) -> Result<(), EventError> {
        if self.project_id.trim().is_empty() {
            return Err(EventError::new(
                "invalid_project_id",
                "project_id is required",
            ));
        }
        if self.project_id.len() > 512 {
            return Err(EventError::new(
                "invalid_project_id",
                "project_id must be 512 characters or fewer",
            ));
        }
        if let Some(session_id) = &self.session_id {
            if session_id.trim().is_empty() {
                return Err(EventError::new(
                    "invalid_session_id",
                    "session_id must not be blank when present",
                ));
            }
        }
        Ok(())
    }
}

/// Parses and validates a notification event from raw JSON bytes.
pub fn parse_event(bytes: &[u8]) -> Result<NotificationEvent, EventError> {
    if bytes.len() > MAX_EVENT_BYTES {
        return Err(EventError::new(
            "event_too_large",
            "event exceeded maximum size",
        ));
    }
    let event: NotificationEvent = serde_json::from_slice(bytes).map_err(|err| {
        EventError::new(
            "invalid_json",
            format!("event payload was not valid JSON: {}", err),
        )
    })?;
    event.validate()?;
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_event(kind: NotificationKind) -> NotificationEvent {
        NotificationEvent {
            project_id: "/repo/alpha".to_string(),
            kind,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap(),
            session_id: Some("session-1".to_string()),
            message: None,
            metadata: None,
        }
    }

    #[test]
    fn validates_permission_request() {
        let event = base_event(NotificationKind::PermissionRequest);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn rejects_blank_project_id() {
        let mut event = base_event(NotificationKind::Idle);
        event.project_id = "  ".to_string();
        assert!(event.validate().is_err());
    }

    #[test]
    fn rejects_blank_session_id_when_present() {
        let mut event = base_event(NotificationKind::Idle);
        event.session_id = Some(String::new());
        assert!(event.validate().is_err());
    }

    #[test]
    fn parse_event_round_trips_snake_case_kind() {
        let raw = r#"{
            "project_id": "/repo/alpha",
            "kind": "permission_request",
            "timestamp": "2026-01-31T12:00:00Z"
        }"#;
        let event = parse_event(raw.as_bytes()).expect("parse");
        assert_eq!(event.kind, NotificationKind::PermissionRequest);
        assert_eq!(event.project_id, "/repo/alpha");
        assert!(event.session_id.is_none());
    }

    #[test]
    fn parse_event_rejects_unknown_fields() {
        let raw = r#"{
            "project_id": "/repo/alpha",
            "kind": "idle",
            "timestamp": "2026-01-31T12:00:00Z",
            "pane_id": "main:1.0"
        }"#;
        let err = parse_event(raw.as_bytes()).expect_err("unknown field");
        assert_eq!(err.code, "invalid_json");
    }

    #[test]
    fn parse_event_rejects_oversized_payload() {
        let raw = vec![b'a'; MAX_EVENT_BYTES + 1];
        let err = parse_event(&raw).expect_err("too large");
        assert_eq!(err.code, "event_too_large");
    }
}
