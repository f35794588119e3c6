//! Canonical intents: commands flowing from the core out to adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::schema::{FieldKind, FieldSpec, SchemaViolation, check_payload};

/// Default execution priority when the caller does not specify one.
pub const DEFAULT_INTENT_PRIORITY: i32 = 50;

/// Categories of intents that flow out of the core to adapters.
///
/// These are ecosystem-agnostic commands; adapters translate them into
/// native service calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    // Display
    Show,
    Hide,
    Update,
    // Notification
    Notify,
    Interrupt,
    // Alert lifecycle
    Escalate,
    Acknowledge,
    Silence,
    Dismiss,
    // Device control
    ActivateOutput,
    DeactivateOutput,
}

impl IntentType {
    pub const ALL: [Self; 11] = [
        Self::Show,
        Self::Hide,
        Self::Update,
        Self::Notify,
        Self::Interrupt,
        Self::Escalate,
        Self::Acknowledge,
        Self::Silence,
        Self::Dismiss,
        Self::ActivateOutput,
        Self::DeactivateOutput,
    ];
}

/// Expected payload shape for each intent type.
pub fn intent_schema(intent_type: IntentType) -> &'static [FieldSpec] {
    const SHOW: &[FieldSpec] = &[
        FieldSpec::required("content_type", FieldKind::Str),
        FieldSpec::required("content_id", FieldKind::Str),
        FieldSpec::optional("priority", FieldKind::Int),
    ];
    const HIDE: &[FieldSpec] = &[FieldSpec::required("content_id", FieldKind::Str)];
    const UPDATE: &[FieldSpec] = &[
        FieldSpec::required("content_id", FieldKind::Str),
        FieldSpec::required("changes", FieldKind::Object),
    ];
    const NOTIFY: &[FieldSpec] = &[
        FieldSpec::required("alert_id", FieldKind::Str),
        FieldSpec::required("title", FieldKind::Str),
        FieldSpec::required("message", FieldKind::Str),
        FieldSpec::required("style", FieldKind::Str),
    ];
    const INTERRUPT: &[FieldSpec] = &[
        FieldSpec::required("alert_id", FieldKind::Str),
        FieldSpec::required("attention_level", FieldKind::Str),
        FieldSpec::required("outputs", FieldKind::List),
    ];
    const ESCALATE: &[FieldSpec] = &[
        FieldSpec::required("alert_id", FieldKind::Str),
        FieldSpec::required("from_level", FieldKind::Int),
        FieldSpec::required("to_level", FieldKind::Int),
    ];
    const ACKNOWLEDGE: &[FieldSpec] = &[
        FieldSpec::required("alert_id", FieldKind::Str),
        FieldSpec::optional("acknowledged_by", FieldKind::Str),
    ];
    const SILENCE: &[FieldSpec] = &[
        FieldSpec::required("alert_id", FieldKind::Str),
        FieldSpec::optional("duration_seconds", FieldKind::Int),
    ];
    const DISMISS: &[FieldSpec] = &[FieldSpec::required("alert_id", FieldKind::Str)];
    const ACTIVATE_OUTPUT: &[FieldSpec] = &[
        // visual, audio, haptic, ambient
        FieldSpec::required("channel", FieldKind::Str),
        // low, medium, high
        FieldSpec::required("intensity", FieldKind::Str),
        FieldSpec::required("persistent", FieldKind::Bool),
    ];
    const DEACTIVATE_OUTPUT: &[FieldSpec] = &[FieldSpec::required("channel", FieldKind::Str)];

    match intent_type {
        IntentType::Show => SHOW,
        IntentType::Hide => HIDE,
        IntentType::Update => UPDATE,
        IntentType::Notify => NOTIFY,
        IntentType::Interrupt => INTERRUPT,
        IntentType::Escalate => ESCALATE,
        IntentType::Acknowledge => ACKNOWLEDGE,
        IntentType::Silence => SILENCE,
        IntentType::Dismiss => DISMISS,
        IntentType::ActivateOutput => ACTIVATE_OUTPUT,
        IntentType::DeactivateOutput => DEACTIVATE_OUTPUT,
    }
}

/// Errors rejected at intent construction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntentError {
    #[error("target_id must be non-empty")]
    EmptyTargetId,

    #[error("payload schema violation: {0}")]
    Schema(SchemaViolation),
}

/// An intent flowing from core to an ecosystem adapter.
///
/// Intents are commands, not observations. They tell the adapter what to do
/// without specifying how. Same immutability and identifier invariants as
/// [`Fact`](super::Fact).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    intent_type: IntentType,
    /// Canonical target identifier - never an ecosystem-specific one.
    target_id: String,
    timestamp: DateTime<Utc>,
    data: Map<String, Value>,
    /// Urgency of execution (higher = more urgent).
    priority: i32,
    /// For deduplication when the adapter queues internally.
    idempotency_key: Option<String>,
}

impl Intent {
    /// Construct a validated intent with the default priority.
    pub fn new(
        intent_type: IntentType,
        target_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        data: Map<String, Value>,
    ) -> Result<Self, IntentError> {
        Self::with_priority(intent_type, target_id, timestamp, data, DEFAULT_INTENT_PRIORITY)
    }

    /// Construct a validated intent with an explicit priority.
    pub fn with_priority(
        intent_type: IntentType,
        target_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        data: Map<String, Value>,
        priority: i32,
    ) -> Result<Self, IntentError> {
        let target_id = target_id.into();
        if target_id.is_empty() {
            return Err(IntentError::EmptyTargetId);
        }
        check_payload(intent_schema(intent_type), &data).map_err(IntentError::Schema)?;

        Ok(Self {
            intent_type,
            target_id,
            timestamp,
            data,
            priority,
            idempotency_key: None,
        })
    }

    /// Attach an idempotency key for adapter-side deduplication.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn intent_type(&self) -> IntentType {
        self.intent_type
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn constructs_notify_intent_with_default_priority() {
        let intent = Intent::new(
            IntentType::Notify,
            "panel_kitchen",
            Utc::now(),
            payload(json!({
                "alert_id": "a1",
                "title": "Doorbell",
                "message": "Front door",
                "style": "WARNING",
            })),
        )
        .unwrap();
        assert_eq!(intent.priority(), DEFAULT_INTENT_PRIORITY);
        assert!(intent.idempotency_key().is_none());
    }

    #[test]
    fn rejects_empty_target_id() {
        let err = Intent::new(
            IntentType::Dismiss,
            "",
            Utc::now(),
            payload(json!({"alert_id": "a1"})),
        )
        .unwrap_err();
        assert_eq!(err, IntentError::EmptyTargetId);
    }

    #[test]
    fn rejects_missing_required_payload_field() {
        let err = Intent::new(
            IntentType::Escalate,
            "panel_kitchen",
            Utc::now(),
            payload(json!({"alert_id": "a1", "from_level": 1})),
        )
        .unwrap_err();
        assert!(matches!(err, IntentError::Schema(_)));
    }

    #[test]
    fn show_priority_field_must_be_integer() {
        let err = Intent::new(
            IntentType::Show,
            "panel_kitchen",
            Utc::now(),
            payload(json!({
                "content_type": "card",
                "content_id": "c1",
                "priority": "high",
            })),
        )
        .unwrap_err();
        assert!(matches!(err, IntentError::Schema(_)));
    }

    #[test]
    fn idempotency_key_round_trips() {
        let intent = Intent::new(
            IntentType::Dismiss,
            "panel_kitchen",
            Utc::now(),
            payload(json!({"alert_id": "a1"})),
        )
        .unwrap()
        .with_idempotency_key("dismiss-a1");
        assert_eq!(intent.idempotency_key(), Some("dismiss-a1"));
    }

    #[test]
    fn every_intent_type_has_a_schema() {
        for it in IntentType::ALL {
            assert!(!intent_schema(it).is_empty(), "no schema for {it:?}");
        }
    }
}
