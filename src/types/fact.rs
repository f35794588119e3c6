//! Canonical facts: observations flowing from adapters into the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::schema::{FieldKind, FieldSpec, SchemaViolation, check_payload};

/// Categories of facts that flow into the core from adapters.
///
/// These are ecosystem-agnostic observations about the world. Adapters
/// translate their native events into these types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactType {
    Presence,
    Motion,
    Contact,
    MediaState,
    Environment,
    DeviceContext,
    AdapterHealth,
}

impl FactType {
    pub const ALL: [Self; 7] = [
        Self::Presence,
        Self::Motion,
        Self::Contact,
        Self::MediaState,
        Self::Environment,
        Self::DeviceContext,
        Self::AdapterHealth,
    ];
}

/// Expected payload shape for each fact type.
///
/// Adapters must produce facts matching these schemas; `Fact::new` enforces
/// them at construction.
pub fn fact_schema(fact_type: FactType) -> &'static [FieldSpec] {
    const PRESENCE: &[FieldSpec] = &[
        FieldSpec::required("present", FieldKind::Bool),
        FieldSpec::optional("zone_id", FieldKind::Str),
    ];
    const MOTION: &[FieldSpec] = &[
        FieldSpec::required("detected", FieldKind::Bool),
        FieldSpec::optional("area_id", FieldKind::Str),
    ];
    const CONTACT: &[FieldSpec] = &[FieldSpec::required("open", FieldKind::Bool)];
    const MEDIA_STATE: &[FieldSpec] = &[
        // playing, paused, idle, off
        FieldSpec::required("state", FieldKind::Str),
        FieldSpec::optional("media_type", FieldKind::Str),
    ];
    const ENVIRONMENT: &[FieldSpec] = &[
        FieldSpec::optional("temperature", FieldKind::Num),
        FieldSpec::optional("humidity", FieldKind::Num),
        FieldSpec::optional("illuminance", FieldKind::Num),
    ];
    const DEVICE_CONTEXT: &[FieldSpec] = &[
        FieldSpec::required("device_id", FieldKind::Str),
        FieldSpec::optional("room", FieldKind::Str),
        FieldSpec::required("online", FieldKind::Bool),
        FieldSpec::required("signals", FieldKind::Object),
    ];
    const ADAPTER_HEALTH: &[FieldSpec] = &[
        // ok, degraded, offline
        FieldSpec::required("status", FieldKind::Str),
        FieldSpec::optional("reason", FieldKind::Str),
    ];

    match fact_type {
        FactType::Presence => PRESENCE,
        FactType::Motion => MOTION,
        FactType::Contact => CONTACT,
        FactType::MediaState => MEDIA_STATE,
        FactType::Environment => ENVIRONMENT,
        FactType::DeviceContext => DEVICE_CONTEXT,
        FactType::AdapterHealth => ADAPTER_HEALTH,
    }
}

/// Errors rejected at fact construction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FactError {
    #[error("confidence must be 0.0-1.0, got {0}")]
    ConfidenceOutOfRange(f64),

    #[error("source_id must be non-empty")]
    EmptySourceId,

    #[error("payload schema violation: {0}")]
    Schema(SchemaViolation),
}

/// A fact flowing from an ecosystem adapter into core.
///
/// Facts are observations, not commands. They are immutable value types:
/// equality is structural and they are safe to share freely. Created by
/// adapters, folded into domain state by the aggregator, then dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    fact_type: FactType,
    /// Canonical identifier - never an ecosystem-specific one.
    source_id: String,
    timestamp: DateTime<Utc>,
    data: Map<String, Value>,
    /// Adapter confidence in the observation, 0.0-1.0.
    confidence: f64,
}

impl Fact {
    /// Construct a validated fact.
    ///
    /// Fails when confidence is outside [0, 1], `source_id` is empty, or the
    /// payload violates the schema for `fact_type`.
    pub fn new(
        fact_type: FactType,
        source_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        data: Map<String, Value>,
        confidence: f64,
    ) -> Result<Self, FactError> {
        let source_id = source_id.into();
        if source_id.is_empty() {
            return Err(FactError::EmptySourceId);
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(FactError::ConfidenceOutOfRange(confidence));
        }
        check_payload(fact_schema(fact_type), &data).map_err(FactError::Schema)?;

        Ok(Self {
            fact_type,
            source_id,
            timestamp,
            data,
            confidence,
        })
    }

    pub fn fact_type(&self) -> FactType {
        self.fact_type
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }
}
