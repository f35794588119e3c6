//! Ecosystem adapter boundary
//!
//! The canonical interface between core logic and ecosystem adapters. Core
//! logic is ecosystem-agnostic: adapters translate native events into
//! canonical facts and canonical intents into native service calls, and they
//! never arbitrate. No ecosystem identifiers cross this boundary; a
//! repo-wide scan in `tests/adapter_boundary.rs` enforces it.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::types::{Fact, FactType, Intent};

// ============================================================================
// Adapter Health
// ============================================================================

/// Health status of an ecosystem adapter.
///
/// Core may use this to reduce confidence in adapter-sourced facts or to
/// suppress aggressive outputs. Health is an input to decisions, never a
/// gate on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterHealth {
    Ok,
    Degraded,
    Offline,
}

// ============================================================================
// Adapter Errors
// ============================================================================

/// Errors surfaced by adapters.
///
/// These are contained within the adapter call; the core logs and continues.
/// They must never propagate into the decision path.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("translation between canonical and ecosystem types failed: {0}")]
    Translation(String),

    #[error("connection to the ecosystem failed: {0}")]
    Connection(String),

    #[error("intent could not be applied: {0}")]
    Intent(String),
}

// ============================================================================
// Fact Sink
// ============================================================================

/// Receives facts pushed by an adapter.
///
/// Core provides a sink; adapters push facts into it. The single-method
/// contract decouples adapters from the core's internal structure.
pub trait FactSink: Send + Sync {
    fn receive_fact(&self, fact: Fact);
}

/// Handle returned by [`EcosystemAdapter::subscribe_facts`]. Dropping the
/// handle without calling [`Unsubscribe::unsubscribe`] leaves the
/// subscription active; call it to stop receiving facts.
pub struct Unsubscribe(Option<Box<dyn FnOnce() + Send>>);

impl Unsubscribe {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    /// Stop receiving facts. Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Unsubscribe")
            .field(&self.0.as_ref().map(|_| "active").unwrap_or("spent"))
            .finish()
    }
}

// ============================================================================
// Adapter Interface
// ============================================================================

/// Contract every ecosystem adapter must satisfy.
///
/// Adapters translate; they never arbitrate. `apply_intent` takes exactly
/// one intent and returns nothing, so an adapter has no mechanism to
/// filter, batch, or prioritize. Fact sinks receive every fact as-is.
pub trait EcosystemAdapter: Send + Sync {
    /// Unique identifier for this adapter instance, stable for the process
    /// lifetime.
    fn adapter_id(&self) -> &str;

    /// Current adapter health. Pure query.
    fn health(&self) -> AdapterHealth;

    /// Register a push sink, optionally filtered to specific fact types.
    /// Multiple subscribers are supported.
    fn subscribe_facts(
        &self,
        sink: Arc<dyn FactSink>,
        fact_types: Option<HashSet<FactType>>,
    ) -> Unsubscribe;

    /// Apply an intent to the ecosystem. Fire-and-forget; the adapter may
    /// queue internally. Failures surface as [`AdapterError`] and are
    /// contained at the boundary.
    fn apply_intent(&self, intent: Intent) -> Result<(), AdapterError>;
}
