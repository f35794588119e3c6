//! Decision tracing and explainability
//!
//! Structured per-decision traces covering the trigger, the domain snapshot,
//! per-rule evaluation (with explicit failed conditions so "why didn't this
//! fire?" is answerable), quiet-hours state, outcome, and optional timing
//! metrics. Emission is opt-in, sampled, and bounded; see [`emitter`].

pub mod emitter;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::policy::{DomainState, Importance, IntentCandidate};
use crate::profile::PolicyRule;

pub use emitter::{
    BufferEmitter, CallbackEmitter, NullEmitter, TraceBuilder, TraceConfig, TraceEmitter,
};

// ============================================================================
// Enums
// ============================================================================

/// What initiated a decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Unknown,
    StateChange,
    Event,
    Periodic,
    Manual,
}

/// Result of evaluating a single rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleResult {
    Matched,
    Skipped,
    Suppressed,
}

/// Final decision outcome type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    NoAction,
    Suppressed,
    IntentGenerated,
    AlertDelivered,
}

// ============================================================================
// Trace Records
// ============================================================================

/// A single signal's contribution to fusion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalContribution {
    pub signal_source: String,
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_type: Option<String>,
    pub decay_factor: f64,
}

/// How a domain state was derived from signals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusionContribution {
    pub signals: Vec<SignalContribution>,
    pub confidence: f64,
}

/// A single domain's state at decision time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainStateEntry {
    pub domain: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fusion: Option<FusionContribution>,
}

/// An active effect modifying behavior during this decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveEffect {
    pub source_rule_id: String,
    pub effect_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect_value: Option<String>,
}

/// What initiated this decision cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

/// All domain states at decision time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainSnapshot {
    pub domains: Vec<DomainStateEntry>,
    pub snapshot_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_of_day: Option<String>,
    pub active_effects: Vec<ActiveEffect>,
}

/// Result of checking a single condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionCheck {
    /// "when", "condition", or "suppress_if".
    pub condition_type: &'static str,
    pub satisfied: bool,
    pub domain: String,
    pub expected: String,
    pub actual: String,
}

/// How an intent would be classified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentClassification {
    pub importance: Importance,
    pub interrupt: bool,
    pub bypass_quiet_hours: bool,
}

/// Evaluation trace for a single rule.
///
/// `failed_conditions` captures explicit no-match reasons - e.g.
/// `["media_activity == playing"]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleEvaluation {
    pub rule_id: String,
    pub result: RuleResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when_clause: Option<ConditionCheck>,
    pub additional_conditions: Vec<ConditionCheck>,
    pub suppress_if_checks: Vec<ConditionCheck>,
    pub failed_conditions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<IntentClassification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_reason: Option<String>,
}

/// Quiet hours evaluation state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuietHoursCheck {
    pub configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub currently_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_time: Option<String>,
}

/// Complete policy evaluation trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PolicyEvaluationTrace {
    pub rules: Vec<RuleEvaluation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiet_hours: Option<QuietHoursCheck>,
    pub rules_evaluated: usize,
    pub rules_matched: usize,
    pub rules_skipped: usize,
}

/// The intent that was selected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WinningIntent {
    pub domain: String,
    pub rule_id: String,
    pub importance: Importance,
    pub interrupt: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
}

/// Panel delivery decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelDelivery {
    pub delivered: bool,
    pub target_panels: Vec<String>,
    pub audible: bool,
    pub haptic: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_urgency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

/// Final decision outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionOutcome {
    pub kind: OutcomeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<WinningIntent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<PanelDelivery>,
}

impl DecisionOutcome {
    pub fn no_action() -> Self {
        Self {
            kind: OutcomeKind::NoAction,
            intent: None,
            delivery: None,
        }
    }
}

/// Performance timing for the decision, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PerformanceMetrics {
    pub total_duration_us: u64,
    pub policy_duration_us: u64,
    pub domains_evaluated: usize,
    pub rules_evaluated: usize,
}

/// Complete trace of a single decision cycle.
///
/// `decision_id` is a stable, referenceable id for panel interactions and
/// chaining; `parent_decision_id` records escalation/retry lineage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionTrace {
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_decision_id: Option<String>,
    pub profile_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_id: Option<String>,
    pub trigger: Trigger,
    pub domain_snapshot: DomainSnapshot,
    pub policy_trace: PolicyEvaluationTrace,
    pub outcome: DecisionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<PerformanceMetrics>,
}

impl DecisionTrace {
    /// Create a trace with a fresh id, an empty policy trace, and a
    /// no-action outcome.
    pub fn create(profile_id: impl Into<String>, trigger: Trigger, snapshot: DomainSnapshot) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            decision_id: None,
            parent_decision_id: None,
            profile_id: profile_id.into(),
            profile_version: None,
            home_id: None,
            trigger,
            domain_snapshot: snapshot,
            policy_trace: PolicyEvaluationTrace::default(),
            outcome: DecisionOutcome::no_action(),
            metrics: None,
        }
    }
}

// ============================================================================
// Builders from Policy Inputs
// ============================================================================

/// Build a [`Trigger`] from a domain state change.
pub fn build_trigger_from_state(
    updated_state: &DomainState,
    previous_state: Option<&str>,
) -> Trigger {
    Trigger {
        kind: TriggerKind::StateChange,
        domain: updated_state.domain.clone(),
        scope_id: Some(updated_state.scope_id.clone()),
        previous_state: previous_state.map(str::to_string),
        new_state: updated_state.state.clone(),
        event: updated_state.event.clone(),
    }
}

/// Build a [`DomainSnapshot`] from the current domain states.
pub fn build_domain_snapshot(
    all_states: &HashMap<String, DomainState>,
    snapshot_time: DateTime<Utc>,
    time_of_day: Option<String>,
) -> DomainSnapshot {
    let mut entries: Vec<DomainStateEntry> = all_states
        .values()
        .map(|state| DomainStateEntry {
            domain: state.domain.clone(),
            state: state.state.clone().unwrap_or_default(),
            scope_id: Some(state.scope_id.clone()),
            fusion: None,
        })
        .collect();
    entries.sort_by(|a, b| a.domain.cmp(&b.domain));

    DomainSnapshot {
        domains: entries,
        snapshot_time,
        time_of_day,
        active_effects: Vec::new(),
    }
}

/// Build a [`RuleEvaluation`] from a rule check, capturing the full
/// reasoning chain including failed conditions.
pub fn trace_rule_evaluation(
    rule: &PolicyRule,
    state: &DomainState,
    all_states: &HashMap<String, DomainState>,
    candidate: Option<&IntentCandidate>,
) -> RuleEvaluation {
    let when = &rule.when;
    let when_satisfied = when.domain == state.domain
        && when
            .state
            .as_ref()
            .is_none_or(|expected| state.state.as_deref() == Some(expected.as_str()))
        && when
            .event
            .as_ref()
            .is_none_or(|expected| state.event.as_deref() == Some(expected.as_str()));

    let when_clause = ConditionCheck {
        condition_type: "when",
        satisfied: when_satisfied,
        domain: when.domain.clone(),
        expected: when
            .state
            .clone()
            .or_else(|| when.event.clone())
            .unwrap_or_default(),
        actual: state
            .state
            .clone()
            .or_else(|| state.event.clone())
            .unwrap_or_default(),
    };

    let mut failed_conditions = Vec::new();
    let mut additional_conditions = Vec::new();
    let mut conditions_satisfied = true;

    let mut sorted_conditions: Vec<_> = rule.conditions.iter().collect();
    sorted_conditions.sort_by(|a, b| a.0.cmp(b.0));
    for (domain_name, required_value) in sorted_conditions {
        let actual = all_states
            .get(domain_name)
            .and_then(|ds| ds.state.clone())
            .unwrap_or_default();
        let satisfied = actual == *required_value;
        additional_conditions.push(ConditionCheck {
            condition_type: "condition",
            satisfied,
            domain: domain_name.clone(),
            expected: required_value.clone(),
            actual,
        });
        if !satisfied {
            conditions_satisfied = false;
            failed_conditions.push(format!("{domain_name} == {required_value}"));
        }
    }

    let mut suppress_if_checks = Vec::new();
    let mut sorted_suppress: Vec<_> = rule.suppress_if.iter().collect();
    sorted_suppress.sort_by(|a, b| a.0.cmp(b.0));
    for (domain_name, suppress_value) in sorted_suppress {
        let actual = all_states
            .get(domain_name)
            .and_then(|ds| ds.state.clone())
            .unwrap_or_default();
        suppress_if_checks.push(ConditionCheck {
            condition_type: "suppress_if",
            satisfied: actual == *suppress_value,
            domain: domain_name.clone(),
            expected: suppress_value.clone(),
            actual,
        });
    }

    let (result, skip_reason) = if !when_satisfied {
        failed_conditions.insert(
            0,
            format!(
                "{} == {}",
                when.domain,
                when.state
                    .clone()
                    .or_else(|| when.event.clone())
                    .unwrap_or_default()
            ),
        );
        (
            RuleResult::Skipped,
            Some(format!("when clause not satisfied: {}", when.domain)),
        )
    } else if !conditions_satisfied {
        (
            RuleResult::Skipped,
            Some("additional conditions not satisfied".to_string()),
        )
    } else {
        match candidate {
            Some(c) if c.suppressed => (RuleResult::Suppressed, None),
            Some(_) => (RuleResult::Matched, None),
            None => (RuleResult::Skipped, Some("no classification".to_string())),
        }
    };

    RuleEvaluation {
        rule_id: rule.rule_id.clone(),
        result,
        when_clause: Some(when_clause),
        additional_conditions,
        suppress_if_checks,
        failed_conditions: if result == RuleResult::Skipped {
            failed_conditions
        } else {
            Vec::new()
        },
        classification: rule.classify.map(|c| IntentClassification {
            importance: c.importance,
            interrupt: c.interrupt,
            bypass_quiet_hours: c.bypass_quiet_hours,
        }),
        skip_reason,
        suppress_reason: candidate
            .filter(|c| c.suppressed)
            .and_then(|c| c.suppression_reason.clone()),
    }
}

/// Determine the outcome type and winning intent from candidates.
///
/// The winner is the highest-importance non-suppressed candidate, with
/// `interrupt` breaking ties.
pub fn determine_outcome(candidates: &[IntentCandidate]) -> (OutcomeKind, Option<WinningIntent>) {
    if candidates.is_empty() {
        return (OutcomeKind::NoAction, None);
    }

    let mut winner: Option<&IntentCandidate> = None;
    for candidate in candidates.iter().filter(|c| !c.suppressed) {
        let beats = winner.is_none_or(|w| {
            (candidate.importance, candidate.interrupt) > (w.importance, w.interrupt)
        });
        if beats {
            winner = Some(candidate);
        }
    }

    match winner {
        None => (OutcomeKind::Suppressed, None),
        Some(winner) => (
            OutcomeKind::IntentGenerated,
            Some(WinningIntent {
                domain: winner.domain.clone(),
                rule_id: winner.rule_id.clone(),
                importance: winner.importance,
                interrupt: winner.interrupt,
                scope_id: Some(winner.scope_id.clone()),
            }),
        ),
    }
}
