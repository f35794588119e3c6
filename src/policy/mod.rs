//! Policy evaluation engine
//!
//! Evaluates policy rules against a domain-state snapshot to produce
//! classified intent candidates. It does NOT execute actions - it only
//! classifies. Suppressed candidates are still surfaced so traces and UIs
//! can explain the omission.
//!
//! Every function here is total and pure: any legal input produces a list
//! (possibly empty), the same inputs produce the same output, and nothing
//! suspends or performs I/O.

use std::collections::HashMap;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::profile::{LoadedPolicy, LoadedProfile, PolicyEffects, PolicyRule, QuietHours};

// ============================================================================
// Importance
// ============================================================================

/// Intent importance levels, totally ordered low to critical.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    Medium,
    High,
    Critical,
}

impl Importance {
    /// Parse case-insensitively. Unknown strings yield `None`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Alert priority fed into the attention model for a candidate of this
    /// importance: low maps below the notify threshold, medium to notify,
    /// high to interrupt, critical to life-safety.
    pub fn alert_priority(self) -> i32 {
        match self {
            Self::Low => 20,
            Self::Medium => 50,
            Self::High => 100,
            Self::Critical => 150,
        }
    }
}

impl std::fmt::Display for Importance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Domain State
// ============================================================================

/// Current value for one domain at one scope.
///
/// Scope is `"house"` or a room identifier per the domain's declared scope.
/// Domain schemas enumerate the legal state/event strings; the engine treats
/// unknown values as non-matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainState {
    pub domain: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default = "DomainState::house_scope")]
    pub scope_id: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl DomainState {
    fn house_scope() -> String {
        "house".to_string()
    }

    /// A house-scoped state value with no event or metadata.
    pub fn with_state(domain: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            state: Some(state.into()),
            event: None,
            scope_id: Self::house_scope(),
            metadata: Map::new(),
        }
    }

    /// A house-scoped event value with no state or metadata.
    pub fn with_event(domain: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            state: None,
            event: Some(event.into()),
            scope_id: Self::house_scope(),
            metadata: Map::new(),
        }
    }
}

// ============================================================================
// Intent Candidates
// ============================================================================

/// A classified intent candidate ready for the alert pipeline.
///
/// A suppressed candidate is still emitted, with the reason, so the decision
/// is explainable downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentCandidate {
    pub domain: String,
    pub rule_id: String,
    pub importance: Importance,
    pub interrupt: bool,
    pub bypass_quiet_hours: bool,
    pub suppressed: bool,
    pub suppression_reason: Option<String>,
    pub scope_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Context assembled once per evaluation pass.
struct EvaluationContext<'a> {
    domain_states: &'a HashMap<String, DomainState>,
    current_time: NaiveTime,
    active_effects: Vec<PolicyEffects>,
}

// ============================================================================
// Rule Matching
// ============================================================================

/// Check whether a rule's `when` clause matches a domain state.
fn matches_when(rule: &PolicyRule, state: &DomainState) -> bool {
    let when = &rule.when;
    if when.domain != state.domain {
        return false;
    }
    if let Some(expected) = &when.state {
        if state.state.as_deref() != Some(expected.as_str()) {
            return false;
        }
    }
    match &when.event {
        Some(expected) => state.event.as_deref() == Some(expected.as_str()),
        None => true,
    }
}

/// Check additional other-domain equality conditions.
fn check_conditions(rule: &PolicyRule, context: &EvaluationContext<'_>) -> bool {
    rule.conditions.iter().all(|(domain_name, required)| {
        context
            .domain_states
            .get(domain_name)
            .is_some_and(|ds| ds.state.as_deref() == Some(required.as_str()))
    })
}

/// Check suppress_if conditions; returns the suppression reason when hit.
fn check_suppress_if(rule: &PolicyRule, context: &EvaluationContext<'_>) -> Option<String> {
    // Iterate in a stable order so the surfaced reason is deterministic.
    let mut entries: Vec<_> = rule.suppress_if.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (domain_name, suppress_value) in entries {
        let matched = context
            .domain_states
            .get(domain_name)
            .is_some_and(|ds| ds.state.as_deref() == Some(suppress_value.as_str()));
        if matched {
            return Some(format!("{domain_name}={suppress_value}"));
        }
    }
    None
}

/// Whether quiet hours suppress a classification that does not bypass them.
fn quiet_hours_suppresses(
    quiet_hours: Option<&QuietHours>,
    current_time: NaiveTime,
    bypass: bool,
) -> bool {
    match quiet_hours {
        None => false,
        Some(_) if bypass => false,
        Some(qh) => qh.is_active(current_time),
    }
}

/// Whether active effects suppress this importance level; returns the reason.
fn check_importance_suppression(
    importance: Importance,
    effects: &[PolicyEffects],
) -> Option<String> {
    for effect in effects {
        if let Some(threshold) = effect.suppress_below_importance {
            if importance < threshold {
                return Some(format!("importance below {threshold}"));
            }
        }
    }
    None
}

// ============================================================================
// Evaluation
// ============================================================================

/// Evaluate a single rule against a domain state.
///
/// Returns a candidate when the rule matches and classifies, `None` when it
/// is skipped or contributes effects only.
fn evaluate_rule(
    rule: &PolicyRule,
    state: &DomainState,
    context: &EvaluationContext<'_>,
    quiet_hours: Option<&QuietHours>,
    now: DateTime<Utc>,
) -> Option<IntentCandidate> {
    if !matches_when(rule, state) {
        return None;
    }
    if !check_conditions(rule, context) {
        return None;
    }

    // No classification: rule only contributes effects.
    let classification = rule.classify?;

    let candidate = |interrupt, suppressed, suppression_reason| IntentCandidate {
        domain: state.domain.clone(),
        rule_id: rule.rule_id.clone(),
        importance: classification.importance,
        interrupt,
        bypass_quiet_hours: classification.bypass_quiet_hours,
        suppressed,
        suppression_reason,
        scope_id: state.scope_id.clone(),
        timestamp: now,
    };

    if let Some(reason) = check_suppress_if(rule, context) {
        return Some(candidate(classification.interrupt, true, Some(reason)));
    }

    if quiet_hours_suppresses(
        quiet_hours,
        context.current_time,
        classification.bypass_quiet_hours,
    ) {
        // Quiet hours suppress the interrupt flag as well.
        return Some(candidate(false, true, Some("quiet_hours".to_string())));
    }

    if let Some(reason) =
        check_importance_suppression(classification.importance, &context.active_effects)
    {
        return Some(candidate(false, true, Some(reason)));
    }

    Some(candidate(classification.interrupt, false, None))
}

/// Collect effects from every rule whose `when` currently matches some state.
///
/// Each rule contributes its effects at most once, regardless of how many
/// states it matches.
fn collect_active_effects(
    policy: &LoadedPolicy,
    domain_states: &HashMap<String, DomainState>,
) -> Vec<PolicyEffects> {
    let mut effects = Vec::new();
    for rule in &policy.rules {
        let Some(rule_effects) = rule.effects else {
            continue;
        };
        if domain_states.values().any(|state| matches_when(rule, state)) {
            effects.push(rule_effects);
        }
    }
    effects
}

/// Evaluate policy rules when a domain state changes.
///
/// `now` supplies both the candidate timestamps and the time-of-day used for
/// the quiet hours check, keeping the function pure. Candidates come back in
/// rule declaration order and include suppressed ones.
pub fn evaluate_domain_update(
    profile: &LoadedProfile,
    updated_state: &DomainState,
    all_states: &HashMap<String, DomainState>,
    now: DateTime<Utc>,
) -> Vec<IntentCandidate> {
    let policy = &profile.policy;
    let context = EvaluationContext {
        domain_states: all_states,
        current_time: now.time(),
        active_effects: collect_active_effects(policy, all_states),
    };

    policy
        .rules
        .iter()
        .filter_map(|rule| {
            evaluate_rule(rule, updated_state, &context, policy.quiet_hours.as_ref(), now)
        })
        .collect()
}

/// Evaluate policy rules against every current domain state.
///
/// Used for initial evaluation and periodic re-evaluation.
pub fn evaluate_all_states(
    profile: &LoadedProfile,
    all_states: &HashMap<String, DomainState>,
    now: DateTime<Utc>,
) -> Vec<IntentCandidate> {
    let policy = &profile.policy;
    let context = EvaluationContext {
        domain_states: all_states,
        current_time: now.time(),
        active_effects: collect_active_effects(policy, all_states),
    };

    let mut candidates = Vec::new();
    let mut states: Vec<_> = all_states.values().collect();
    states.sort_by(|a, b| a.domain.cmp(&b.domain));
    for state in states {
        for rule in &policy.rules {
            if let Some(candidate) =
                evaluate_rule(rule, state, &context, policy.quiet_hours.as_ref(), now)
            {
                candidates.push(candidate);
            }
        }
    }
    candidates
}
