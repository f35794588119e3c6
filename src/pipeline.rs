//! Decision pipeline: policy → attention → selection → realization.
//!
//! Invoked synchronously by the world-model task whenever a domain state
//! changes. Everything here is a pure computation over the inputs; the
//! caller delivers the resulting frame to the chosen panel session and
//! hands the trace (if any) to an emitter.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::decision::{
    AlertTarget, AttentionLevel, DeviceCapabilities, DeviceContext, RealizationIntent,
    SelectionResult, compute_attention_level, compute_attention_level_from_device,
    produce_realization_frame, realize_attention,
};
use crate::decision::attention::AttentionContext;
use crate::decision::select_device;
use crate::policy::{DomainState, IntentCandidate, evaluate_domain_update};
use crate::profile::LoadedProfile;
use crate::trace::{TraceBuilder, determine_outcome, trace_rule_evaluation};

/// Runtime context shared by one alert-realization decision.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertContext {
    /// Whether quiet hours are currently active for attention purposes.
    pub quiet_hours: bool,
    /// Whether the alert is inside a cooldown window.
    pub cooldown_active: bool,
    /// Escalation steps already applied to this alert.
    pub escalation_level: u32,
    /// Unix timestamp used for interaction-recency scoring.
    pub current_time: f64,
}

impl AlertContext {
    pub fn new(current_time: f64) -> Self {
        Self {
            quiet_hours: false,
            cooldown_active: false,
            escalation_level: 0,
            current_time,
        }
    }
}

/// The concrete realization of one winning candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertDecision {
    pub attention: AttentionLevel,
    pub selection: SelectionResult,
    pub outputs: Vec<RealizationIntent>,
    /// Wire-ready realization frame for the selected panel.
    pub frame: Value,
}

/// Pick the winning candidate: highest importance among the non-suppressed,
/// `interrupt` breaking ties, earlier declaration winning beyond that.
pub fn winning_candidate(candidates: &[IntentCandidate]) -> Option<&IntentCandidate> {
    let mut winner: Option<&IntentCandidate> = None;
    for candidate in candidates.iter().filter(|c| !c.suppressed) {
        let beats = winner.is_none_or(|w| {
            (candidate.importance, candidate.interrupt) > (w.importance, w.interrupt)
        });
        if beats {
            winner = Some(candidate);
        }
    }
    winner
}

/// Realize one winning candidate: select the target panel, compute how
/// intrusive the alert may be on it, and produce the output intents plus
/// the wire frame.
///
/// When no panel is eligible the attention level is still computed (with
/// conservative device defaults) and the output list is empty.
pub fn realize_alert(
    alert_id: &str,
    candidate: &IntentCandidate,
    target: &AlertTarget,
    devices: &[DeviceContext],
    capabilities: &HashMap<String, DeviceCapabilities>,
    context: &AlertContext,
) -> AlertDecision {
    let priority = candidate.importance.alert_priority();
    let selection = select_device(target, devices, capabilities, context.current_time);

    let selected_device = selection
        .device_id
        .as_ref()
        .and_then(|id| devices.iter().find(|d| &d.device_id == id));

    let (attention, outputs) = match selected_device {
        Some(device) => {
            let attention = compute_attention_level_from_device(
                priority,
                device,
                context.quiet_hours,
                context.cooldown_active,
                context.escalation_level,
            );
            let outputs = realize_attention(attention, device);
            (attention, outputs)
        }
        None => {
            let mut attention_context = AttentionContext::new(priority);
            attention_context.quiet_hours = context.quiet_hours;
            attention_context.cooldown_active = context.cooldown_active;
            attention_context.escalation_level = context.escalation_level;
            (compute_attention_level(&attention_context), Vec::new())
        }
    };

    let frame = produce_realization_frame(alert_id, attention, &outputs);
    AlertDecision {
        attention,
        selection,
        outputs,
        frame,
    }
}

/// Evaluate a domain update and, when a candidate wins, realize it.
///
/// The trace builder, when present, observes each rule evaluation and the
/// arbitration outcome. Passing `None` is the production default and costs
/// nothing.
#[allow(clippy::too_many_arguments)]
pub fn evaluate_and_realize(
    profile: &LoadedProfile,
    updated_state: &DomainState,
    all_states: &HashMap<String, DomainState>,
    now: DateTime<Utc>,
    target: &AlertTarget,
    devices: &[DeviceContext],
    capabilities: &HashMap<String, DeviceCapabilities>,
    context: &AlertContext,
    mut tracer: Option<&mut TraceBuilder>,
) -> (Vec<IntentCandidate>, Option<AlertDecision>) {
    if let Some(tracer) = tracer.as_deref_mut() {
        tracer.start_policy_evaluation();
    }
    let candidates = evaluate_domain_update(profile, updated_state, all_states, now);
    if let Some(tracer) = tracer.as_deref_mut() {
        tracer.end_policy_evaluation();
        for rule in &profile.policy.rules {
            let candidate = candidates.iter().find(|c| c.rule_id == rule.rule_id);
            tracer.add_rule_evaluation(trace_rule_evaluation(
                rule,
                updated_state,
                all_states,
                candidate,
            ));
        }
        let (kind, intent) = determine_outcome(&candidates);
        tracer.set_outcome(kind, intent);
    }

    let decision = winning_candidate(&candidates).map(|winner| {
        let alert_id = format!("{}:{}", winner.domain, winner.rule_id);
        realize_alert(&alert_id, winner, target, devices, capabilities, context)
    });

    (candidates, decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Importance;
    use crate::profile::{
        LoadedPolicy, PolicyClassification, PolicyCondition, PolicyRule,
    };
    use chrono::TimeZone;
    use serde_json::json;

    fn profile_with_rule(rule: PolicyRule) -> LoadedProfile {
        LoadedProfile {
            profile_id: "home".to_string(),
            profile_version: "1.0.0".to_string(),
            profile_name: "Home".to_string(),
            domains: HashMap::new(),
            policy: LoadedPolicy {
                quiet_hours: None,
                rules: vec![rule],
            },
        }
    }

    fn classified_rule(rule_id: &str, domain: &str, event: &str, importance: Importance) -> PolicyRule {
        PolicyRule {
            rule_id: rule_id.to_string(),
            when: PolicyCondition {
                domain: domain.to_string(),
                state: None,
                event: Some(event.to_string()),
            },
            classify: Some(PolicyClassification {
                importance,
                interrupt: importance >= Importance::High,
                bypass_quiet_hours: importance == Importance::Critical,
            }),
            effects: None,
            conditions: HashMap::new(),
            suppress_if: HashMap::new(),
        }
    }

    fn single_panel() -> (Vec<DeviceContext>, HashMap<String, DeviceCapabilities>) {
        let mut device = DeviceContext::new("panel_hall");
        device.room = Some("hall".to_string());
        let capabilities = [("panel_hall".to_string(), DeviceCapabilities::default())]
            .into_iter()
            .collect();
        (vec![device], capabilities)
    }

    #[test]
    fn importance_maps_to_alert_priority() {
        assert_eq!(Importance::Low.alert_priority(), 20);
        assert_eq!(Importance::Medium.alert_priority(), 50);
        assert_eq!(Importance::High.alert_priority(), 100);
        assert_eq!(Importance::Critical.alert_priority(), 150);
    }

    #[test]
    fn doorbell_during_quiet_hours_caps_at_notify() {
        // Doorbell rings at 23:00; the attention-side quiet hours flag caps
        // the high-importance alert at notify.
        let profile = profile_with_rule(classified_rule(
            "doorbell_ring",
            "doorbell",
            "ring",
            Importance::High,
        ));
        let trigger = DomainState::with_event("doorbell", "ring");
        let all: HashMap<_, _> = [(trigger.domain.clone(), trigger.clone())].into();
        let (devices, capabilities) = single_panel();

        let mut context = AlertContext::new(1000.0);
        context.quiet_hours = true;

        let (candidates, decision) = evaluate_and_realize(
            &profile,
            &trigger,
            &all,
            Utc.with_ymd_and_hms(2025, 6, 1, 23, 0, 0).unwrap(),
            &AlertTarget::default(),
            &devices,
            &capabilities,
            &context,
            None,
        );
        assert_eq!(candidates.len(), 1);
        assert!(!candidates[0].suppressed);
        assert_eq!(candidates[0].importance, Importance::High);

        let decision = decision.unwrap();
        assert!(decision.attention <= AttentionLevel::Notify);
    }

    #[test]
    fn critical_security_is_critical_regardless_of_device() {
        let profile = profile_with_rule(classified_rule(
            "security_triggered",
            "security",
            "triggered",
            Importance::Critical,
        ));
        let trigger = DomainState::with_event("security", "triggered");
        let all: HashMap<_, _> = [(trigger.domain.clone(), trigger.clone())].into();

        // Panel without interruption support.
        let mut device = DeviceContext::new("panel_hall");
        device
            .signals
            .insert("supports_interruptions".to_string(), json!(false));
        let capabilities = [("panel_hall".to_string(), DeviceCapabilities::default())]
            .into_iter()
            .collect();

        let mut context = AlertContext::new(1000.0);
        context.quiet_hours = true;

        let (_, decision) = evaluate_and_realize(
            &profile,
            &trigger,
            &all,
            Utc.with_ymd_and_hms(2025, 6, 1, 3, 0, 0).unwrap(),
            &AlertTarget::default(),
            &[device],
            &capabilities,
            &context,
            None,
        );
        assert_eq!(decision.unwrap().attention, AttentionLevel::Critical);
    }

    #[test]
    fn no_eligible_panel_still_produces_a_frame() {
        let profile = profile_with_rule(classified_rule(
            "timer_finished",
            "timer",
            "finished",
            Importance::Medium,
        ));
        let trigger = DomainState::with_event("timer", "finished");
        let all: HashMap<_, _> = [(trigger.domain.clone(), trigger.clone())].into();

        let (_, decision) = evaluate_and_realize(
            &profile,
            &trigger,
            &all,
            Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).unwrap(),
            &AlertTarget::default(),
            &[],
            &HashMap::new(),
            &AlertContext::new(1000.0),
            None,
        );
        let decision = decision.unwrap();
        assert!(decision.selection.device_id.is_none());
        assert!(decision.outputs.is_empty());
        assert_eq!(decision.frame["type"], "alert_realization");
        assert_eq!(decision.attention, AttentionLevel::Notify);
    }

    #[test]
    fn suppressed_candidates_produce_no_decision() {
        let mut rule = classified_rule("motion_low", "motion", "detected", Importance::Low);
        rule.suppress_if
            .insert("occupancy".to_string(), "occupied".to_string());
        let profile = profile_with_rule(rule);
        let trigger = DomainState::with_event("motion", "detected");
        let all: HashMap<_, _> = [
            (trigger.domain.clone(), trigger.clone()),
            (
                "occupancy".to_string(),
                DomainState::with_state("occupancy", "occupied"),
            ),
        ]
        .into();

        let (candidates, decision) = evaluate_and_realize(
            &profile,
            &trigger,
            &all,
            Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).unwrap(),
            &AlertTarget::default(),
            &[],
            &HashMap::new(),
            &AlertContext::new(1000.0),
            None,
        );
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].suppressed);
        assert!(decision.is_none());
    }

    #[test]
    fn tracer_observes_rules_and_outcome() {
        use crate::trace::{
            OutcomeKind, TraceConfig, build_domain_snapshot, build_trigger_from_state,
        };

        let profile = profile_with_rule(classified_rule(
            "doorbell_ring",
            "doorbell",
            "ring",
            Importance::High,
        ));
        let trigger = DomainState::with_event("doorbell", "ring");
        let all: HashMap<_, _> = [(trigger.domain.clone(), trigger.clone())].into();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        let mut builder = TraceBuilder::new(
            profile.profile_id.clone(),
            Some(profile.profile_version.clone()),
            None,
            build_trigger_from_state(&trigger, None),
            build_domain_snapshot(&all, now, Some("12:00".to_string())),
            TraceConfig {
                enabled: true,
                ..TraceConfig::default()
            },
        );

        let (devices, capabilities) = single_panel();
        let (_, decision) = evaluate_and_realize(
            &profile,
            &trigger,
            &all,
            now,
            &AlertTarget::default(),
            &devices,
            &capabilities,
            &AlertContext::new(1000.0),
            Some(&mut builder),
        );
        assert!(decision.is_some());

        let trace = builder.build();
        assert_eq!(trace.policy_trace.rules_evaluated, 1);
        assert_eq!(trace.policy_trace.rules_matched, 1);
        assert_eq!(trace.outcome.kind, OutcomeKind::IntentGenerated);
        assert_eq!(
            trace.outcome.intent.as_ref().unwrap().rule_id,
            "doorbell_ring"
        );
    }
}
