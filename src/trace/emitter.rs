//! Trace emission: opt-in, sampled, bounded.
//!
//! Traces are emitted after policy evaluation, before arbitration output.
//!
//! Critical invariants:
//! - Zero semantic difference when tracing is off
//! - `emit` never blocks the decision path
//! - Nothing is allocated on the disabled path

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;
use rand::Rng;
use tracing::warn;
use uuid::Uuid;

use super::{
    DecisionOutcome, DecisionTrace, DomainSnapshot, OutcomeKind, PerformanceMetrics,
    PolicyEvaluationTrace, QuietHoursCheck, RuleEvaluation, RuleResult, Trigger, WinningIntent,
};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for trace emission.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceConfig {
    /// Master switch; off in production by default.
    pub enabled: bool,
    /// Fraction of decisions to trace, 0.0-1.0.
    pub sample_rate: f64,
    /// Whether to include timing metrics.
    pub include_metrics: bool,
    /// Whether to include fusion details in domain snapshots.
    pub include_fusion: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_rate: 1.0,
            include_metrics: true,
            include_fusion: true,
        }
    }
}

impl TraceConfig {
    /// Whether this decision should be traced: enabled, plus an unbiased
    /// sampling draw.
    pub fn should_trace(&self) -> bool {
        if !self.enabled {
            return false;
        }
        if self.sample_rate >= 1.0 {
            return true;
        }
        rand::thread_rng().gen::<f64>() < self.sample_rate
    }
}

// ============================================================================
// Emitters
// ============================================================================

/// Where finished traces go.
///
/// `emit` must be non-blocking; implementations handle their own buffering.
pub trait TraceEmitter: Send + Sync {
    fn emit(&self, trace: DecisionTrace);
}

/// Discards every trace.
pub struct NullEmitter;

impl TraceEmitter for NullEmitter {
    fn emit(&self, _trace: DecisionTrace) {}
}

/// Bounded in-memory ring for tests and dev tools. Oldest traces are
/// evicted first; the critical section is O(1) and allocation-free once the
/// ring is warm.
pub struct BufferEmitter {
    buffer: Mutex<VecDeque<DecisionTrace>>,
    max_size: usize,
}

impl BufferEmitter {
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(max_size)),
            max_size,
        }
    }

    /// All buffered traces, oldest first.
    pub fn traces(&self) -> Vec<DecisionTrace> {
        match self.buffer.lock() {
            Ok(buffer) => buffer.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// The most recent `n` traces.
    pub fn last(&self, n: usize) -> Vec<DecisionTrace> {
        match self.buffer.lock() {
            Ok(buffer) => buffer.iter().rev().take(n).rev().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.clear();
        }
    }
}

impl TraceEmitter for BufferEmitter {
    fn emit(&self, trace: DecisionTrace) {
        let Ok(mut buffer) = self.buffer.lock() else {
            warn!("trace buffer poisoned, dropping trace");
            return;
        };
        if buffer.len() >= self.max_size {
            buffer.pop_front();
        }
        buffer.push_back(trace);
    }
}

/// Hands each trace to a synchronous callback. The callback must not block.
pub struct CallbackEmitter {
    callback: Box<dyn Fn(DecisionTrace) + Send + Sync>,
}

impl CallbackEmitter {
    pub fn new(callback: impl Fn(DecisionTrace) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl TraceEmitter for CallbackEmitter {
    fn emit(&self, trace: DecisionTrace) {
        (self.callback)(trace);
    }
}

// ============================================================================
// Trace Builder
// ============================================================================

/// Accumulates a [`DecisionTrace`] during one traced decision.
///
/// Allocated only when [`TraceConfig::should_trace`] said yes; the disabled
/// decision path never constructs one.
pub struct TraceBuilder {
    profile_id: String,
    profile_version: Option<String>,
    home_id: Option<String>,
    trigger: Trigger,
    domain_snapshot: DomainSnapshot,
    config: TraceConfig,

    started: Instant,
    policy_started: Option<Instant>,
    policy_ended: Option<Instant>,

    rule_evaluations: Vec<RuleEvaluation>,
    quiet_hours: Option<QuietHoursCheck>,
    outcome: Option<DecisionOutcome>,
    decision_id: Option<String>,
    parent_decision_id: Option<String>,
}

impl TraceBuilder {
    pub fn new(
        profile_id: impl Into<String>,
        profile_version: Option<String>,
        home_id: Option<String>,
        trigger: Trigger,
        domain_snapshot: DomainSnapshot,
        config: TraceConfig,
    ) -> Self {
        Self {
            profile_id: profile_id.into(),
            profile_version,
            home_id,
            trigger,
            domain_snapshot,
            config,
            started: Instant::now(),
            policy_started: None,
            policy_ended: None,
            rule_evaluations: Vec::new(),
            quiet_hours: None,
            outcome: None,
            decision_id: None,
            parent_decision_id: None,
        }
    }

    /// Mark the start of policy evaluation.
    pub fn start_policy_evaluation(&mut self) {
        self.policy_started = Some(Instant::now());
    }

    /// Mark the end of policy evaluation.
    pub fn end_policy_evaluation(&mut self) {
        self.policy_ended = Some(Instant::now());
    }

    /// Set a stable decision id, optionally chained to a parent decision.
    pub fn set_decision_id(&mut self, decision_id: impl Into<String>, parent: Option<String>) {
        self.decision_id = Some(decision_id.into());
        self.parent_decision_id = parent;
    }

    pub fn add_rule_evaluation(&mut self, evaluation: RuleEvaluation) {
        self.rule_evaluations.push(evaluation);
    }

    pub fn set_quiet_hours(&mut self, check: QuietHoursCheck) {
        self.quiet_hours = Some(check);
    }

    pub fn set_outcome(&mut self, kind: OutcomeKind, intent: Option<WinningIntent>) {
        self.outcome = Some(DecisionOutcome {
            kind,
            intent,
            delivery: None,
        });
    }

    /// Finish the trace.
    pub fn build(self) -> DecisionTrace {
        let metrics = self.config.include_metrics.then(|| {
            let policy_duration_us = match (self.policy_started, self.policy_ended) {
                (Some(start), Some(end)) if end > start => {
                    u64::try_from(end.duration_since(start).as_micros()).unwrap_or(u64::MAX)
                }
                _ => 0,
            };
            PerformanceMetrics {
                total_duration_us: u64::try_from(self.started.elapsed().as_micros())
                    .unwrap_or(u64::MAX),
                policy_duration_us,
                domains_evaluated: self.domain_snapshot.domains.len(),
                rules_evaluated: self.rule_evaluations.len(),
            }
        });

        let rules_matched = self
            .rule_evaluations
            .iter()
            .filter(|r| r.result == RuleResult::Matched)
            .count();
        let rules_skipped = self
            .rule_evaluations
            .iter()
            .filter(|r| r.result == RuleResult::Skipped)
            .count();

        DecisionTrace {
            trace_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            decision_id: self.decision_id,
            parent_decision_id: self.parent_decision_id,
            profile_id: self.profile_id,
            profile_version: self.profile_version,
            home_id: self.home_id,
            trigger: self.trigger,
            domain_snapshot: self.domain_snapshot,
            policy_trace: PolicyEvaluationTrace {
                rules_evaluated: self.rule_evaluations.len(),
                rules_matched,
                rules_skipped,
                rules: self.rule_evaluations,
                quiet_hours: self.quiet_hours,
            },
            outcome: self.outcome.unwrap_or_else(DecisionOutcome::no_action),
            metrics,
        }
    }
}
