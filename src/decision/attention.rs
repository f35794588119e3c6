//! Attention and interruption model for alert delivery.
//!
//! Answers: given an alert that is allowed and prioritized, how intrusive
//! should it be right now? It decides HOW an alert is delivered, never
//! WHETHER the alert exists, and never what the UI looks like.
//!
//! Pure, deterministic, O(1). No timers, no I/O, no device assumptions.

use serde::{Deserialize, Serialize};

use super::selection::DeviceContext;

// ============================================================================
// Constants
// ============================================================================

/// Life-safety threshold: at or above this priority the level is always
/// critical, regardless of quiet hours, cooldown, or device support.
pub const LIFE_SAFETY_THRESHOLD: i32 = 150;

/// Priority thresholds for the base attention level mapping.
pub const PRIORITY_INTERRUPT: i32 = 100;
pub const PRIORITY_NOTIFY: i32 = 50;
pub const PRIORITY_GLANCE: i32 = 20;

// ============================================================================
// Core Types
// ============================================================================

/// How intrusive an alert should be, ordered least to most intrusive.
///
/// This is the only output of the attention model.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AttentionLevel {
    /// Background, ambient, no interruption.
    Passive,
    /// Visible if looking, no interruption.
    Glance,
    /// Notification-style, dismissible.
    Notify,
    /// Interrupts current content.
    Interrupt,
    /// Overrides everything (life safety).
    Critical,
}

impl AttentionLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passive => "passive",
            Self::Glance => "glance",
            Self::Notify => "notify",
            Self::Interrupt => "interrupt",
            Self::Critical => "critical",
        }
    }

    /// One step more intrusive, saturating at critical.
    fn step_up(self) -> Self {
        match self {
            Self::Passive => Self::Glance,
            Self::Glance => Self::Notify,
            Self::Notify => Self::Interrupt,
            Self::Interrupt | Self::Critical => Self::Critical,
        }
    }

    fn cap_at(self, cap: Self) -> Self {
        if self > cap { cap } else { self }
    }
}

/// All inputs for computing an attention level. Primitives only.
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionContext {
    /// Alert priority, 1-199.
    pub alert_priority: i32,
    /// Whether quiet hours are currently active.
    pub quiet_hours: bool,
    /// Whether the alert is inside a cooldown period.
    pub cooldown_active: bool,
    /// Number of escalation steps applied (0 = none).
    pub escalation_level: u32,
    /// Whether someone is in close proximity to the device.
    pub device_proximity_near: bool,
    /// Whether the device can show interruptions at all.
    pub device_supports_interruptions: bool,
    /// Whether the device was recently used.
    pub device_recently_active: bool,
}

impl AttentionContext {
    pub fn new(alert_priority: i32) -> Self {
        Self {
            alert_priority,
            quiet_hours: false,
            cooldown_active: false,
            escalation_level: 0,
            device_proximity_near: false,
            device_supports_interruptions: true,
            device_recently_active: false,
        }
    }
}

// ============================================================================
// Core Decision Function
// ============================================================================

/// Compute the appropriate attention level for an alert.
///
/// Decision rules, in order:
/// 1. Life-safety bypass: priority >= 150 is critical, unconditionally.
/// 2. Cooldown with no escalation suppresses to passive.
/// 3. Base level from priority thresholds.
/// 4. Escalation steps the level up, clamped at critical.
/// 5. Nearby and recently-active devices step up once more.
/// 6. Devices without interruption support cap at glance.
/// 7. Quiet hours cap everything else at notify.
pub fn compute_attention_level(context: &AttentionContext) -> AttentionLevel {
    // Rule 1: life safety always wins.
    if context.alert_priority >= LIFE_SAFETY_THRESHOLD {
        return AttentionLevel::Critical;
    }

    // Rule 2: cooldown suppression.
    if context.cooldown_active && context.escalation_level == 0 {
        return AttentionLevel::Passive;
    }

    // Rule 3: base level from priority.
    let mut level = base_attention_from_priority(context.alert_priority);

    // Rule 4: escalation.
    for _ in 0..context.escalation_level {
        level = level.step_up();
    }

    // Rule 5: presence modulation.
    if context.device_proximity_near && context.device_recently_active {
        level = level.step_up();
    }

    // Rule 6: ambient-only devices cap at glance.
    if !context.device_supports_interruptions {
        level = level.cap_at(AttentionLevel::Glance);
    }

    // Rule 7: quiet hours cap at notify (critical handled in rule 1).
    if context.quiet_hours && level > AttentionLevel::Notify {
        level = AttentionLevel::Notify;
    }

    level
}

/// Bridge from a [`DeviceContext`] to an [`AttentionContext`].
///
/// Missing signals take conservative defaults: interruption support is
/// assumed, proximity and recent activity are not.
pub fn compute_attention_level_from_device(
    alert_priority: i32,
    device: &DeviceContext,
    quiet_hours: bool,
    cooldown_active: bool,
    escalation_level: u32,
) -> AttentionLevel {
    let context = AttentionContext {
        alert_priority,
        quiet_hours,
        cooldown_active,
        escalation_level,
        device_proximity_near: device.signal_bool("proximity_active").unwrap_or(false),
        device_supports_interruptions: device
            .signal_bool("supports_interruptions")
            .unwrap_or(true),
        device_recently_active: device.signal_bool("recently_active").unwrap_or(false),
    };
    compute_attention_level(&context)
}

fn base_attention_from_priority(priority: i32) -> AttentionLevel {
    if priority >= LIFE_SAFETY_THRESHOLD {
        AttentionLevel::Critical
    } else if priority >= PRIORITY_INTERRUPT {
        AttentionLevel::Interrupt
    } else if priority >= PRIORITY_NOTIFY {
        AttentionLevel::Notify
    } else if priority >= PRIORITY_GLANCE {
        AttentionLevel::Glance
    } else {
        AttentionLevel::Passive
    }
}
