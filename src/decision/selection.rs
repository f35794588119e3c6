//! Device selection for alert targeting.
//!
//! Picks the best single target panel for a realized alert using
//! eligibility (online, permitted, capable), context (room match), recency
//! (last interaction), and device-declared signals.
//!
//! Invariants:
//! - Pure function, no I/O, no side effects
//! - Deterministic: input order does not affect the result
//! - Signal-agnostic: works with an empty signal bag
//! - Unknown signal keys and wrong-typed values are ignored, never coerced

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Constants
// ============================================================================

/// Ambient light thresholds for lux-based scoring.
pub const HIGH_LUX_THRESHOLD: f64 = 500.0;
pub const LOW_LUX_THRESHOLD: f64 = 50.0;

/// Recency window for "recent interaction", in seconds.
pub const RECENT_INTERACTION_SECONDS: f64 = 300.0;

const SCORE_ROOM_MATCH: i32 = 100;
const SCORE_SAME_ROOM_FALLBACK: i32 = 25;
const SCORE_RECENT_INTERACTION: i32 = 50;
const SCORE_RECENTLY_ACTIVE: i32 = 40;
const SCORE_PROXIMITY_ACTIVE: i32 = 30;
const SCORE_SCREEN_FACING: i32 = 20;
const SCORE_LOW_LUX_BOOST: i32 = 20;
const SCORE_HIGH_LUX_PENALTY: i32 = -10;

// ============================================================================
// Data Types
// ============================================================================

/// Runtime context for a device during selection.
///
/// Signals are device-owned declarations, not host-derived state: devices
/// publish facts, the coordinator provides judgment. Missing signals are
/// "unknown", never false; selection logic consumes them without
/// reinterpreting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceContext {
    pub device_id: String,
    pub room: Option<String>,
    pub online: bool,
    /// Unix timestamp of last user interaction, if any.
    pub last_interaction_ts: Option<f64>,
    /// Extensible signal bag with runtime hints.
    pub signals: Map<String, Value>,
}

impl DeviceContext {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            room: None,
            online: true,
            last_interaction_ts: None,
            signals: Map::new(),
        }
    }

    /// Typed signal extraction: a stored value of any other JSON type is
    /// treated as missing.
    pub fn signal_bool(&self, key: &str) -> Option<bool> {
        self.signals.get(key).and_then(Value::as_bool)
    }

    /// Typed signal extraction for numeric signals.
    pub fn signal_number(&self, key: &str) -> Option<f64> {
        self.signals.get(key).and_then(Value::as_f64)
    }
}

/// Alert targeting information for device selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertTarget {
    /// Target room for the alert, if room-specific.
    pub room_id: Option<String>,
    /// Capabilities the device must declare.
    pub required_capabilities: HashSet<String>,
    /// Device IDs explicitly excluded.
    pub excluded_devices: HashSet<String>,
}

/// Declared device capabilities for eligibility checking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub capabilities: HashSet<String>,
    /// Suppressed devices never receive alerts.
    pub suppressed: bool,
}

/// Result of device selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    /// Selected device, or `None` when no device qualifies.
    pub device_id: Option<String>,
    pub score: i32,
    /// Per-component breakdown of the winning score.
    pub score_breakdown: BTreeMap<String, i32>,
    /// Number of devices that passed eligibility and were scored.
    pub candidates_evaluated: usize,
}

impl SelectionResult {
    fn none() -> Self {
        Self {
            device_id: None,
            score: 0,
            score_breakdown: BTreeMap::new(),
            candidates_evaluated: 0,
        }
    }
}

// ============================================================================
// Selection Algorithm
// ============================================================================

/// Select the best single target device for an alert.
///
/// Filters to eligible candidates, scores each, then breaks ties by
/// `(score desc, elapsed-since-interaction asc, device_id asc)`. A device
/// with no recorded interaction sorts last among equals.
pub fn select_device(
    target: &AlertTarget,
    devices: &[DeviceContext],
    capabilities: &HashMap<String, DeviceCapabilities>,
    current_time: f64,
) -> SelectionResult {
    // Step 1: eligibility. Signals cannot override any of these gates.
    let eligible: Vec<&DeviceContext> = devices
        .iter()
        .filter(|device| {
            if !device.online {
                return false;
            }
            if target.excluded_devices.contains(&device.device_id) {
                return false;
            }
            let Some(caps) = capabilities.get(&device.device_id) else {
                // Unknown device.
                return false;
            };
            if caps.suppressed {
                return false;
            }
            target
                .required_capabilities
                .iter()
                .all(|cap| caps.capabilities.contains(cap))
        })
        .collect();

    if eligible.is_empty() {
        return SelectionResult::none();
    }

    // Step 2: score.
    let mut scored: Vec<(&DeviceContext, i32, BTreeMap<String, i32>)> = eligible
        .iter()
        .map(|device| {
            let (score, breakdown) = compute_device_score(device, target, current_time);
            (*device, score, breakdown)
        })
        .collect();

    // Step 3: deterministic ordering.
    scored.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| {
                elapsed_since_interaction(a.0, current_time)
                    .total_cmp(&elapsed_since_interaction(b.0, current_time))
            })
            .then_with(|| a.0.device_id.cmp(&b.0.device_id))
    });

    let candidates_evaluated = scored.len();
    let (winner, score, score_breakdown) = scored.swap_remove(0);
    SelectionResult {
        device_id: Some(winner.device_id.clone()),
        score,
        score_breakdown,
        candidates_evaluated,
    }
}

fn elapsed_since_interaction(device: &DeviceContext, current_time: f64) -> f64 {
    device
        .last_interaction_ts
        .map_or(f64::INFINITY, |ts| current_time - ts)
}

fn compute_device_score(
    device: &DeviceContext,
    target: &AlertTarget,
    current_time: f64,
) -> (i32, BTreeMap<String, i32>) {
    let mut score = 0;
    let mut breakdown = BTreeMap::new();

    // Room context.
    if let Some(room_id) = &target.room_id {
        if device.room.as_deref() == Some(room_id.as_str()) {
            score += SCORE_ROOM_MATCH;
            breakdown.insert("room_match".to_string(), SCORE_ROOM_MATCH);
        } else if device.room.is_some() {
            score += SCORE_SAME_ROOM_FALLBACK;
            breakdown.insert("same_room_fallback".to_string(), SCORE_SAME_ROOM_FALLBACK);
        }
    }

    // Recency.
    if let Some(ts) = device.last_interaction_ts {
        let elapsed = current_time - ts;
        if (0.0..RECENT_INTERACTION_SECONDS).contains(&elapsed) {
            score += SCORE_RECENT_INTERACTION;
            breakdown.insert("recent_interaction".to_string(), SCORE_RECENT_INTERACTION);
        }
    }

    // Signal-based modifiers. Wrong-typed values contribute nothing.
    if device.signal_bool("recently_active") == Some(true) {
        score += SCORE_RECENTLY_ACTIVE;
        breakdown.insert("recently_active".to_string(), SCORE_RECENTLY_ACTIVE);
    }
    if device.signal_bool("proximity_active") == Some(true) {
        score += SCORE_PROXIMITY_ACTIVE;
        breakdown.insert("proximity_active".to_string(), SCORE_PROXIMITY_ACTIVE);
    }
    if device.signal_bool("screen_facing") == Some(true) {
        score += SCORE_SCREEN_FACING;
        breakdown.insert("screen_facing".to_string(), SCORE_SCREEN_FACING);
    }
    if let Some(lux) = device.signal_number("ambient_lux") {
        if lux < LOW_LUX_THRESHOLD {
            score += SCORE_LOW_LUX_BOOST;
            breakdown.insert("low_lux".to_string(), SCORE_LOW_LUX_BOOST);
        } else if lux > HIGH_LUX_THRESHOLD {
            score += SCORE_HIGH_LUX_PENALTY;
            breakdown.insert("high_lux".to_string(), SCORE_HIGH_LUX_PENALTY);
        }
    }

    (score, breakdown)
}
