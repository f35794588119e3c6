//! Attention → realization mapping.
//!
//! Answers one question: given an attention level, what concrete outputs
//! should this device perform? Consumes an [`AttentionLevel`], emits
//! abstract realization intents. Device capabilities only FILTER the
//! baseline profile; they never modify per-intent fields and never
//! downgrade the attention level.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::attention::AttentionLevel;
use super::selection::DeviceContext;

// ============================================================================
// Output Channels
// ============================================================================

/// Output modality for alert delivery. These are capabilities, not
/// implementations - the device decides how to render each channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputChannel {
    Visual,
    Audio,
    Haptic,
    Ambient,
}

/// Output intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Low,
    Medium,
    High,
}

// ============================================================================
// Realization Intent
// ============================================================================

/// Abstract output intent for a single channel.
///
/// Nothing here says HOW to draw, beep, or vibrate; the device interprets
/// these into concrete UI/audio/haptic actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealizationIntent {
    pub channel: OutputChannel,
    pub intensity: Intensity,
    /// Whether the output persists until dismissed.
    pub persistent: bool,
    /// Whether the output interrupts the user.
    pub interruptive: bool,
}

impl RealizationIntent {
    const fn new(
        channel: OutputChannel,
        intensity: Intensity,
        persistent: bool,
        interruptive: bool,
    ) -> Self {
        Self {
            channel,
            intensity,
            persistent,
            interruptive,
        }
    }
}

// ============================================================================
// Realization Profiles
// ============================================================================

/// Baseline intents for each attention level. This is policy, not
/// user-configurable. Device capabilities filter these; they never change
/// the attention level.
pub fn realization_profile(level: AttentionLevel) -> &'static [RealizationIntent] {
    use self::{Intensity as I, OutputChannel as C};
    // Ambient only, low intensity.
    const PASSIVE: &[RealizationIntent] = &[RealizationIntent::new(C::Ambient, I::Low, false, false)];
    // Visual only, non-interruptive.
    const GLANCE: &[RealizationIntent] = &[RealizationIntent::new(C::Visual, I::Low, false, false)];
    // Persistent visual plus a quiet audio cue.
    const NOTIFY: &[RealizationIntent] = &[
        RealizationIntent::new(C::Visual, I::Medium, true, false),
        RealizationIntent::new(C::Audio, I::Low, false, false),
    ];
    // Interruptive on every supported channel.
    const INTERRUPT: &[RealizationIntent] = &[
        RealizationIntent::new(C::Visual, I::High, false, true),
        RealizationIntent::new(C::Audio, I::Medium, false, true),
        RealizationIntent::new(C::Haptic, I::Medium, false, true),
    ];
    // Everything, persistent and interruptive.
    const CRITICAL: &[RealizationIntent] = &[
        RealizationIntent::new(C::Visual, I::High, true, true),
        RealizationIntent::new(C::Audio, I::High, true, true),
        RealizationIntent::new(C::Haptic, I::High, true, true),
    ];

    match level {
        AttentionLevel::Passive => PASSIVE,
        AttentionLevel::Glance => GLANCE,
        AttentionLevel::Notify => NOTIFY,
        AttentionLevel::Interrupt => INTERRUPT,
        AttentionLevel::Critical => CRITICAL,
    }
}

// ============================================================================
// Realization
// ============================================================================

/// Map an attention level to the intents a specific device should execute.
///
/// Looks up the baseline profile and drops channels the device does not
/// support: audio defaults to supported when undeclared, haptic and ambient
/// default to unsupported, visual is always admitted. Filtering never
/// changes per-intent fields. An empty result is legal.
pub fn realize_attention(
    attention: AttentionLevel,
    device: &DeviceContext,
) -> Vec<RealizationIntent> {
    let supports_audio = device.signal_bool("supports_audio").unwrap_or(true);
    let supports_haptic = device.signal_bool("supports_haptic").unwrap_or(false);
    let supports_ambient = device.signal_bool("supports_ambient").unwrap_or(false);

    realization_profile(attention)
        .iter()
        .filter(|intent| match intent.channel {
            OutputChannel::Visual => true,
            OutputChannel::Audio => supports_audio,
            OutputChannel::Haptic => supports_haptic,
            OutputChannel::Ambient => supports_ambient,
        })
        .copied()
        .collect()
}

/// Produce the wire-ready realization frame devices consume.
pub fn produce_realization_frame(
    alert_id: &str,
    attention: AttentionLevel,
    intents: &[RealizationIntent],
) -> Value {
    json!({
        "type": "alert_realization",
        "alert_id": alert_id,
        "attention": attention.as_str(),
        "outputs": intents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn device_with_signals(entries: &[(&str, Value)]) -> DeviceContext {
        let mut device = DeviceContext::new("panel_test");
        for (key, value) in entries {
            device.signals.insert((*key).to_string(), value.clone());
        }
        device
    }

    #[test]
    fn every_level_has_a_profile() {
        for level in [
            AttentionLevel::Passive,
            AttentionLevel::Glance,
            AttentionLevel::Notify,
            AttentionLevel::Interrupt,
            AttentionLevel::Critical,
        ] {
            assert!(!realization_profile(level).is_empty());
        }
    }

    #[test]
    fn visual_always_passes_through() {
        let device = device_with_signals(&[
            ("supports_audio", json!(false)),
            ("supports_haptic", json!(false)),
            ("supports_ambient", json!(false)),
        ]);
        let intents = realize_attention(AttentionLevel::Critical, &device);
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].channel, OutputChannel::Visual);
    }

    #[test]
    fn audio_defaults_to_supported() {
        let device = DeviceContext::new("panel_test");
        let intents = realize_attention(AttentionLevel::Notify, &device);
        assert!(intents.iter().any(|i| i.channel == OutputChannel::Audio));
    }

    #[test]
    fn haptic_and_ambient_default_to_unsupported() {
        let device = DeviceContext::new("panel_test");

        let intents = realize_attention(AttentionLevel::Interrupt, &device);
        assert!(!intents.iter().any(|i| i.channel == OutputChannel::Haptic));

        let intents = realize_attention(AttentionLevel::Passive, &device);
        assert!(intents.is_empty());
    }

    #[test]
    fn declared_haptic_support_admits_haptics() {
        let device = device_with_signals(&[("supports_haptic", json!(true))]);
        let intents = realize_attention(AttentionLevel::Interrupt, &device);
        assert!(intents.iter().any(|i| i.channel == OutputChannel::Haptic));
    }

    #[test]
    fn filtering_never_alters_intent_fields() {
        // Every surviving intent is byte-identical to its profile entry.
        let devices = [
            DeviceContext::new("bare"),
            device_with_signals(&[("supports_audio", json!(false))]),
            device_with_signals(&[
                ("supports_haptic", json!(true)),
                ("supports_ambient", json!(true)),
            ]),
        ];
        for level in [
            AttentionLevel::Passive,
            AttentionLevel::Glance,
            AttentionLevel::Notify,
            AttentionLevel::Interrupt,
            AttentionLevel::Critical,
        ] {
            let profile = realization_profile(level);
            for device in &devices {
                for intent in realize_attention(level, device) {
                    assert!(
                        profile.contains(&intent),
                        "filtered intent mutated for {level:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn wrong_typed_capability_signal_falls_back_to_default() {
        // "supports_audio": "no" is not a bool, so the default (true) holds.
        let device = device_with_signals(&[("supports_audio", json!("no"))]);
        let intents = realize_attention(AttentionLevel::Notify, &device);
        assert!(intents.iter().any(|i| i.channel == OutputChannel::Audio));
    }

    #[test]
    fn frame_carries_envelope_fields() {
        let intents = realize_attention(AttentionLevel::Glance, &DeviceContext::new("p"));
        let frame = produce_realization_frame("alert-7", AttentionLevel::Glance, &intents);
        assert_eq!(frame["type"], "alert_realization");
        assert_eq!(frame["alert_id"], "alert-7");
        assert_eq!(frame["attention"], "glance");
        assert_eq!(frame["outputs"].as_array().unwrap().len(), 1);
        assert_eq!(frame["outputs"][0]["channel"], "visual");
        assert_eq!(frame["outputs"][0]["intensity"], "low");
    }
}
