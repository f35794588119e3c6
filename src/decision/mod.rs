//! Deterministic decision pipeline
//!
//! Pure, total functions answering three questions for a winning intent
//! candidate:
//!
//! - **Attention**: how intrusive should the alert be right now?
//! - **Selection**: which panel should carry it?
//! - **Realization**: which concrete output channels should fire?

pub mod attention;
pub mod realization;
pub mod selection;

pub use attention::{
    AttentionContext, AttentionLevel, LIFE_SAFETY_THRESHOLD, PRIORITY_GLANCE, PRIORITY_INTERRUPT,
    PRIORITY_NOTIFY, compute_attention_level, compute_attention_level_from_device,
};
pub use realization::{
    Intensity, OutputChannel, RealizationIntent, produce_realization_frame, realization_profile,
    realize_attention,
};
pub use selection::{
    AlertTarget, DeviceCapabilities, DeviceContext, SelectionResult, select_device,
};
