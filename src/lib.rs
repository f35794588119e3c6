//! Trestle Coordinator Core
//!
//! Mediates between a heterogeneous smart-home ecosystem and a set of small
//! interactive display panels.
//!
//! ## Architecture
//!
//! - **Adapter boundary**: canonical facts in, canonical intents out; no
//!   ecosystem identifiers cross into core state
//! - **Decision pipeline**: profile → policy → attention → selection →
//!   realization, all pure and total
//! - **Panel sessions**: authenticated WebSocket sessions with batching,
//!   sequence-tracked deltas, keepalive, and reconnect

pub mod adapter;
pub mod decision;
pub mod domains;
pub mod pipeline;
pub mod policy;
pub mod profile;
pub mod protocol;
pub mod session;
pub mod trace;
pub mod transport;
pub mod types;

// Re-export the canonical kernel
pub use types::{Fact, FactError, FactType, Intent, IntentError, IntentType};

// Re-export the adapter boundary
pub use adapter::{AdapterError, AdapterHealth, EcosystemAdapter, FactSink, Unsubscribe};

// Re-export profile loading
pub use profile::{
    DomainSchema, DomainScope, LoadedPolicy, LoadedProfile, PolicyRule, ProfileError, QuietHours,
    load_profile,
};

// Re-export the policy engine
pub use policy::{
    DomainState, Importance, IntentCandidate, evaluate_all_states, evaluate_domain_update,
};

// Re-export decision components
pub use decision::{
    AlertTarget, AttentionContext, AttentionLevel, DeviceCapabilities, DeviceContext,
    RealizationIntent, SelectionResult, compute_attention_level, realize_attention, select_device,
};

// Re-export session and transport surface
pub use session::{ConnectionState, Session, SessionConfig};
pub use transport::{ClientError, HttpClient, WsClient, WsMessage};
