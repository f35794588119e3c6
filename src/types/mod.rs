//! Canonical type kernel
//!
//! Immutable `Fact` and `Intent` values crossing the adapter boundary.
//! Construction validates confidence ranges, identifier presence, and the
//! per-type payload schema, so everything downstream can trust the shape.

mod fact;
mod intent;
mod schema;

pub use fact::{Fact, FactError, FactType, fact_schema};
pub use intent::{Intent, IntentError, IntentType, intent_schema};
pub use schema::{FieldKind, FieldSpec, SchemaViolation};
