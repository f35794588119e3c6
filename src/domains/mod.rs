//! Domain-specific ingestion transforms.
//!
//! Each domain maps ecosystem-native observations into its canonical
//! outputs. Weather is the representative transform; further domains follow
//! the same shape.

pub mod weather;

pub use weather::{WeatherCondition, WeatherForecastEntry, WeatherOutputs};
