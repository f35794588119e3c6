//! Weather domain outputs and the native-observation transform.
//!
//! Maps an ecosystem-native weather observation (a state string plus an
//! attribute map) into canonical [`WeatherOutputs`]: a closed condition
//! enum, normalized humidity, and a forecast capped at five entries.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum forecast entries carried on the wire.
pub const MAX_FORECAST_ENTRIES: usize = 5;

/// Canonical weather condition states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    Clear,
    PartlyCloudy,
    Cloudy,
    Rain,
    Snow,
    Storm,
    Mixed,
}

impl WeatherCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::PartlyCloudy => "partly_cloudy",
            Self::Cloudy => "cloudy",
            Self::Rain => "rain",
            Self::Snow => "snow",
            Self::Storm => "storm",
            Self::Mixed => "mixed",
        }
    }

    /// Map a native weather state string onto the canonical enum. Unknown
    /// strings map to `Mixed`.
    fn from_native_state(state: &str) -> Self {
        match state {
            "sunny" | "clear-night" | "windy" => Self::Clear,
            "partlycloudy" | "windy-variant" => Self::PartlyCloudy,
            "cloudy" | "fog" => Self::Cloudy,
            "rainy" | "pouring" => Self::Rain,
            "snowy" => Self::Snow,
            "lightning" | "lightning-rainy" | "hail" => Self::Storm,
            _ => Self::Mixed,
        }
    }

    fn icon_key(self) -> &'static str {
        match self {
            Self::Clear => "weather_sunny",
            Self::PartlyCloudy => "weather_partly_cloudy",
            Self::Cloudy => "weather_cloudy",
            Self::Rain => "weather_rainy",
            Self::Snow => "weather_snowy",
            Self::Storm => "weather_lightning",
            Self::Mixed => "weather_mixed",
        }
    }
}

/// A single forecast entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherForecastEntry {
    /// Canonical day identifier ("D0", "D1", ...).
    pub day_id: String,
    pub temp_high: f64,
    pub temp_low: f64,
    /// Icon asset key shared between coordinator and panel.
    pub icon_key: String,
    /// Short label rendered by the panel (e.g. "Tue").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_label: Option<String>,
    /// Chance of precipitation, 0.0-1.0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precipitation_percent: Option<f64>,
    /// Short condition summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Weather domain outputs.
///
/// Optional fields are omitted from the wire map to keep payloads small;
/// the forecast is hard-capped at [`MAX_FORECAST_ENTRIES`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherOutputs {
    pub weather_condition: WeatherCondition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_icon_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_temp_current: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_temp_high_today: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_temp_low_today: Option<f64>,
    /// Current humidity normalized to 0.0-1.0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_wind_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_precipitation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_pollen: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_observation_ts_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_status_line: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weather_forecast: Vec<WeatherForecastEntry>,
}

impl WeatherOutputs {
    pub fn new(condition: WeatherCondition) -> Self {
        Self {
            weather_condition: condition,
            weather_location: None,
            weather_icon_key: None,
            weather_temp_current: None,
            weather_temp_high_today: None,
            weather_temp_low_today: None,
            weather_humidity: None,
            weather_wind_speed: None,
            weather_precipitation: None,
            weather_pollen: None,
            weather_observation_ts_ms: None,
            weather_status_line: None,
            weather_forecast: Vec::new(),
        }
    }

    /// Build canonical weather outputs from a native weather observation.
    ///
    /// `state` is the native condition string; `attributes` is the native
    /// attribute map. Humidity above 1.0 is treated as a 0-100 percentage.
    /// Forecast entries beyond five are dropped.
    pub fn from_native_observation(
        state: &str,
        attributes: &Map<String, Value>,
        location: Option<&str>,
    ) -> Self {
        let condition = WeatherCondition::from_native_state(state);

        let mut outputs = Self::new(condition);
        outputs.weather_location = location
            .map(str::to_string)
            .or_else(|| attr_str(attributes, "friendly_name"));
        outputs.weather_icon_key = Some(condition.icon_key().to_string());
        outputs.weather_temp_current = attr_f64(attributes, "temperature");
        outputs.weather_humidity = attr_f64(attributes, "humidity").map(normalize_humidity);
        outputs.weather_wind_speed = attr_f64(attributes, "wind_speed");
        outputs.weather_precipitation = attr_f64(attributes, "precipitation");

        if let Some(Value::Array(forecast)) = attributes.get("forecast") {
            outputs.weather_forecast = forecast
                .iter()
                .take(MAX_FORECAST_ENTRIES)
                .enumerate()
                .filter_map(|(i, entry)| forecast_entry(i, entry))
                .collect();
        }

        outputs
    }
}

fn attr_str(attributes: &Map<String, Value>, key: &str) -> Option<String> {
    attributes.get(key).and_then(Value::as_str).map(str::to_string)
}

fn attr_f64(attributes: &Map<String, Value>, key: &str) -> Option<f64> {
    attributes.get(key).and_then(Value::as_f64)
}

/// Humidity above 1.0 is a 0-100 percentage; divide down.
fn normalize_humidity(humidity: f64) -> f64 {
    if humidity > 1.0 {
        humidity / 100.0
    } else {
        humidity
    }
}

/// Precipitation probability above 1.0 (or any integer) is a percentage.
fn normalize_precipitation(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => n.as_f64().map(|p| p / 100.0),
        Value::Number(n) => n.as_f64().map(|p| if p > 1.0 { p / 100.0 } else { p }),
        _ => None,
    }
}

fn forecast_entry(index: usize, entry: &Value) -> Option<WeatherForecastEntry> {
    let entry = entry.as_object()?;
    let temperature = attr_f64(entry, "temperature");
    let templow = attr_f64(entry, "templow");
    let native_condition = attr_str(entry, "condition");

    Some(WeatherForecastEntry {
        day_id: format!("D{index}"),
        temp_high: temperature.or(templow).unwrap_or(0.0),
        temp_low: templow.or(temperature).unwrap_or(0.0),
        icon_key: native_condition
            .as_deref()
            .map(forecast_icon_key)
            .unwrap_or("weather_unknown")
            .to_string(),
        day_label: attr_str(entry, "datetime").as_deref().and_then(day_label),
        precipitation_percent: entry
            .get("precipitation_probability")
            .and_then(normalize_precipitation),
        status: native_condition,
    })
}

fn forecast_icon_key(native_condition: &str) -> &'static str {
    match native_condition {
        "sunny" => "weather_sunny",
        "clear-night" => "weather_clear_night",
        "partlycloudy" => "weather_partly_cloudy",
        "cloudy" => "weather_cloudy",
        "rainy" => "weather_rainy",
        "pouring" => "weather_pouring",
        "snowy" => "weather_snowy",
        "snowy-rainy" => "weather_mixed",
        "lightning" => "weather_lightning",
        "lightning-rainy" => "weather_lightning_rainy",
        "hail" => "weather_hail",
        "fog" => "weather_fog",
        "windy" | "windy-variant" => "weather_windy",
        _ => "weather_unknown",
    }
}

/// Short weekday label ("Mon", "Tue") from an ISO datetime string.
fn day_label(datetime: &str) -> Option<String> {
    let normalized = datetime.replace('Z', "+00:00");
    DateTime::parse_from_rfc3339(&normalized)
        .ok()
        .map(|dt| dt.format("%a").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn known_native_states_map_to_conditions() {
        assert_eq!(WeatherCondition::from_native_state("sunny"), WeatherCondition::Clear);
        assert_eq!(
            WeatherCondition::from_native_state("partlycloudy"),
            WeatherCondition::PartlyCloudy
        );
        assert_eq!(WeatherCondition::from_native_state("pouring"), WeatherCondition::Rain);
        assert_eq!(WeatherCondition::from_native_state("hail"), WeatherCondition::Storm);
        assert_eq!(WeatherCondition::from_native_state("fog"), WeatherCondition::Cloudy);
    }

    #[test]
    fn unknown_native_state_maps_to_mixed() {
        assert_eq!(
            WeatherCondition::from_native_state("plasma-storm"),
            WeatherCondition::Mixed
        );
        let outputs =
            WeatherOutputs::from_native_observation("plasma-storm", &Map::new(), None);
        assert_eq!(outputs.weather_condition, WeatherCondition::Mixed);
    }

    #[test]
    fn percentage_humidity_is_normalized() {
        let outputs = WeatherOutputs::from_native_observation(
            "sunny",
            &attrs(json!({"humidity": 55.0})),
            None,
        );
        assert_eq!(outputs.weather_humidity, Some(0.55));
    }

    #[test]
    fn fractional_humidity_passes_through() {
        let outputs = WeatherOutputs::from_native_observation(
            "sunny",
            &attrs(json!({"humidity": 0.4})),
            None,
        );
        assert_eq!(outputs.weather_humidity, Some(0.4));
    }

    #[test]
    fn forecast_is_capped_at_five_entries() {
        let forecast: Vec<Value> = (0..8)
            .map(|i| json!({"temperature": 20.0 + f64::from(i), "templow": 10.0, "condition": "sunny"}))
            .collect();
        let outputs = WeatherOutputs::from_native_observation(
            "sunny",
            &attrs(json!({"forecast": forecast})),
            None,
        );
        assert_eq!(outputs.weather_forecast.len(), MAX_FORECAST_ENTRIES);
        assert_eq!(outputs.weather_forecast[0].day_id, "D0");
        assert_eq!(outputs.weather_forecast[4].day_id, "D4");
    }

    #[test]
    fn forecast_entries_fall_back_between_temps() {
        let outputs = WeatherOutputs::from_native_observation(
            "sunny",
            &attrs(json!({"forecast": [{"temperature": 21.5, "condition": "rainy"}]})),
            None,
        );
        let entry = &outputs.weather_forecast[0];
        assert_eq!(entry.temp_high, 21.5);
        assert_eq!(entry.temp_low, 21.5);
        assert_eq!(entry.icon_key, "weather_rainy");
    }

    #[test]
    fn forecast_precipitation_probability_is_normalized() {
        let outputs = WeatherOutputs::from_native_observation(
            "rainy",
            &attrs(json!({"forecast": [
                {"temperature": 15.0, "precipitation_probability": 80},
            ]})),
            None,
        );
        assert_eq!(outputs.weather_forecast[0].precipitation_percent, Some(0.8));
    }

    #[test]
    fn day_label_extracted_from_iso_datetime() {
        // 2025-06-02 is a Monday.
        assert_eq!(day_label("2025-06-02T00:00:00Z").as_deref(), Some("Mon"));
        assert_eq!(day_label("not a date"), None);
    }

    #[test]
    fn location_prefers_explicit_over_friendly_name() {
        let attributes = attrs(json!({"friendly_name": "Backyard Station"}));
        let outputs =
            WeatherOutputs::from_native_observation("sunny", &attributes, Some("Home"));
        assert_eq!(outputs.weather_location.as_deref(), Some("Home"));

        let outputs = WeatherOutputs::from_native_observation("sunny", &attributes, None);
        assert_eq!(outputs.weather_location.as_deref(), Some("Backyard Station"));
    }

    #[test]
    fn wire_map_omits_missing_fields() {
        let outputs = WeatherOutputs::from_native_observation("sunny", &Map::new(), None);
        let wire = serde_json::to_value(&outputs).unwrap();
        assert_eq!(wire["weather_condition"], "clear");
        assert_eq!(wire["weather_icon_key"], "weather_sunny");
        assert!(wire.get("weather_temp_current").is_none());
        assert!(wire.get("weather_forecast").is_none());
    }
}
