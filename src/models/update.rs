use serde::Deserialize;
use serde_json::Value;

/// Numeric field as producers actually send it: a JSON number, a numeric
/// string, or something else entirely (kept so validation can name the field).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum NumericField {
    Number(f64),
    Text(String),
    Other(Value),
}

/// Inbound body of `POST /api/update/` and of mirror stream events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationUpdate {
    #[serde(default)]
    pub lat: Option<NumericField>,
    #[serde(default)]
    pub lng: Option<NumericField>,
    /// Historical name for `lng`, only consulted when `lng` is absent.
    #[serde(default)]
    pub lon: Option<NumericField>,
    #[serde(default)]
    pub speed: Option<NumericField>,
    #[serde(default)]
    pub accuracy: Option<NumericField>,
    #[serde(default)]
    pub bearing: Option<NumericField>,
    #[serde(default, rename = "busId", alias = "bus_id")]
    pub bus_id: Option<String>,
}
