// Kumo Cloud wire models
//
// Every payload keeps unknown keys in `extra` so nothing the cloud sends is
// silently dropped. Numeric and flag fields go through lenient
// deserializers: the cloud mixes `0`/`1`, booleans and numeric strings
// between REST responses and socket events.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ── Auth ─────────────────────────────────────────────────────────────

/// Access/refresh token pair returned by `/v3/login` and `/v3/refresh`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
    #[serde(default)]
    pub access: String,
    #[serde(default)]
    pub refresh: String,
}

/// `POST /v3/login` response. Only the token pair is consumed.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: TokenPair,
}

// ── Sites & zones ────────────────────────────────────────────────────

/// A site (home) on the account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Site {
    /// Display name, falling back to the site id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// A zone within a site. Each zone wraps one indoor unit's adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub adapter: Option<AdapterState>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// ── Device state ─────────────────────────────────────────────────────

/// LED/maintenance indicators reported by the adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayConfig {
    #[serde(default)]
    pub filter: Option<bool>,
    #[serde(default)]
    pub defrost: Option<bool>,
    #[serde(default)]
    pub hot_adjust: Option<bool>,
    #[serde(default)]
    pub standby: Option<bool>,
}

/// Adapter state as carried by zone listings, `device_update` socket events
/// and the `/v3/devices/{serial}` detail endpoint.
///
/// Every field is optional: socket events are partial and only carry what
/// changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterState {
    #[serde(default)]
    pub device_serial: Option<String>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub power: Option<bool>,
    #[serde(default)]
    pub operation_mode: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub sp_cool: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub sp_heat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub sp_auto: Option<f64>,
    #[serde(default)]
    pub fan_speed: Option<String>,
    #[serde(default)]
    pub air_direction: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub room_temp: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub humidity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub rssi: Option<f64>,
    #[serde(default)]
    pub two_figures_code: Option<String>,
    #[serde(default)]
    pub schedule_owner: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub model_number: Option<String>,
    /// A model string on adapters, a model-info object on device details.
    #[serde(default)]
    pub model: Option<Value>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub connected: Option<bool>,
    #[serde(default)]
    pub display_config: Option<DisplayConfig>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub room_temp_display_offset: Option<f64>,
    #[serde(default)]
    pub last_status_change_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    /// Event timestamp on socket payloads.
    #[serde(default)]
    pub date: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl AdapterState {
    /// Operating mode, preferring `operationMode` over the legacy `mode` key.
    pub fn operation_mode(&self) -> Option<&str> {
        self.operation_mode.as_deref().or(self.mode.as_deref())
    }

    /// Model number from whichever key the payload used.
    pub fn model_number(&self) -> Option<&str> {
        self.model_number
            .as_deref()
            .or_else(|| self.model.as_ref().and_then(Value::as_str))
            .or(self.model_name.as_deref())
            .filter(|m| !m.is_empty())
    }

    /// Server-side timestamp of this payload, when present and parseable.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.date.as_deref()).or_else(|| parse_timestamp(self.updated_at.as_deref()))
    }
}

/// Connectivity report delivered by `device_status_v2`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    #[serde(default)]
    pub device_serial: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub last_time_connected: Option<String>,
    #[serde(default)]
    pub last_time_disconnected: Option<String>,
    #[serde(default)]
    pub last_disconnected_reason: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DeviceStatus {
    /// `Some(true)` when the adapter reports `"connected"`.
    pub fn is_connected(&self) -> Option<bool> {
        self.status.as_deref().map(|s| s == "connected")
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.date.as_deref())
    }
}

// ── Weather ──────────────────────────────────────────────────────────

/// Outdoor conditions for a site, as returned by `/v3/sites/{site}/weather`.
///
/// The cloud does not pin this payload down; keys are kept as sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Weather {
    pub values: BTreeMap<String, Value>,
}

impl Weather {
    /// Numeric reading under `key`, accepting numeric strings.
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.values.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// `POST /v3/devices/send-command` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest<'a> {
    pub device_serial: &'a str,
    pub commands: &'a serde_json::Map<String, Value>,
}

// ── Lenient helpers ──────────────────────────────────────────────────

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Accepts `true`/`false`, `0`/`1`, and their string forms. Anything else is
/// treated as absent rather than failing the whole payload.
fn lenient_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0),
        Some(Value::String(s)) => match s.as_str() {
            "1" | "true" | "on" => Some(true),
            "0" | "false" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// Accepts JSON numbers and numeric strings.
fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}
