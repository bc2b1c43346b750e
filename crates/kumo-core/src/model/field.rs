// ── Device attribute fields ──
//
// A device carries a fixed set of typed fields. Each field has one value
// kind; values of the wrong kind are refused by the store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Temperatures closer than this are treated as equal when matching a
/// hold against a remote report (the cloud rounds to 0.5 °C steps).
const TEMPERATURE_EPSILON: f64 = 0.05;

/// Accepted room temperature calibration, in °C.
pub const ROOM_TEMP_OFFSET_RANGE: std::ops::RangeInclusive<f64> = -5.0..=5.0;

// ── Field ───────────────────────────────────────────────────────────

/// An attribute of a device.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Power,
    Mode,
    SetpointCool,
    SetpointHeat,
    SetpointAuto,
    FanSpeed,
    AirDirection,
    RoomTemp,
    Humidity,
    Rssi,
    ErrorCode,
    ModelNumber,
    Connected,
    ScheduleOwner,
    /// Calibration added to the displayed room temperature.
    RoomTempOffset,
    FilterAlert,
    Defrost,
    HotAdjust,
    Standby,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// The value kind this field accepts.
    pub fn kind(self) -> ValueKind {
        match self {
            Self::Power
            | Self::Connected
            | Self::FilterAlert
            | Self::Defrost
            | Self::HotAdjust
            | Self::Standby => ValueKind::Flag,
            Self::Mode => ValueKind::Mode,
            Self::SetpointCool
            | Self::SetpointHeat
            | Self::SetpointAuto
            | Self::RoomTemp
            | Self::RoomTempOffset => ValueKind::Temperature,
            Self::FanSpeed => ValueKind::Fan,
            Self::AirDirection => ValueKind::Vane,
            Self::Humidity => ValueKind::Percent,
            Self::Rssi => ValueKind::Signal,
            Self::ErrorCode | Self::ModelNumber | Self::ScheduleOwner => ValueKind::Text,
        }
    }

    /// Adapter key used by the cloud for this field.
    pub fn wire_key(self) -> &'static str {
        match self {
            Self::Power => "power",
            Self::Mode => "operationMode",
            Self::SetpointCool => "spCool",
            Self::SetpointHeat => "spHeat",
            Self::SetpointAuto => "spAuto",
            Self::FanSpeed => "fanSpeed",
            Self::AirDirection => "airDirection",
            Self::RoomTemp => "roomTemp",
            Self::Humidity => "humidity",
            Self::Rssi => "rssi",
            Self::ErrorCode => "twoFiguresCode",
            Self::ModelNumber => "modelNumber",
            Self::Connected => "connected",
            Self::ScheduleOwner => "scheduleOwner",
            Self::RoomTempOffset => "roomTempDisplayOffset",
            Self::FilterAlert => "filter",
            Self::Defrost => "defrost",
            Self::HotAdjust => "hotAdjust",
            Self::Standby => "standby",
        }
    }

    /// Whether the cloud accepts commands for this field.
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            Self::Power
                | Self::Mode
                | Self::SetpointCool
                | Self::SetpointHeat
                | Self::SetpointAuto
                | Self::FanSpeed
                | Self::AirDirection
                | Self::RoomTempOffset
        )
    }
}

/// Value kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ValueKind {
    Flag,
    Mode,
    Temperature,
    Percent,
    Fan,
    Vane,
    Signal,
    Text,
}

// ── Enumerated values ───────────────────────────────────────────────

/// Indoor unit operating mode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum OperationMode {
    Off,
    Heat,
    Cool,
    Auto,
    AutoHeat,
    AutoCool,
    Dry,
    Vent,
}

/// Fan speed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum FanSpeed {
    SuperQuiet,
    Quiet,
    Low,
    Powerful,
    SuperPowerful,
    Auto,
}

/// Vane position (`Swing` oscillates).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AirDirection {
    Auto,
    Horizontal,
    Midhorizontal,
    Midpoint,
    Midvertical,
    Vertical,
    Swing,
}

// ── FieldValue ──────────────────────────────────────────────────────

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Flag(bool),
    Mode(OperationMode),
    /// Degrees Celsius.
    Temperature(f64),
    Percent(f64),
    Fan(FanSpeed),
    Vane(AirDirection),
    /// dBm.
    Signal(i32),
    Text(String),
}

impl FieldValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Flag(_) => ValueKind::Flag,
            Self::Mode(_) => ValueKind::Mode,
            Self::Temperature(_) => ValueKind::Temperature,
            Self::Percent(_) => ValueKind::Percent,
            Self::Fan(_) => ValueKind::Fan,
            Self::Vane(_) => ValueKind::Vane,
            Self::Signal(_) => ValueKind::Signal,
            Self::Text(_) => ValueKind::Text,
        }
    }

    /// Value equality used for hold confirmation and change detection.
    ///
    /// Temperatures and percentages compare within a small tolerance.
    pub fn matches(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Temperature(a), Self::Temperature(b)) | (Self::Percent(a), Self::Percent(b)) => {
                (a - b).abs() < TEMPERATURE_EPSILON
            }
            _ => self == other,
        }
    }

    /// JSON value in the shape the cloud's command endpoint expects.
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            Self::Flag(on) => serde_json::Value::from(u8::from(*on)),
            Self::Mode(m) => serde_json::Value::from(<&'static str>::from(*m)),
            Self::Temperature(t) | Self::Percent(t) => serde_json::Value::from(*t),
            Self::Fan(f) => serde_json::Value::from(<&'static str>::from(*f)),
            Self::Vane(v) => serde_json::Value::from(<&'static str>::from(*v)),
            Self::Signal(s) => serde_json::Value::from(*s),
            Self::Text(s) => serde_json::Value::from(s.as_str()),
        }
    }

    /// Parse user input for `field` (`on`/`off`, `22.5`, `cool`, `swing`...).
    pub fn parse(field: Field, raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let invalid = |what: &str| format!("invalid {what} for {field}: {raw:?}");
        match field.kind() {
            ValueKind::Flag => match raw.to_ascii_lowercase().as_str() {
                "on" | "true" | "1" | "yes" => Ok(Self::Flag(true)),
                "off" | "false" | "0" | "no" => Ok(Self::Flag(false)),
                _ => Err(invalid("flag")),
            },
            ValueKind::Mode => OperationMode::from_str(raw)
                .map(Self::Mode)
                .map_err(|_| invalid("mode")),
            ValueKind::Temperature if field == Field::RoomTempOffset => raw
                .parse::<f64>()
                .ok()
                .filter(|t| ROOM_TEMP_OFFSET_RANGE.contains(t))
                .map(Self::Temperature)
                .ok_or_else(|| invalid("offset (-5 to 5)")),
            ValueKind::Temperature => raw
                .parse::<f64>()
                .ok()
                .filter(|t| t.is_finite())
                .map(Self::Temperature)
                .ok_or_else(|| invalid("temperature")),
            ValueKind::Percent => raw
                .parse::<f64>()
                .ok()
                .filter(|p| (0.0..=100.0).contains(p))
                .map(Self::Percent)
                .ok_or_else(|| invalid("percentage")),
            ValueKind::Fan => FanSpeed::from_str(raw)
                .map(Self::Fan)
                .map_err(|_| invalid("fan speed")),
            ValueKind::Vane => AirDirection::from_str(&raw.to_ascii_lowercase())
                .map(Self::Vane)
                .map_err(|_| invalid("air direction")),
            ValueKind::Signal => raw.parse().map(Self::Signal).map_err(|_| invalid("signal")),
            ValueKind::Text => Ok(Self::Text(raw.to_owned())),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(true) => f.write_str("on"),
            Self::Flag(false) => f.write_str("off"),
            Self::Mode(m) => write!(f, "{m}"),
            Self::Temperature(t) => write!(f, "{t:.1}°C"),
            Self::Percent(p) => write!(f, "{p:.0}%"),
            Self::Fan(s) => write!(f, "{s}"),
            Self::Vane(v) => write!(f, "{v}"),
            Self::Signal(s) => write!(f, "{s} dBm"),
            Self::Text(s) => f.write_str(s),
        }
    }
}
