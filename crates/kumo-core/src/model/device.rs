// ── Device domain type ──
//
// A device is identity metadata plus a table of versioned fields. Every
// field remembers who wrote it last, when, whether an optimistic hold
// protects it, and the last value the cloud confirmed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use super::field::{AirDirection, FanSpeed, Field, FieldValue, OperationMode};
use super::ids::{DeviceSerial, SiteId};

// ── Field metadata ──────────────────────────────────────────────────

/// Who produced a field's current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Remote,
    Optimistic,
}

/// Suppression window protecting an optimistic value.
#[derive(Debug, Clone, PartialEq)]
pub struct Hold {
    pub expected: FieldValue,
    pub expires_at: Instant,
    pub generation: u64,
}

impl Hold {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Optimistic lifecycle of a field.
///
/// `Idle → OptimisticPending → {Confirmed | Expired | RolledBack} → Idle`.
/// The resolved states persist until the field is next written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldState {
    Idle,
    OptimisticPending,
    Confirmed,
    Expired,
    RolledBack,
}

/// Current state of one field.
#[derive(Debug, Clone)]
pub struct FieldState {
    pub value: FieldValue,
    pub source: Source,
    pub updated_at: DateTime<Utc>,
    pub hold: Option<Hold>,
    /// Last value reported by the cloud, restored on rollback.
    pub confirmed: Option<FieldValue>,
    /// Generation of the optimistic write that produced `value`, if any.
    pub(crate) write_generation: Option<u64>,
    pub(crate) resolution: Option<HoldState>,
}

impl FieldState {
    pub fn hold_state(&self) -> HoldState {
        if self.hold.is_some() {
            HoldState::OptimisticPending
        } else {
            self.resolution.unwrap_or(HoldState::Idle)
        }
    }

    /// Hold that is still blocking remote updates at `now`.
    pub fn active_hold(&self, now: Instant) -> Option<&Hold> {
        self.hold.as_ref().filter(|h| !h.is_expired(now))
    }
}

// ── Device ──────────────────────────────────────────────────────────

/// Identity metadata, replaced wholesale by each snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceMeta {
    pub name: String,
    pub zone_id: Option<String>,
    /// Serial printed on the unit (differs from the adapter serial).
    pub serial_number: Option<String>,
}

/// Point-in-time copy of a device.
#[derive(Debug, Clone)]
pub struct Device {
    pub serial: DeviceSerial,
    pub site: SiteId,
    pub meta: DeviceMeta,
    pub(crate) fields: BTreeMap<Field, FieldState>,
}

impl Device {
    pub(crate) fn new(serial: DeviceSerial, site: SiteId, meta: DeviceMeta) -> Self {
        Self {
            serial,
            site,
            meta,
            fields: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn field(&self, field: Field) -> Option<&FieldState> {
        self.fields.get(&field)
    }

    pub fn value(&self, field: Field) -> Option<&FieldValue> {
        self.fields.get(&field).map(|s| &s.value)
    }

    /// All known fields in `Field` order.
    pub fn fields(&self) -> impl Iterator<Item = (Field, &FieldState)> {
        self.fields.iter().map(|(f, s)| (*f, s))
    }

    // ── Typed accessors ─────────────────────────────────────────────

    fn flag(&self, field: Field) -> Option<bool> {
        match self.value(field)? {
            FieldValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    fn temperature(&self, field: Field) -> Option<f64> {
        match self.value(field)? {
            FieldValue::Temperature(t) => Some(*t),
            _ => None,
        }
    }

    fn text(&self, field: Field) -> Option<&str> {
        match self.value(field)? {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn power(&self) -> Option<bool> {
        self.flag(Field::Power)
    }

    pub fn connected(&self) -> Option<bool> {
        self.flag(Field::Connected)
    }

    pub fn mode(&self) -> Option<OperationMode> {
        match self.value(Field::Mode)? {
            FieldValue::Mode(m) => Some(*m),
            _ => None,
        }
    }

    pub fn fan_speed(&self) -> Option<FanSpeed> {
        match self.value(Field::FanSpeed)? {
            FieldValue::Fan(f) => Some(*f),
            _ => None,
        }
    }

    pub fn air_direction(&self) -> Option<AirDirection> {
        match self.value(Field::AirDirection)? {
            FieldValue::Vane(v) => Some(*v),
            _ => None,
        }
    }

    pub fn room_temp(&self) -> Option<f64> {
        self.temperature(Field::RoomTemp)
    }

    pub fn setpoint_cool(&self) -> Option<f64> {
        self.temperature(Field::SetpointCool)
    }

    pub fn setpoint_heat(&self) -> Option<f64> {
        self.temperature(Field::SetpointHeat)
    }

    pub fn humidity(&self) -> Option<f64> {
        match self.value(Field::Humidity)? {
            FieldValue::Percent(p) => Some(*p),
            _ => None,
        }
    }

    pub fn model_number(&self) -> Option<&str> {
        self.text(Field::ModelNumber)
    }

    pub fn error_code(&self) -> Option<&str> {
        self.text(Field::ErrorCode)
    }

    /// The setpoint the unit is working towards in its current mode.
    ///
    /// Cooling uses the cool setpoint, heating the heat setpoint; any other
    /// mode prefers the cool setpoint and falls back to heat.
    pub fn target_temperature(&self) -> Option<f64> {
        match self.mode() {
            Some(OperationMode::Cool | OperationMode::AutoCool) => self.setpoint_cool(),
            Some(OperationMode::Heat | OperationMode::AutoHeat) => self.setpoint_heat(),
            _ => self.setpoint_cool().or_else(|| self.setpoint_heat()),
        }
    }

    /// Setpoint field a plain "set temperature" should write in the current
    /// mode, mirroring [`target_temperature`](Self::target_temperature).
    pub fn target_setpoint_field(&self) -> Field {
        match self.mode() {
            Some(OperationMode::Heat | OperationMode::AutoHeat) => Field::SetpointHeat,
            Some(OperationMode::Cool | OperationMode::AutoCool) => Field::SetpointCool,
            _ if self.setpoint_cool().is_none() && self.setpoint_heat().is_some() => {
                Field::SetpointHeat
            }
            _ => Field::SetpointCool,
        }
    }
}
