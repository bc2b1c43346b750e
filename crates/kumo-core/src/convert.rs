// ── API-to-domain conversions ──
//
// Bridges raw `kumo_api` payloads into typed fields. Enumerated values the
// domain does not know (new fan speeds, odd vane positions) are dropped
// rather than failing the payload.

use std::str::FromStr;

use serde_json::{Map, Value};
use tracing::debug;

use kumo_api::models::{AdapterState, DeviceStatus};
use kumo_api::DiscoveredDevice;

use crate::model::{AirDirection, DeviceMeta, DeviceSerial, FanSpeed, Field, FieldValue, OperationMode};
use crate::source::{CommandError, SnapshotDevice, TransportError};

// ── Helpers ─────────────────────────────────────────────────────────

fn parse_enum<T: FromStr>(field: Field, raw: Option<&str>) -> Option<T> {
    let raw = raw?;
    let parsed = T::from_str(raw).ok();
    if parsed.is_none() {
        debug!(?field, value = raw, "ignoring unrecognised value");
    }
    parsed
}

fn text(raw: Option<&String>) -> Option<FieldValue> {
    raw.filter(|s| !s.is_empty()).map(|s| FieldValue::Text(s.clone()))
}

// ── Adapter state ───────────────────────────────────────────────────

/// Typed fields present in an adapter payload, in `Field` order.
pub(crate) fn adapter_fields(state: &AdapterState) -> Vec<(Field, FieldValue)> {
    let candidates = [
        (Field::Power, state.power.map(FieldValue::Flag)),
        (
            Field::Mode,
            parse_enum::<OperationMode>(Field::Mode, state.operation_mode()).map(FieldValue::Mode),
        ),
        (Field::SetpointCool, state.sp_cool.map(FieldValue::Temperature)),
        (Field::SetpointHeat, state.sp_heat.map(FieldValue::Temperature)),
        (Field::SetpointAuto, state.sp_auto.map(FieldValue::Temperature)),
        (
            Field::FanSpeed,
            parse_enum::<FanSpeed>(Field::FanSpeed, state.fan_speed.as_deref()).map(FieldValue::Fan),
        ),
        (
            Field::AirDirection,
            parse_enum::<AirDirection>(Field::AirDirection, state.air_direction.as_deref())
                .map(FieldValue::Vane),
        ),
        (Field::RoomTemp, state.room_temp.map(FieldValue::Temperature)),
        (Field::Humidity, state.humidity.map(FieldValue::Percent)),
        (Field::Rssi, state.rssi.map(signal)),
        (Field::ErrorCode, text(state.two_figures_code.as_ref())),
        (
            Field::ModelNumber,
            state.model_number().map(|m| FieldValue::Text(m.to_owned())),
        ),
        (Field::Connected, state.connected.map(FieldValue::Flag)),
        (Field::ScheduleOwner, text(state.schedule_owner.as_ref())),
        (
            Field::RoomTempOffset,
            state.room_temp_display_offset.map(FieldValue::Temperature),
        ),
    ];
    let display = state.display_config.clone().unwrap_or_default();
    let indicators = [
        (Field::FilterAlert, display.filter),
        (Field::Defrost, display.defrost),
        (Field::HotAdjust, display.hot_adjust),
        (Field::Standby, display.standby),
    ]
    .map(|(field, flag)| (field, flag.map(FieldValue::Flag)));

    candidates
        .into_iter()
        .chain(indicators)
        .filter_map(|(field, value)| value.map(|v| (field, v)))
        .collect()
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn signal(dbm: f64) -> FieldValue {
    FieldValue::Signal(dbm.round() as i32)
}

/// Fields carried by a `device_status_v2` report.
pub(crate) fn status_fields(status: &DeviceStatus) -> Vec<(Field, FieldValue)> {
    status
        .is_connected()
        .map(|connected| vec![(Field::Connected, FieldValue::Flag(connected))])
        .unwrap_or_default()
}

/// Snapshot entry for a discovered device.
pub(crate) fn snapshot_device(device: &DiscoveredDevice) -> SnapshotDevice {
    SnapshotDevice {
        serial: DeviceSerial::new(device.serial.as_str()),
        meta: DeviceMeta {
            name: device.name.clone(),
            zone_id: device.zone_id.clone(),
            serial_number: device.state.serial_number.clone(),
        },
        fields: adapter_fields(&device.state),
    }
}

// ── Commands ────────────────────────────────────────────────────────

/// `commands` object for `send-command`, keyed by adapter names.
pub(crate) fn command_body(writes: &[(Field, FieldValue)]) -> Map<String, Value> {
    writes
        .iter()
        .map(|(field, value)| (field.wire_key().to_owned(), value.to_wire()))
        .collect()
}

// ── Errors ──────────────────────────────────────────────────────────

pub(crate) fn command_error(err: &kumo_api::Error) -> CommandError {
    if err.is_rejection() {
        CommandError::Rejected(err.to_string())
    } else {
        CommandError::Transient(err.to_string())
    }
}

pub(crate) fn transport_error(err: &kumo_api::Error) -> TransportError {
    if err.is_auth_expired() {
        TransportError::Auth(err.to_string())
    } else {
        TransportError::Failed(err.to_string())
    }
}
