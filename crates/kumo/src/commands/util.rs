//! Shared helpers for command handlers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use kumo_core::{
    Coordinator, Device, DeviceSerial, Field, FieldValue, HoldState, OperationMode, Source,
};

use crate::cli::GlobalOpts;
use crate::config::Session;
use crate::error::CliError;

/// Open a session and load the active site once, without the live feed.
pub async fn load_site(global: &GlobalOpts) -> Result<(Session, Coordinator), CliError> {
    let session = Session::open(global)?;
    let coordinator = session.coordinator(global)?;
    coordinator
        .refresh_now()
        .await
        .map_err(|e| session.auth_context(e.into()))?;
    Ok((session, coordinator))
}

/// Resolve a device serial or (case-insensitive) name.
pub fn resolve_device(coordinator: &Coordinator, identifier: &str) -> Result<DeviceSerial, CliError> {
    let devices = coordinator.devices();
    if let Some(device) = devices.iter().find(|d| d.serial.as_str() == identifier) {
        return Ok(device.serial.clone());
    }

    let by_name: Vec<&Device> = devices
        .iter()
        .filter(|d| d.name().eq_ignore_ascii_case(identifier))
        .collect();
    match by_name.as_slice() {
        [device] => Ok(device.serial.clone()),
        [] => Err(CliError::NotFound {
            resource_type: "device".into(),
            identifier: identifier.into(),
            list_command: "devices list".into(),
        }),
        many => Err(CliError::Validation {
            field: "device".into(),
            reason: format!(
                "'{identifier}' matches {} devices; use a serial ({})",
                many.len(),
                many.iter()
                    .map(|d| d.serial.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }),
    }
}

/// Setpoint a plain temperature change should write, given the mode the
/// device is in (or is being switched to).
pub fn setpoint_field(device: &Device, new_mode: Option<OperationMode>) -> Field {
    match new_mode {
        Some(OperationMode::Heat | OperationMode::AutoHeat) => Field::SetpointHeat,
        Some(OperationMode::Cool | OperationMode::AutoCool) => Field::SetpointCool,
        _ => device.target_setpoint_field(),
    }
}

/// Parse user input for `field`.
pub fn parse_value(field: Field, raw: &str) -> Result<FieldValue, CliError> {
    FieldValue::parse(field, raw).map_err(|reason| CliError::Validation {
        field: field.as_str().into(),
        reason,
    })
}

// ── Serializable views ───────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct FieldView {
    pub value: FieldValue,
    pub source: Source,
    pub hold: HoldState,
    pub updated_at: DateTime<Utc>,
}

/// Serializable copy of a device for structured output.
#[derive(Debug, Serialize)]
pub struct DeviceView {
    pub serial: String,
    pub name: String,
    pub site: String,
    pub zone_id: Option<String>,
    pub serial_number: Option<String>,
    /// Setpoint the unit is working towards in its current mode.
    pub target_setpoint: Field,
    pub fields: BTreeMap<Field, FieldView>,
}

impl From<&Device> for DeviceView {
    fn from(device: &Device) -> Self {
        Self {
            serial: device.serial.to_string(),
            name: device.name().to_owned(),
            site: device.site.to_string(),
            zone_id: device.meta.zone_id.clone(),
            serial_number: device.meta.serial_number.clone(),
            target_setpoint: device.target_setpoint_field(),
            fields: device
                .fields()
                .map(|(field, state)| {
                    (
                        field,
                        FieldView {
                            value: state.value.clone(),
                            source: state.source,
                            hold: state.hold_state(),
                            updated_at: state.updated_at,
                        },
                    )
                })
                .collect(),
        }
    }
}

/// `"22.5°C"` / `"-"` style cell.
pub fn cell(value: Option<&FieldValue>) -> String {
    value.map_or_else(|| "-".into(), ToString::to_string)
}
