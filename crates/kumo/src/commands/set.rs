//! `kumo set`: optimistic device commands.

use std::time::Duration;

use tracing::debug;

use kumo_core::{
    CommandHandle, Coordinator, DeviceSerial, Field, FieldValue, HoldState, OperationMode,
};

use crate::cli::{GlobalOpts, SetArgs};
use crate::config::Session;
use crate::error::CliError;
use crate::output;

use super::devices::device_detail;
use super::util::{self, DeviceView};

/// Extra time past the longest hold before `--wait` gives up.
const WAIT_GRACE: Duration = Duration::from_secs(2);

/// Translate flags into field writes against the current view.
fn collect_writes(
    args: &SetArgs,
    coordinator: &Coordinator,
    serial: &DeviceSerial,
) -> Result<Vec<(Field, FieldValue)>, CliError> {
    let device = coordinator.current_view(serial)?;
    let mut writes = Vec::new();

    if let Some(ref raw) = args.power {
        writes.push((Field::Power, util::parse_value(Field::Power, raw)?));
    }

    let mut new_mode = None;
    if let Some(ref raw) = args.mode {
        let value = util::parse_value(Field::Mode, raw)?;
        if let FieldValue::Mode(mode) = value {
            new_mode = Some(mode);
        }
        writes.push((Field::Mode, value));
    }

    if let Some(ref raw) = args.temp {
        let field = util::setpoint_field(&device, new_mode);
        writes.push((field, util::parse_value(field, raw)?));
    }
    if let Some(ref raw) = args.cool {
        writes.push((Field::SetpointCool, util::parse_value(Field::SetpointCool, raw)?));
    }
    if let Some(ref raw) = args.heat {
        writes.push((Field::SetpointHeat, util::parse_value(Field::SetpointHeat, raw)?));
    }
    if let Some(ref raw) = args.fan {
        writes.push((Field::FanSpeed, util::parse_value(Field::FanSpeed, raw)?));
    }
    if let Some(ref raw) = args.vane {
        writes.push((Field::AirDirection, util::parse_value(Field::AirDirection, raw)?));
    }
    if let Some(ref raw) = args.offset {
        writes.push((Field::RoomTempOffset, util::parse_value(Field::RoomTempOffset, raw)?));
    }

    // A mode change always carries the matching power state.
    if let (Some(mode), None) = (new_mode, &args.power) {
        writes.push((Field::Power, FieldValue::Flag(mode != OperationMode::Off)));
    }

    Ok(writes)
}

/// Wait until every written field has left `OptimisticPending`.
async fn wait_for_resolution(
    coordinator: &Coordinator,
    serial: &DeviceSerial,
    fields: &[Field],
    limit: Duration,
) {
    let pending = |coordinator: &Coordinator| {
        coordinator.current_view(serial).is_ok_and(|device| {
            fields.iter().any(|f| {
                device
                    .field(*f)
                    .is_some_and(|s| s.hold_state() == HoldState::OptimisticPending)
            })
        })
    };

    let mut changes = coordinator.subscribe();
    let deadline = tokio::time::sleep(limit);
    tokio::pin!(deadline);

    while pending(coordinator) {
        tokio::select! {
            () = &mut deadline => {
                debug!("gave up waiting for hold resolution");
                return;
            }
            change = changes.next() => {
                if change.is_none() {
                    return;
                }
            }
        }
    }
}

async fn run(args: &SetArgs, coordinator: &Coordinator, global: &GlobalOpts) -> Result<(), CliError> {
    let serial = util::resolve_device(coordinator, &args.device)?;
    let writes = collect_writes(args, coordinator, &serial)?;
    let fields: Vec<Field> = writes.iter().map(|(f, _)| *f).collect();

    let handle: CommandHandle = coordinator.request_commands(&serial, writes)?;
    let limit = fields
        .iter()
        .map(|f| coordinator.config().hold_for(*f))
        .max()
        .unwrap_or_default()
        + WAIT_GRACE;

    handle.outcome().await?;

    if args.wait {
        wait_for_resolution(coordinator, &serial, &fields, limit).await;
    }

    let device = coordinator.current_view(&serial)?;
    let color = output::should_color(global.color);
    let out = output::render_single(
        global.output,
        &DeviceView::from(&device),
        |_| device_detail(&device, color),
        |v| v.serial.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: SetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let session = Session::open(global)?;
    let coordinator = session.coordinator(global)?;

    // `--wait` needs the live feed to see confirmations.
    let loaded = if args.wait {
        coordinator.start().await
    } else {
        coordinator.refresh_now().await
    };
    loaded.map_err(|e| session.auth_context(e.into()))?;

    let result = run(&args, &coordinator, global).await;
    coordinator.shutdown().await;
    result
}
