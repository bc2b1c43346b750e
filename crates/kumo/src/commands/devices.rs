//! Device command handlers.

use std::fmt::Write as _;

use tabled::Tabled;

use kumo_core::{Device, Field, FieldValue};

use crate::cli::{DevicesArgs, DevicesCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util::{self, DeviceView};

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Serial")]
    serial: String,
    #[tabled(rename = "Power")]
    power: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Room")]
    room: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Fan")]
    fan: String,
    #[tabled(rename = "Vane")]
    vane: String,
    #[tabled(rename = "Online")]
    online: String,
}

fn device_row(view: &DeviceView) -> DeviceRow {
    let get = |field: Field| util::cell(view.fields.get(&field).map(|f| &f.value));
    DeviceRow {
        name: view.name.clone(),
        serial: view.serial.clone(),
        power: get(Field::Power),
        mode: get(Field::Mode),
        room: get(Field::RoomTemp),
        target: get(view.target_setpoint),
        fan: get(Field::FanSpeed),
        vane: get(Field::AirDirection),
        online: match view.fields.get(&Field::Connected).map(|f| &f.value) {
            Some(FieldValue::Flag(true)) => "yes".into(),
            Some(FieldValue::Flag(false)) => "no".into(),
            _ => "-".into(),
        },
    }
}

// ── Detail view ─────────────────────────────────────────────────────

pub(crate) fn device_detail(device: &Device, color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", device.name(), device.serial);
    if let Some(ref sn) = device.meta.serial_number {
        let _ = writeln!(out, "  unit serial       {sn}");
    }
    if let Some(ref zone) = device.meta.zone_id {
        let _ = writeln!(out, "  zone              {zone}");
    }
    for (field, state) in device.fields() {
        let provenance = output::provenance(state.source, state.hold_state(), color);
        let label = field.as_str();
        let value = state.value.to_string();
        if provenance.is_empty() {
            let _ = writeln!(out, "  {label:<18}{value}");
        } else {
            let _ = writeln!(out, "  {label:<18}{value:<14}{provenance}");
        }
    }
    out.trim_end().to_owned()
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: DevicesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (_session, coordinator) = util::load_site(global).await?;

    let result = match args.command {
        DevicesCommand::List => {
            let views: Vec<DeviceView> = coordinator.devices().iter().map(DeviceView::from).collect();
            let out = output::render_list(global.output, &views, device_row, |v| v.serial.clone());
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Get { device } => util::resolve_device(&coordinator, &device)
            .and_then(|serial| coordinator.current_view(&serial).map_err(CliError::from))
            .map(|device| {
                let color = output::should_color(global.color);
                let out = output::render_single(
                    global.output,
                    &DeviceView::from(&device),
                    |_| device_detail(&device, color),
                    |v| v.serial.clone(),
                );
                output::print_output(&out, global.quiet);
            }),
    };

    coordinator.shutdown().await;
    result
}
