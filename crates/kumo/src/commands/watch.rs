//! Live watch: stream reconciled changes until interrupted.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

use kumo_core::{Change, ConnectionState, Coordinator, DeviceSerial, Field, FieldValue, HoldState, Source};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::config::Session;
use crate::error::CliError;
use crate::output;

use super::util;

/// One printed line of the watch stream.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WatchEvent {
    Field {
        device: DeviceSerial,
        name: String,
        field: Field,
        value: Option<FieldValue>,
        source: Option<Source>,
        hold: Option<HoldState>,
    },
    DeviceAdded {
        device: DeviceSerial,
    },
    DeviceRemoved {
        device: DeviceSerial,
    },
    Connection {
        state: ConnectionState,
    },
    Resync,
}

fn describe(coordinator: &Coordinator, change: Change) -> WatchEvent {
    match change {
        Change::Field { device, field } => {
            let view = coordinator.current_view(&device).ok();
            let state = view.as_ref().and_then(|d| d.field(field));
            WatchEvent::Field {
                name: view.as_ref().map(|d| d.name().to_owned()).unwrap_or_default(),
                value: state.map(|s| s.value.clone()),
                source: state.map(|s| s.source),
                hold: state.map(kumo_core::FieldState::hold_state),
                device,
                field,
            }
        }
        Change::DeviceAdded(device) => WatchEvent::DeviceAdded { device },
        Change::DeviceRemoved(device) => WatchEvent::DeviceRemoved { device },
        Change::Resync => WatchEvent::Resync,
    }
}

fn render(event: &WatchEvent, format: OutputFormat, color: bool) -> String {
    match format {
        OutputFormat::Json | OutputFormat::JsonCompact => output::render_json(event, true),
        OutputFormat::Table | OutputFormat::Plain => {
            let ts = Utc::now().format("%H:%M:%S");
            match event {
                WatchEvent::Field {
                    name,
                    field,
                    value,
                    source,
                    hold,
                    ..
                } => {
                    let value = util::cell(value.as_ref());
                    let provenance = match (source, hold) {
                        (Some(s), Some(h)) => output::provenance(*s, *h, color),
                        _ => String::new(),
                    };
                    format!("{ts}  {name:<16} {:<14} {value} {provenance}", field.as_str())
                        .trim_end()
                        .to_owned()
                }
                WatchEvent::DeviceAdded { device } => format!("{ts}  + {device}"),
                WatchEvent::DeviceRemoved { device } => format!("{ts}  - {device}"),
                WatchEvent::Connection { state } => format!("{ts}  connection: {state:?}"),
                WatchEvent::Resync => format!("{ts}  (missed updates, re-reading)"),
            }
        }
    }
}

fn matches_filter(event: &WatchEvent, filter: Option<&DeviceSerial>) -> bool {
    let Some(wanted) = filter else {
        return true;
    };
    match event {
        WatchEvent::Field { device, .. }
        | WatchEvent::DeviceAdded { device }
        | WatchEvent::DeviceRemoved { device } => device == wanted,
        WatchEvent::Connection { .. } | WatchEvent::Resync => true,
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let session = Session::open(global)?;
    let coordinator = session.coordinator(global)?;
    coordinator
        .start()
        .await
        .map_err(|e| session.auth_context(e.into()))?;

    let result = watch(&coordinator, &args, global).await;

    if args.stats {
        let out = output::render_json(&coordinator.diagnostics(), false);
        output::print_output(&out, global.quiet);
    }
    coordinator.shutdown().await;
    result
}

async fn watch(coordinator: &Coordinator, args: &WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let filter = args
        .device
        .as_deref()
        .map(|d| util::resolve_device(coordinator, d))
        .transpose()?;
    let color = output::should_color(global.color);

    let mut changes = coordinator.subscribe();
    let mut connection = coordinator.connection_state();
    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let expired = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(expired);

    info!(devices = coordinator.devices().len(), "watching for changes");

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            () = &mut expired => break,
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connection.borrow_and_update();
                WatchEvent::Connection { state }
            }
            change = changes.next() => match change {
                Some(change) => describe(coordinator, change),
                None => break,
            },
        };

        if matches_filter(&event, filter.as_ref()) {
            output::print_output(&render(&event, global.output, color), global.quiet);
        }
    }
    Ok(())
}
