#![allow(clippy::unwrap_used)]
// Integration tests for the coordinator, driven by in-memory fakes of the
// cloud API and the event feed under a paused tokio clock.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use kumo_core::{
    Change, CloudApi, CommandError, CommandRetry, ConnectionState, Coordinator, CoordinatorConfig,
    CoreError, Delta, DeviceMeta, DeviceSerial, EventFeed, FeedEvent, Field, FieldValue,
    HoldState, OperationMode, SiteId, Snapshot, SnapshotDevice, Source, TransportError, clock,
};

// ── Fakes ───────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeCloud {
    devices: Mutex<Vec<SnapshotDevice>>,
    fail_fetch: AtomicBool,
    fetches: AtomicUsize,
    responses: Mutex<VecDeque<Result<(), CommandError>>>,
    sent: Mutex<Vec<(DeviceSerial, Vec<(Field, FieldValue)>)>>,
    command_delay: Mutex<Duration>,
}

impl FakeCloud {
    fn with_device(serial: &str, fields: Vec<(Field, FieldValue)>) -> Arc<Self> {
        let cloud = Arc::new(Self::default());
        cloud.add_device(serial, fields);
        cloud
    }

    fn add_device(&self, serial: &str, fields: Vec<(Field, FieldValue)>) {
        self.devices.lock().unwrap().push(SnapshotDevice {
            serial: DeviceSerial::new(serial),
            meta: DeviceMeta {
                name: format!("Unit {serial}"),
                ..DeviceMeta::default()
            },
            fields,
        });
    }

    fn remove_device(&self, serial: &str) {
        self.devices
            .lock()
            .unwrap()
            .retain(|d| d.serial.as_str() != serial);
    }

    fn set_field(&self, serial: &str, field: Field, value: FieldValue) {
        let mut devices = self.devices.lock().unwrap();
        let device = devices
            .iter_mut()
            .find(|d| d.serial.as_str() == serial)
            .unwrap();
        device.fields.retain(|(f, _)| *f != field);
        device.fields.push((field, value));
    }

    fn respond(&self, responses: impl IntoIterator<Item = Result<(), CommandError>>) {
        self.responses.lock().unwrap().extend(responses);
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn sent(&self) -> Vec<(DeviceSerial, Vec<(Field, FieldValue)>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn fetch_snapshot(&self, site: &SiteId) -> Result<Snapshot, TransportError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(TransportError::Failed("connection refused".into()));
        }
        Ok(Snapshot {
            site: site.clone(),
            fetched_at: clock::now(),
            devices: self.devices.lock().unwrap().clone(),
        })
    }

    async fn send_command(&self, serial: &DeviceSerial, writes: &[(Field, FieldValue)]) -> Result<(), CommandError> {
        let delay = *self.command_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.sent
            .lock()
            .unwrap()
            .push((serial.clone(), writes.to_vec()));
        self.responses.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

#[derive(Default)]
struct FakeFeed {
    senders: Mutex<Vec<mpsc::UnboundedSender<FeedEvent>>>,
    opened_with: Mutex<Vec<Vec<DeviceSerial>>>,
}

impl FakeFeed {
    fn push(&self, event: FeedEvent) {
        let senders = self.senders.lock().unwrap();
        senders.last().unwrap().send(event).unwrap();
    }

    fn deltas(&self, serial: &str, fields: Vec<(Field, FieldValue)>) {
        self.push(FeedEvent::Deltas(
            fields
                .into_iter()
                .map(|(field, value)| Delta {
                    serial: DeviceSerial::new(serial),
                    field,
                    value,
                    at: None,
                })
                .collect(),
        ));
    }

    fn opens(&self) -> usize {
        self.opened_with.lock().unwrap().len()
    }

    /// End the current feed as if the socket gave up.
    fn close_current(&self) {
        self.senders.lock().unwrap().pop();
    }
}

impl EventFeed for FakeFeed {
    fn open(&self, devices: Vec<DeviceSerial>, _cancel: CancellationToken) -> BoxStream<'static, FeedEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx);
        self.opened_with.lock().unwrap().push(devices);
        UnboundedReceiverStream::new(rx).boxed()
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn a1() -> DeviceSerial {
    DeviceSerial::new("A1")
}

fn temp(t: f64) -> FieldValue {
    FieldValue::Temperature(t)
}

fn default_fields() -> Vec<(Field, FieldValue)> {
    vec![
        (Field::Power, FieldValue::Flag(true)),
        (Field::Mode, FieldValue::Mode(OperationMode::Cool)),
        (Field::SetpointCool, temp(21.0)),
        (Field::RoomTemp, temp(24.0)),
    ]
}

fn config(hold: Duration) -> CoordinatorConfig {
    let mut config = CoordinatorConfig::new("home");
    config.hold_duration = hold;
    config
}

async fn started(cloud: &Arc<FakeCloud>, feed: &Arc<FakeFeed>, config: CoordinatorConfig) -> Coordinator {
    let coordinator = Coordinator::new(config, Arc::clone(cloud) as _, Arc::clone(feed) as _);
    coordinator.start().await.unwrap();
    settle().await;
    coordinator
}

/// Let spawned tasks run without advancing the clock.
async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

fn setpoint_changes(changes: &[Change]) -> usize {
    changes
        .iter()
        .filter(|c| {
            matches!(c, Change::Field { device, field: Field::SetpointCool } if device.as_str() == "A1")
        })
        .count()
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn contradicting_delta_is_held_back_until_confirmation() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    let feed = Arc::new(FakeFeed::default());
    let coordinator = started(&cloud, &feed, config(Duration::from_secs(5))).await;
    let mut changes = coordinator.subscribe();

    let handle = coordinator
        .request_command(&a1(), Field::SetpointCool, temp(22.0))
        .unwrap();
    let view = coordinator.current_view(&a1()).unwrap();
    assert_eq!(view.setpoint_cool(), Some(22.0));
    assert_eq!(view.field(Field::SetpointCool).unwrap().source, Source::Optimistic);
    handle.outcome().await.unwrap();

    // t+1: the cloud still reports the old setpoint.
    tokio::time::sleep(Duration::from_secs(1)).await;
    feed.deltas("A1", vec![(Field::SetpointCool, temp(21.0))]);
    settle().await;
    assert_eq!(coordinator.current_view(&a1()).unwrap().setpoint_cool(), Some(22.0));
    assert_eq!(coordinator.diagnostics().held_back, 1);

    // t+3: confirmation.
    tokio::time::sleep(Duration::from_secs(2)).await;
    feed.deltas("A1", vec![(Field::SetpointCool, temp(22.0))]);
    settle().await;
    let view = coordinator.current_view(&a1()).unwrap();
    let state = view.field(Field::SetpointCool).unwrap();
    assert_eq!(state.source, Source::Remote);
    assert_eq!(state.hold_state(), HoldState::Confirmed);
    assert_eq!(coordinator.pending_holds(), 0);

    // Optimistic write, then the source flip on confirmation.
    assert_eq!(setpoint_changes(&changes.drain()), 2);

    // t+10: a fresh snapshot agrees; nothing changes.
    tokio::time::sleep(Duration::from_secs(7)).await;
    cloud.set_field("A1", Field::SetpointCool, temp(22.0));
    let report = coordinator.refresh_now().await.unwrap();
    assert_eq!(report.changed, 0);
    assert_eq!(setpoint_changes(&changes.drain()), 0);
    assert_eq!(coordinator.current_view(&a1()).unwrap().setpoint_cool(), Some(22.0));
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_hold_expires_and_newer_snapshot_wins() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    let feed = Arc::new(FakeFeed::default());
    let coordinator = started(&cloud, &feed, config(Duration::from_secs(5))).await;

    coordinator
        .request_command(&a1(), Field::SetpointCool, temp(22.0))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(5_100)).await;
    let view = coordinator.current_view(&a1()).unwrap();
    let state = view.field(Field::SetpointCool).unwrap();
    assert_eq!(state.value, temp(22.0));
    assert_eq!(state.hold_state(), HoldState::Expired);
    assert_eq!(coordinator.diagnostics().holds_expired, 1);

    tokio::time::sleep(Duration::from_millis(900)).await;
    cloud.set_field("A1", Field::SetpointCool, temp(21.5));
    coordinator.refresh_now().await.unwrap();
    assert_eq!(coordinator.current_view(&a1()).unwrap().setpoint_cool(), Some(21.5));
}

#[tokio::test(start_paused = true)]
async fn hold_expiry_is_announced_to_subscribers() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    let feed = Arc::new(FakeFeed::default());
    let coordinator = started(&cloud, &feed, config(Duration::from_secs(5))).await;

    coordinator
        .request_command(&a1(), Field::SetpointCool, temp(22.0))
        .unwrap()
        .outcome()
        .await
        .unwrap();
    let mut changes = coordinator.subscribe();

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(setpoint_changes(&changes.drain()), 1);
    let view = coordinator.current_view(&a1()).unwrap();
    assert_eq!(
        view.field(Field::SetpointCool).unwrap().hold_state(),
        HoldState::Expired
    );
}

#[tokio::test(start_paused = true)]
async fn older_report_after_confirmation_is_stale() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    let feed = Arc::new(FakeFeed::default());
    let coordinator = started(&cloud, &feed, config(Duration::from_secs(5))).await;

    coordinator
        .request_command(&a1(), Field::SetpointCool, temp(22.0))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    feed.deltas("A1", vec![(Field::SetpointCool, temp(22.0))]);
    settle().await;
    let view = coordinator.current_view(&a1()).unwrap();
    assert_eq!(
        view.field(Field::SetpointCool).unwrap().hold_state(),
        HoldState::Confirmed
    );

    // A report from before the confirmation arrives late.
    feed.push(FeedEvent::Deltas(vec![Delta {
        serial: a1(),
        field: Field::SetpointCool,
        value: temp(21.0),
        at: Some(clock::now() - chrono::TimeDelta::seconds(30)),
    }]));
    settle().await;

    assert_eq!(coordinator.current_view(&a1()).unwrap().setpoint_cool(), Some(22.0));
    assert_eq!(coordinator.diagnostics().stale_updates, 1);
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn rejected_command_rolls_back_with_second_event() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    cloud.respond([Err(CommandError::Rejected("setpoint out of range".into()))]);
    let feed = Arc::new(FakeFeed::default());
    let coordinator = started(&cloud, &feed, config(Duration::from_secs(10))).await;
    let mut changes = coordinator.subscribe();

    let handle = coordinator
        .request_command(&a1(), Field::SetpointCool, temp(35.0))
        .unwrap();
    assert_eq!(coordinator.current_view(&a1()).unwrap().setpoint_cool(), Some(35.0));

    let err = handle.outcome().await.unwrap_err();
    assert!(matches!(err, CoreError::CommandRejected { .. }));

    let view = coordinator.current_view(&a1()).unwrap();
    let state = view.field(Field::SetpointCool).unwrap();
    assert_eq!(state.value, temp(21.0));
    assert_eq!(state.hold_state(), HoldState::RolledBack);
    assert_eq!(setpoint_changes(&changes.drain()), 2);
    assert_eq!(coordinator.pending_holds(), 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_leave_optimistic_value_in_place() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    cloud.respond([
        Err(CommandError::Transient("502".into())),
        Err(CommandError::Transient("502".into())),
        Err(CommandError::Transient("502".into())),
    ]);
    let feed = Arc::new(FakeFeed::default());
    let coordinator = started(&cloud, &feed, config(Duration::from_secs(30))).await;

    let handle = coordinator
        .request_command(&a1(), Field::Power, FieldValue::Flag(false))
        .unwrap();
    let err = handle.outcome().await.unwrap_err();

    assert!(matches!(err, CoreError::CommandFailed { .. }));
    assert_eq!(cloud.sent().len(), 3);
    let view = coordinator.current_view(&a1()).unwrap();
    assert_eq!(view.power(), Some(false));
    assert_eq!(
        view.field(Field::Power).unwrap().hold_state(),
        HoldState::OptimisticPending
    );

    let diagnostics = coordinator.diagnostics();
    assert_eq!(diagnostics.command_retries, 2);
    assert_eq!(diagnostics.commands_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    cloud.respond([Err(CommandError::Transient("timeout".into())), Ok(())]);
    let feed = Arc::new(FakeFeed::default());
    let mut config = config(Duration::from_secs(10));
    config.command_retry = CommandRetry {
        attempts: 2,
        ..CommandRetry::default()
    };
    let coordinator = started(&cloud, &feed, config).await;

    let handle = coordinator
        .request_command(&a1(), Field::Mode, FieldValue::Mode(OperationMode::Heat))
        .unwrap();
    handle.outcome().await.unwrap();
    assert_eq!(cloud.sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn multi_field_command_is_sent_once() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    let feed = Arc::new(FakeFeed::default());
    let coordinator = started(&cloud, &feed, config(Duration::from_secs(10))).await;

    let writes = vec![
        (Field::Mode, FieldValue::Mode(OperationMode::Heat)),
        (Field::SetpointHeat, temp(20.0)),
        (Field::Power, FieldValue::Flag(true)),
    ];
    let handle = coordinator.request_commands(&a1(), writes.clone()).unwrap();
    assert_eq!(handle.tickets().len(), 3);
    handle.outcome().await.unwrap();

    assert_eq!(cloud.sent(), vec![(a1(), writes)]);
    let view = coordinator.current_view(&a1()).unwrap();
    assert_eq!(view.mode(), Some(OperationMode::Heat));
    assert_eq!(view.target_temperature(), Some(20.0));
}

#[tokio::test(start_paused = true)]
async fn room_temp_offset_goes_through_the_command_path() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    let feed = Arc::new(FakeFeed::default());
    let coordinator = started(&cloud, &feed, config(Duration::from_secs(10))).await;

    coordinator
        .request_command(&a1(), Field::RoomTempOffset, temp(-1.5))
        .unwrap()
        .outcome()
        .await
        .unwrap();

    assert_eq!(cloud.sent(), vec![(a1(), vec![(Field::RoomTempOffset, temp(-1.5))])]);
    let view = coordinator.current_view(&a1()).unwrap();
    let state = view.field(Field::RoomTempOffset).unwrap();
    assert_eq!(state.value, temp(-1.5));
    assert_eq!(state.hold_state(), HoldState::OptimisticPending);
}

#[tokio::test(start_paused = true)]
async fn last_command_wins() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    let feed = Arc::new(FakeFeed::default());
    let coordinator = started(&cloud, &feed, config(Duration::from_secs(10))).await;

    let first = coordinator
        .request_command(&a1(), Field::SetpointCool, temp(22.0))
        .unwrap();
    let second = coordinator
        .request_command(&a1(), Field::SetpointCool, temp(23.0))
        .unwrap();
    assert!(second.tickets()[0].generation > first.tickets()[0].generation);
    assert_eq!(coordinator.pending_holds(), 1);

    // The cloud catches up with the first command only.
    feed.deltas("A1", vec![(Field::SetpointCool, temp(22.0))]);
    settle().await;
    assert_eq!(coordinator.current_view(&a1()).unwrap().setpoint_cool(), Some(23.0));

    feed.deltas("A1", vec![(Field::SetpointCool, temp(23.0))]);
    settle().await;
    let view = coordinator.current_view(&a1()).unwrap();
    assert_eq!(
        view.field(Field::SetpointCool).unwrap().hold_state(),
        HoldState::Confirmed
    );
}

#[tokio::test(start_paused = true)]
async fn invalid_commands_are_refused_up_front() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    let feed = Arc::new(FakeFeed::default());
    let coordinator = started(&cloud, &feed, config(Duration::from_secs(10))).await;

    assert!(matches!(
        coordinator.request_command(&a1(), Field::RoomTemp, temp(20.0)),
        Err(CoreError::ReadOnlyField { .. })
    ));
    assert!(matches!(
        coordinator.request_command(&DeviceSerial::new("ghost"), Field::Power, FieldValue::Flag(true)),
        Err(CoreError::DeviceNotFound { .. })
    ));
    assert!(matches!(
        coordinator.request_commands(&a1(), Vec::new()),
        Err(CoreError::EmptyCommand)
    ));
    assert!(matches!(
        coordinator.request_command(&a1(), Field::RoomTempOffset, temp(8.0)),
        Err(CoreError::InvalidValue { .. })
    ));
    assert!(cloud.sent().is_empty());
}

// ── Intake ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stale_and_unknown_deltas_are_counted() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    let feed = Arc::new(FakeFeed::default());
    let coordinator = started(&cloud, &feed, config(Duration::from_secs(10))).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    feed.push(FeedEvent::Deltas(vec![
        Delta {
            serial: a1(),
            field: Field::RoomTemp,
            value: temp(30.0),
            at: Some(clock::now() - chrono::TimeDelta::seconds(60)),
        },
        Delta {
            serial: DeviceSerial::new("ghost"),
            field: Field::RoomTemp,
            value: temp(19.0),
            at: None,
        },
        Delta {
            serial: a1(),
            field: Field::Humidity,
            value: FieldValue::Percent(48.0),
            at: None,
        },
    ]));
    settle().await;

    let diagnostics = coordinator.diagnostics();
    assert_eq!(diagnostics.stale_updates, 1);
    assert_eq!(diagnostics.unknown_device_updates, 1);
    assert_eq!(diagnostics.deltas_applied, 1);

    let view = coordinator.current_view(&a1()).unwrap();
    assert_eq!(view.room_temp(), Some(24.0));
    assert_eq!(view.humidity(), Some(48.0));
    assert!(coordinator.status().borrow().last_socket_message.is_some());
}

#[tokio::test(start_paused = true)]
async fn reconnect_triggers_refresh() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    let feed = Arc::new(FakeFeed::default());
    let coordinator = started(&cloud, &feed, config(Duration::from_secs(10))).await;
    let state = coordinator.connection_state();

    feed.push(FeedEvent::Connected);
    settle().await;
    assert_eq!(*state.borrow(), ConnectionState::Connected);
    assert_eq!(cloud.fetch_count(), 1);

    feed.push(FeedEvent::Disconnected);
    settle().await;
    assert_eq!(*state.borrow(), ConnectionState::Reconnecting);
    assert!(coordinator.is_stale());

    feed.push(FeedEvent::Reconnected);
    settle().await;
    assert_eq!(cloud.fetch_count(), 2);
    assert!(!coordinator.is_stale());
    assert_eq!(coordinator.diagnostics().reconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn ended_feed_is_reopened_and_resyncs() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    let feed = Arc::new(FakeFeed::default());
    let coordinator = started(&cloud, &feed, config(Duration::from_secs(10))).await;
    assert_eq!(feed.opens(), 1);

    feed.close_current();
    settle().await;
    assert_eq!(*coordinator.connection_state().borrow(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(feed.opens(), 2);

    feed.push(FeedEvent::Connected);
    settle().await;
    assert_eq!(cloud.fetch_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn roster_change_reopens_feed_with_new_devices() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    cloud.add_device("B2", vec![(Field::Power, FieldValue::Flag(false))]);
    let feed = Arc::new(FakeFeed::default());
    let coordinator = started(&cloud, &feed, config(Duration::from_secs(10))).await;
    let mut changes = coordinator.subscribe();
    assert_eq!(coordinator.devices().len(), 2);

    cloud.remove_device("B2");
    let report = coordinator.refresh_now().await.unwrap();
    settle().await;

    assert_eq!(report.removed, vec![DeviceSerial::new("B2")]);
    assert!(changes.drain().contains(&Change::DeviceRemoved(DeviceSerial::new("B2"))));
    assert_eq!(feed.opens(), 2);
    assert_eq!(
        feed.opened_with.lock().unwrap().last().unwrap(),
        &vec![a1()]
    );
}

// ── Refresh & lifecycle ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failed_refresh_keeps_state_and_marks_stale() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    let feed = Arc::new(FakeFeed::default());
    let coordinator = started(&cloud, &feed, config(Duration::from_secs(10))).await;

    cloud.fail_fetch.store(true, Ordering::SeqCst);
    let err = coordinator.refresh_now().await.unwrap_err();
    assert!(matches!(err, CoreError::Transport { .. }));
    assert!(coordinator.is_stale());
    assert_eq!(coordinator.devices().len(), 1);
    assert_eq!(coordinator.diagnostics().refresh_failures, 1);

    cloud.fail_fetch.store(false, Ordering::SeqCst);
    coordinator.refresh_now().await.unwrap();
    assert!(!coordinator.is_stale());
}

#[tokio::test(start_paused = true)]
async fn periodic_refresh_runs_on_interval() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    let feed = Arc::new(FakeFeed::default());
    let mut config = config(Duration::from_secs(10));
    config.refresh_interval = Duration::from_secs(60);
    let coordinator = started(&cloud, &feed, config).await;

    tokio::time::sleep(Duration::from_secs(61)).await;
    settle().await;
    assert_eq!(cloud.fetch_count(), 2);
    assert!(coordinator.status().borrow().last_refresh.is_some());
}

#[tokio::test(start_paused = true)]
async fn failed_start_can_be_retried() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    cloud.fail_fetch.store(true, Ordering::SeqCst);
    let feed = Arc::new(FakeFeed::default());
    let coordinator = Coordinator::new(
        config(Duration::from_secs(10)),
        Arc::clone(&cloud) as _,
        Arc::clone(&feed) as _,
    );

    assert!(coordinator.start().await.is_err());
    assert_eq!(*coordinator.connection_state().borrow(), ConnectionState::Disconnected);

    cloud.fail_fetch.store(false, Ordering::SeqCst);
    let report = coordinator.start().await.unwrap();
    assert_eq!(report.created, 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_everything() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    let feed = Arc::new(FakeFeed::default());
    let coordinator = started(&cloud, &feed, config(Duration::from_secs(10))).await;
    coordinator
        .request_command(&a1(), Field::SetpointCool, temp(22.0))
        .unwrap();
    settle().await;

    coordinator.shutdown().await;

    assert_eq!(*coordinator.connection_state().borrow(), ConnectionState::Stopped);
    assert!(matches!(
        coordinator.request_command(&a1(), Field::Power, FieldValue::Flag(false)),
        Err(CoreError::Shutdown)
    ));
    assert!(matches!(coordinator.refresh_now().await, Err(CoreError::Shutdown)));

    // Holds stay as they were; the last-known view remains readable.
    tokio::time::sleep(Duration::from_secs(30)).await;
    let view = coordinator.current_view(&a1()).unwrap();
    assert_eq!(
        view.field(Field::SetpointCool).unwrap().hold_state(),
        HoldState::OptimisticPending
    );
}

#[tokio::test(start_paused = true)]
async fn command_in_flight_at_shutdown_is_abandoned() {
    let cloud = FakeCloud::with_device("A1", default_fields());
    *cloud.command_delay.lock().unwrap() = Duration::from_secs(3);
    cloud.respond([Err(CommandError::Rejected("too late".into()))]);
    let feed = Arc::new(FakeFeed::default());
    let coordinator = started(&cloud, &feed, config(Duration::from_secs(10))).await;

    let handle = coordinator
        .request_command(&a1(), Field::SetpointCool, temp(25.0))
        .unwrap();
    settle().await;
    coordinator.shutdown().await;

    assert!(matches!(handle.outcome().await, Err(CoreError::Shutdown)));
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;

    // The rejection never landed, so nothing was rolled back.
    let view = coordinator.current_view(&a1()).unwrap();
    let state = view.field(Field::SetpointCool).unwrap();
    assert_eq!(state.value, temp(25.0));
    assert_eq!(state.hold_state(), HoldState::OptimisticPending);
    assert_eq!(coordinator.diagnostics().commands_rejected, 0);
}
