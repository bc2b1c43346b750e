// ── Reconciliation coordinator ──
//
// Owns the update loop for one site: periodic REST refresh, the socket
// intake, and optimistic command dispatch. Consumers read device copies
// and subscribe to change notifications.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::{Mutex, Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock;
use crate::config::CoordinatorConfig;
use crate::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::error::CoreError;
use crate::merge::{DeltaOutcome, SnapshotReport, merge_delta, merge_snapshot};
use crate::model::field::ROOM_TEMP_OFFSET_RANGE;
use crate::model::{Device, DeviceSerial, Field, FieldValue};
use crate::optimistic::{HoldTicket, HoldTracker};
use crate::source::{CloudApi, CommandError, EventFeed, FeedEvent};
use crate::store::{DeviceStore, StoreStatus};
use crate::stream::ChangeStream;

/// Pause before reopening a feed that ended on its own.
const FEED_REOPEN_DELAY: Duration = Duration::from_secs(5);

// ── ConnectionState ─────────────────────────────────────────────────

/// State of the push channel, observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

// ── CommandHandle ───────────────────────────────────────────────────

/// Pending remote delivery of an optimistic command.
///
/// The optimistic values are already visible when this is returned.
/// Dropping the handle does not cancel delivery.
#[derive(Debug)]
pub struct CommandHandle {
    serial: DeviceSerial,
    tickets: Vec<HoldTicket>,
    outcome: oneshot::Receiver<Result<(), CoreError>>,
}

impl CommandHandle {
    pub fn serial(&self) -> &DeviceSerial {
        &self.serial
    }

    /// One ticket per written field.
    pub fn tickets(&self) -> &[HoldTicket] {
        &self.tickets
    }

    /// Wait for the cloud's verdict.
    pub async fn outcome(self) -> Result<(), CoreError> {
        self.outcome.await.unwrap_or(Err(CoreError::Shutdown))
    }
}

// ── Coordinator ─────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<CoordinatorInner>`.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    config: CoordinatorConfig,
    api: Arc<dyn CloudApi>,
    feed: Arc<dyn EventFeed>,
    store: Arc<DeviceStore>,
    tracker: HoldTracker,
    diagnostics: Arc<Diagnostics>,
    connection_state: watch::Sender<ConnectionState>,
    resync: Notify,
    cancel: CancellationToken,
    started: AtomicBool,
    refresh_lock: Mutex<()>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Create a coordinator. Does NOT fetch anything -- call
    /// [`start()`](Self::start) to load the site and spawn background tasks.
    pub fn new(config: CoordinatorConfig, api: Arc<dyn CloudApi>, feed: Arc<dyn EventFeed>) -> Self {
        let store = Arc::new(DeviceStore::new());
        let diagnostics = Arc::new(Diagnostics::default());
        let cancel = CancellationToken::new();
        let tracker = HoldTracker::new(Arc::clone(&store), Arc::clone(&diagnostics), cancel.child_token());
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                api,
                feed,
                store,
                tracker,
                diagnostics,
                connection_state,
                resync: Notify::new(),
                cancel,
                started: AtomicBool::new(false),
                refresh_lock: Mutex::new(()),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Load the site and spawn the refresh and intake tasks.
    ///
    /// Fails if the initial snapshot cannot be fetched; the coordinator
    /// can be started again afterwards. Calling `start` on a running
    /// coordinator only refreshes.
    pub async fn start(&self) -> Result<SnapshotReport, CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::Shutdown);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return self.refresh_now().await;
        }

        self.set_connection_state(ConnectionState::Connecting);
        let report = match self.refresh_now().await {
            Ok(report) => report,
            Err(e) => {
                self.inner.started.store(false, Ordering::SeqCst);
                self.set_connection_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let mut handles = self.inner.task_handles.lock().await;
        handles.push(tokio::spawn(refresh_task(self.clone(), self.inner.cancel.clone())));
        handles.push(tokio::spawn(intake_task(self.clone(), self.inner.cancel.clone())));

        info!(
            site = %self.inner.config.site_id,
            devices = self.inner.store.len(),
            "coordinator started"
        );
        Ok(report)
    }

    /// Stop every background task and hold timer. In-flight fetches and
    /// commands are abandoned; nothing is applied afterwards.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.tracker.shutdown();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        self.set_connection_state(ConnectionState::Stopped);
        info!("coordinator stopped");
    }

    // ── Refresh ─────────────────────────────────────────────────────

    /// Fetch and merge a snapshot now.
    ///
    /// A failure keeps the last-known state and marks the store stale.
    pub async fn refresh_now(&self) -> Result<SnapshotReport, CoreError> {
        let inner = &self.inner;
        let _guard = inner.refresh_lock.lock().await;

        let fetched = tokio::select! {
            biased;
            () = inner.cancel.cancelled() => return Err(CoreError::Shutdown),
            result = inner.api.fetch_snapshot(&inner.config.site_id) => result,
        };
        if inner.cancel.is_cancelled() {
            return Err(CoreError::Shutdown);
        }

        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(e) => {
                Diagnostics::bump(&inner.diagnostics.refresh_failures);
                inner.store.mark_stale();
                warn!(error = %e, "snapshot fetch failed; keeping last-known state");
                return Err(e.into());
            }
        };

        let report = merge_snapshot(&inner.store, snapshot);
        for released in &report.released {
            inner
                .tracker
                .cancel(&released.serial, released.field, released.generation);
        }

        let diag = &inner.diagnostics;
        Diagnostics::bump(&diag.refreshes);
        Diagnostics::add(&diag.stale_updates, report.stale);
        Diagnostics::add(&diag.held_back, report.held);
        Diagnostics::add(&diag.invalid_updates, report.invalid);
        Diagnostics::add(&diag.holds_confirmed, report.confirmed);
        inner.store.mark_refreshed(clock::now());

        debug!(
            created = report.created,
            removed = report.removed.len(),
            changed = report.changed,
            held = report.held,
            "snapshot merged"
        );
        Ok(report)
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Write one field optimistically and send it to the cloud.
    pub fn request_command(
        &self,
        serial: &DeviceSerial,
        field: Field,
        value: FieldValue,
    ) -> Result<CommandHandle, CoreError> {
        self.request_commands(serial, vec![(field, value)])
    }

    /// Write several fields optimistically and send them in one remote call.
    ///
    /// Every write is validated before any is applied. On return the new
    /// values are visible through [`current_view`](Self::current_view).
    pub fn request_commands(
        &self,
        serial: &DeviceSerial,
        writes: Vec<(Field, FieldValue)>,
    ) -> Result<CommandHandle, CoreError> {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return Err(CoreError::Shutdown);
        }
        let writes = dedupe_writes(writes);
        if writes.is_empty() {
            return Err(CoreError::EmptyCommand);
        }
        for (field, value) in &writes {
            validate_write(*field, value)?;
        }
        if !inner.store.contains(serial) {
            return Err(CoreError::DeviceNotFound {
                serial: serial.to_string(),
            });
        }

        let mut tickets = Vec::with_capacity(writes.len());
        for (field, value) in &writes {
            match inner
                .tracker
                .begin(serial, *field, value.clone(), inner.config.hold_for(*field))
            {
                Ok(ticket) => tickets.push(ticket),
                Err(e) => {
                    for ticket in &tickets {
                        inner.tracker.rollback(ticket);
                    }
                    return Err(e);
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        let coordinator = self.clone();
        let dispatch_serial = serial.clone();
        let dispatch_tickets = tickets.clone();
        tokio::spawn(async move {
            let result = coordinator
                .dispatch(&dispatch_serial, &writes, &dispatch_tickets)
                .await;
            let _ = tx.send(result);
        });

        Ok(CommandHandle {
            serial: serial.clone(),
            tickets,
            outcome: rx,
        })
    }

    /// Deliver a command, retrying transient failures with backoff.
    async fn dispatch(
        &self,
        serial: &DeviceSerial,
        writes: &[(Field, FieldValue)],
        tickets: &[HoldTicket],
    ) -> Result<(), CoreError> {
        let inner = &self.inner;
        let retry = inner.config.command_retry;
        let attempts = retry.attempts.max(1);
        let mut attempt = 1;

        loop {
            let sent = tokio::select! {
                biased;
                () = inner.cancel.cancelled() => return Err(CoreError::Shutdown),
                result = inner.api.send_command(serial, writes) => result,
            };

            match sent {
                Ok(()) => {
                    Diagnostics::bump(&inner.diagnostics.commands_sent);
                    debug!(device = %serial, fields = writes.len(), "command accepted");
                    return Ok(());
                }
                Err(CommandError::Rejected(message)) => {
                    Diagnostics::bump(&inner.diagnostics.commands_rejected);
                    warn!(device = %serial, error = %message, "command rejected; rolling back");
                    for ticket in tickets {
                        inner.tracker.rollback(ticket);
                    }
                    return Err(CoreError::from_command(serial.as_str(), CommandError::Rejected(message)));
                }
                Err(CommandError::Transient(message)) if attempt < attempts => {
                    Diagnostics::bump(&inner.diagnostics.command_retries);
                    let delay = retry.backoff(attempt);
                    debug!(device = %serial, attempt, ?delay, error = %message, "command failed; retrying");
                    tokio::select! {
                        biased;
                        () = inner.cancel.cancelled() => return Err(CoreError::Shutdown),
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err @ CommandError::Transient(_)) => {
                    Diagnostics::bump(&inner.diagnostics.commands_failed);
                    warn!(device = %serial, error = %err, attempts, "command failed; holds expire normally");
                    return Err(CoreError::from_command(serial.as_str(), err));
                }
            }
        }
    }

    // ── Views ───────────────────────────────────────────────────────

    /// Current state of one device.
    pub fn current_view(&self, serial: &DeviceSerial) -> Result<Device, CoreError> {
        self.inner.store.get(serial)
    }

    /// Every tracked device of the site, ordered by serial.
    pub fn devices(&self) -> Vec<Device> {
        self.inner.store.list_devices(&self.inner.config.site_id)
    }

    pub fn subscribe(&self) -> ChangeStream {
        self.inner.store.subscribe()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<StoreStatus> {
        self.inner.store.status()
    }

    /// Whether the last fetch failed or the socket dropped since the last
    /// successful refresh. Reads are never blocked by it.
    pub fn is_stale(&self) -> bool {
        self.inner.store.current_status().stale
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.inner.diagnostics.snapshot()
    }

    /// Holds whose expiry timer is still running.
    pub fn pending_holds(&self) -> usize {
        self.inner.tracker.pending()
    }

    // ── Feed handling ───────────────────────────────────────────────

    fn handle_feed_event(&self, event: FeedEvent) {
        let inner = &self.inner;
        match event {
            FeedEvent::Deltas(deltas) => {
                inner.store.mark_socket_message(clock::now());
                for delta in deltas {
                    let report = merge_delta(&inner.store, delta);
                    if let Some(released) = report.released {
                        inner
                            .tracker
                            .cancel(&released.serial, released.field, released.generation);
                    }
                    let counter = match report.outcome {
                        DeltaOutcome::Applied { .. } => &inner.diagnostics.deltas_applied,
                        DeltaOutcome::Confirmed { .. } => {
                            Diagnostics::bump(&inner.diagnostics.deltas_applied);
                            &inner.diagnostics.holds_confirmed
                        }
                        DeltaOutcome::HeldBack => &inner.diagnostics.held_back,
                        DeltaOutcome::Stale => &inner.diagnostics.stale_updates,
                        DeltaOutcome::Invalid => &inner.diagnostics.invalid_updates,
                        DeltaOutcome::UnknownDevice => &inner.diagnostics.unknown_device_updates,
                    };
                    Diagnostics::bump(counter);
                }
            }
            FeedEvent::Connected => {
                self.set_connection_state(ConnectionState::Connected);
                info!("event feed connected");
            }
            FeedEvent::Reconnected => {
                Diagnostics::bump(&inner.diagnostics.reconnects);
                self.set_connection_state(ConnectionState::Connected);
                info!("event feed reconnected; requesting resync");
                inner.resync.notify_one();
            }
            FeedEvent::Disconnected => {
                self.set_connection_state(ConnectionState::Reconnecting);
                inner.store.mark_stale();
                warn!("event feed disconnected");
            }
        }
    }

    fn set_connection_state(&self, state: ConnectionState) {
        self.inner.connection_state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

// ── Validation ──────────────────────────────────────────────────────

fn validate_write(field: Field, value: &FieldValue) -> Result<(), CoreError> {
    if !field.is_writable() {
        return Err(CoreError::ReadOnlyField {
            field: field.to_string(),
        });
    }
    if value.kind() != field.kind() {
        return Err(CoreError::InvalidValue {
            field: field.to_string(),
            message: format!("expected a {} value, got {}", field.kind(), value.kind()),
        });
    }
    if let (Field::RoomTempOffset, FieldValue::Temperature(offset)) = (field, value) {
        if !ROOM_TEMP_OFFSET_RANGE.contains(offset) {
            return Err(CoreError::InvalidValue {
                field: field.to_string(),
                message: format!("offset {offset} is outside -5 to 5"),
            });
        }
    }
    Ok(())
}

/// Keep the last write per field, in first-seen order.
fn dedupe_writes(writes: Vec<(Field, FieldValue)>) -> Vec<(Field, FieldValue)> {
    let mut out: Vec<(Field, FieldValue)> = Vec::with_capacity(writes.len());
    for (field, value) in writes {
        match out.iter_mut().find(|(f, _)| *f == field) {
            Some(slot) => slot.1 = value,
            None => out.push((field, value)),
        }
    }
    out
}

// ── Background tasks ────────────────────────────────────────────────

/// Refresh on the configured interval, or immediately when the feed asks
/// for a resync.
async fn refresh_task(coordinator: Coordinator, cancel: CancellationToken) {
    let interval = coordinator.inner.config.refresh_interval;
    let next_tick = || (!interval.is_zero()).then(|| Instant::now() + interval);
    let mut deadline = next_tick();

    loop {
        let tick = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = coordinator.inner.resync.notified() => debug!("resync refresh"),
            () = tick => debug!("periodic refresh"),
        }

        // Failures are logged and counted by `refresh_now`.
        if let Err(CoreError::Shutdown) = coordinator.refresh_now().await {
            break;
        }
        deadline = next_tick();
    }
}

/// Single consumer of the event feed. Reopens the feed when the device
/// roster changes or the feed ends.
async fn intake_task(coordinator: Coordinator, cancel: CancellationToken) {
    let inner = &coordinator.inner;
    let mut roster = inner.store.roster();
    let mut resync_on_connect = false;

    loop {
        let devices = roster.borrow_and_update().to_vec();
        if devices.is_empty() {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                changed = roster.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    continue;
                }
            }
        }

        debug!(devices = devices.len(), "opening event feed");
        let feed_cancel = cancel.child_token();
        let mut events = inner.feed.open(devices, feed_cancel.clone());

        let roster_changed = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    feed_cancel.cancel();
                    return;
                }
                changed = roster.changed() => {
                    if changed.is_err() {
                        feed_cancel.cancel();
                        return;
                    }
                    break true;
                }
                event = events.next() => match event {
                    Some(FeedEvent::Connected) if resync_on_connect => {
                        resync_on_connect = false;
                        coordinator.handle_feed_event(FeedEvent::Reconnected);
                    }
                    Some(event) => coordinator.handle_feed_event(event),
                    None => break false,
                },
            }
        };

        feed_cancel.cancel();
        drop(events);

        if roster_changed {
            debug!("device roster changed; reopening event feed");
            continue;
        }

        // The feed gave up. Whatever it missed is recovered by a refresh
        // once the next feed connects.
        resync_on_connect = true;
        coordinator.set_connection_state(ConnectionState::Disconnected);
        inner.store.mark_stale();
        warn!("event feed ended; reopening");
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(FEED_REOPEN_DELAY) => {}
        }
    }
}
