// ── Device state store ──
//
// Authoritative in-memory record of every tracked device. Each device
// lives in its own `DashMap` entry; all mutation happens while holding
// that entry's guard, so hold checks and field application are atomic per
// device. Change notifications are sent after the guard is released.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use crate::clock;
use crate::error::CoreError;
use crate::model::{Device, DeviceMeta, DeviceSerial, Field, FieldState, FieldValue, Hold, HoldState, SiteId, Source};
use crate::stream::{Change, ChangeStream};

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

// ── Update types ────────────────────────────────────────────────────

/// Where an update came from, with the data its policy needs.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOrigin {
    /// Reported by the cloud at `at`.
    Remote { at: DateTime<Utc> },
    /// Written locally ahead of the cloud, protected by `hold`.
    Optimistic { hold: Hold },
}

/// A single field write.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub field: Field,
    pub value: FieldValue,
    pub origin: UpdateOrigin,
}

impl FieldUpdate {
    pub fn remote(field: Field, value: FieldValue, at: DateTime<Utc>) -> Self {
        Self {
            field,
            value,
            origin: UpdateOrigin::Remote { at },
        }
    }

    pub fn optimistic(field: Field, value: FieldValue, expires_at: Instant, generation: u64) -> Self {
        let hold = Hold {
            expected: value.clone(),
            expires_at,
            generation,
        };
        Self {
            field,
            value,
            origin: UpdateOrigin::Optimistic { hold },
        }
    }
}

/// Result of an accepted update.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// The field's value or source changed (a notification was queued).
    pub changed: bool,
    /// Hold that this update ended or replaced.
    pub released: Option<Hold>,
}

/// Why an update was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("update is older than the current value")]
    Stale,
    #[error("value kind does not match the field")]
    KindMismatch,
    #[error("device is not tracked")]
    UnknownDevice,
}

/// Freshness metadata for observers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    pub last_refresh: Option<DateTime<Utc>>,
    pub last_socket_message: Option<DateTime<Utc>>,
    /// Set after a failed fetch or a dropped socket; cleared by the next
    /// successful refresh. Reads are never blocked by it.
    pub stale: bool,
}

// ── DeviceTxn ───────────────────────────────────────────────────────

/// Mutable access to one device under its entry lock.
///
/// Records which fields changed so the store can notify once the lock is
/// released.
pub(crate) struct DeviceTxn<'a> {
    device: &'a mut Device,
    changed: Vec<Field>,
}

impl DeviceTxn<'_> {
    pub(crate) fn device(&self) -> &Device {
        self.device
    }

    pub(crate) fn set_meta(&mut self, site: SiteId, meta: DeviceMeta) {
        self.device.site = site;
        self.device.meta = meta;
    }

    fn mark(&mut self, field: Field, changed: bool) {
        if changed && !self.changed.contains(&field) {
            self.changed.push(field);
        }
    }

    /// Apply an update under the store's rules.
    pub(crate) fn apply(&mut self, update: FieldUpdate) -> Result<Applied, Rejection> {
        let FieldUpdate { field, value, origin } = update;
        if value.kind() != field.kind() {
            return Err(Rejection::KindMismatch);
        }

        let applied = match origin {
            UpdateOrigin::Remote { at } => self.apply_remote(field, value, at)?,
            UpdateOrigin::Optimistic { hold } => self.apply_optimistic(field, value, hold),
        };
        self.mark(field, applied.changed);
        Ok(applied)
    }

    fn apply_remote(&mut self, field: Field, value: FieldValue, at: DateTime<Utc>) -> Result<Applied, Rejection> {
        let Some(state) = self.device.fields.get_mut(&field) else {
            self.device.fields.insert(
                field,
                FieldState {
                    confirmed: Some(value.clone()),
                    value,
                    source: Source::Remote,
                    updated_at: at,
                    hold: None,
                    write_generation: None,
                    resolution: None,
                },
            );
            return Ok(Applied {
                changed: true,
                released: None,
            });
        };

        if at < state.updated_at {
            return Err(Rejection::Stale);
        }

        let changed = state.source != Source::Remote || !state.value.matches(&value);
        let released = state.hold.take();
        state.resolution = match &released {
            Some(hold) if hold.expected.matches(&value) => Some(HoldState::Confirmed),
            Some(hold) if hold.is_expired(Instant::now()) => Some(HoldState::Expired),
            _ => None,
        };
        state.confirmed = Some(value.clone());
        state.value = value;
        state.source = Source::Remote;
        state.updated_at = at;
        state.write_generation = None;

        Ok(Applied { changed, released })
    }

    fn apply_optimistic(&mut self, field: Field, value: FieldValue, hold: Hold) -> Applied {
        let generation = hold.generation;
        let Some(state) = self.device.fields.get_mut(&field) else {
            self.device.fields.insert(
                field,
                FieldState {
                    value,
                    source: Source::Optimistic,
                    updated_at: clock::now(),
                    hold: Some(hold),
                    confirmed: None,
                    write_generation: Some(generation),
                    resolution: None,
                },
            );
            return Applied {
                changed: true,
                released: None,
            };
        };

        let changed = state.source != Source::Optimistic || !state.value.matches(&value);
        let released = state.hold.replace(hold);
        state.value = value;
        state.source = Source::Optimistic;
        state.updated_at = state.updated_at.max(clock::now());
        state.write_generation = Some(generation);
        state.resolution = None;

        Applied { changed, released }
    }

    /// Accept a remote report matching the active hold's expected value.
    ///
    /// Clears the hold even when the report's timestamp trails the
    /// optimistic write; the timestamp only moves forward.
    pub(crate) fn confirm(&mut self, field: Field, value: FieldValue, at: DateTime<Utc>) -> Option<Applied> {
        let state = self.device.fields.get_mut(&field)?;
        if !state.hold.as_ref().is_some_and(|h| h.expected.matches(&value)) {
            return None;
        }

        let changed = state.source != Source::Remote || !state.value.matches(&value);
        let released = state.hold.take();
        state.confirmed = Some(value.clone());
        state.value = value;
        state.source = Source::Remote;
        state.updated_at = state.updated_at.max(at);
        state.write_generation = None;
        state.resolution = Some(HoldState::Confirmed);

        self.mark(field, changed);
        Some(Applied { changed, released })
    }

    /// End the hold of `generation` without touching the value.
    pub(crate) fn expire_hold(&mut self, field: Field, generation: u64) -> bool {
        let Some(state) = self.device.fields.get_mut(&field) else {
            return false;
        };
        if state.hold.as_ref().is_none_or(|h| h.generation != generation) {
            return false;
        }
        state.hold = None;
        state.resolution = Some(HoldState::Expired);
        self.mark(field, true);
        true
    }

    /// Revert the optimistic write of `generation` to the last confirmed
    /// remote value. A field the cloud never reported is removed.
    ///
    /// No-op when a later write already owns the field.
    pub(crate) fn rollback(&mut self, field: Field, generation: u64) -> bool {
        let Some(state) = self.device.fields.get_mut(&field) else {
            return false;
        };
        if state.write_generation != Some(generation) {
            return false;
        }

        let changed = match state.confirmed.clone() {
            Some(confirmed) => {
                let changed = state.source != Source::Remote || !state.value.matches(&confirmed);
                state.value = confirmed;
                state.source = Source::Remote;
                state.hold = None;
                state.write_generation = None;
                state.resolution = Some(HoldState::RolledBack);
                changed
            }
            None => {
                self.device.fields.remove(&field);
                true
            }
        };
        self.mark(field, changed);
        true
    }
}

// ── DeviceStore ─────────────────────────────────────────────────────

/// Concurrent per-device state with push-based change notification.
pub struct DeviceStore {
    devices: DashMap<DeviceSerial, Device>,
    changes: broadcast::Sender<Change>,
    status: watch::Sender<StoreStatus>,
    roster: watch::Sender<Arc<Vec<DeviceSerial>>>,
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let (status, _) = watch::channel(StoreStatus::default());
        let (roster, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            devices: DashMap::new(),
            changes,
            status,
            roster,
        }
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Snapshot copy of one device.
    pub fn get(&self, serial: &DeviceSerial) -> Result<Device, CoreError> {
        self.devices
            .get(serial)
            .map(|d| d.value().clone())
            .ok_or_else(|| CoreError::DeviceNotFound {
                serial: serial.to_string(),
            })
    }

    pub fn contains(&self, serial: &DeviceSerial) -> bool {
        self.devices.contains_key(serial)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Devices of `site`, ordered by serial.
    pub fn list_devices(&self, site: &SiteId) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .filter(|d| &d.site == site)
            .map(|d| d.value().clone())
            .collect();
        devices.sort_by(|a, b| a.serial.cmp(&b.serial));
        devices
    }

    pub(crate) fn serials_for_site(&self, site: &SiteId) -> Vec<DeviceSerial> {
        self.devices
            .iter()
            .filter(|d| &d.site == site)
            .map(|d| d.key().clone())
            .collect()
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Apply one field update to a device.
    ///
    /// Remote updates older than the field's timestamp are `Stale`; an
    /// applied remote update clears any hold. Optimistic updates always
    /// apply and install their hold.
    pub fn apply_field_update(&self, serial: &DeviceSerial, update: FieldUpdate) -> Result<Applied, Rejection> {
        self.update(serial, |txn| txn.apply(update))
            .unwrap_or(Err(Rejection::UnknownDevice))
    }

    /// Run `f` against one device under its entry lock, then publish the
    /// field changes it recorded. `None` if the device is unknown.
    pub(crate) fn update<R>(&self, serial: &DeviceSerial, f: impl FnOnce(&mut DeviceTxn<'_>) -> R) -> Option<R> {
        let (result, changed) = {
            let mut entry = self.devices.get_mut(serial)?;
            let mut txn = DeviceTxn {
                device: entry.value_mut(),
                changed: Vec::new(),
            };
            let result = f(&mut txn);
            (result, txn.changed)
        };

        for field in changed {
            self.notify(Change::Field {
                device: serial.clone(),
                field,
            });
        }
        Some(result)
    }

    /// Create the device if unseen, otherwise replace its metadata.
    /// Returns `true` when the device was created.
    pub(crate) fn upsert_device(&self, serial: &DeviceSerial, site: &SiteId, meta: DeviceMeta) -> bool {
        let created = match self.devices.entry(serial.clone()) {
            Entry::Occupied(mut entry) => {
                let device = entry.get_mut();
                device.site = site.clone();
                device.meta = meta;
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(Device::new(serial.clone(), site.clone(), meta));
                true
            }
        };

        if created {
            self.notify(Change::DeviceAdded(serial.clone()));
            self.publish_roster();
        }
        created
    }

    pub(crate) fn remove(&self, serial: &DeviceSerial) -> Option<Device> {
        let removed = self.devices.remove(serial).map(|(_, d)| d);
        if removed.is_some() {
            self.notify(Change::DeviceRemoved(serial.clone()));
            self.publish_roster();
        }
        removed
    }

    // ── Observation ─────────────────────────────────────────────────

    pub fn subscribe(&self) -> ChangeStream {
        ChangeStream::new(self.changes.subscribe())
    }

    pub fn status(&self) -> watch::Receiver<StoreStatus> {
        self.status.subscribe()
    }

    pub fn current_status(&self) -> StoreStatus {
        self.status.borrow().clone()
    }

    /// Tracked serials, sorted. Changes whenever a device is added or
    /// removed.
    pub fn roster(&self) -> watch::Receiver<Arc<Vec<DeviceSerial>>> {
        self.roster.subscribe()
    }

    pub(crate) fn mark_refreshed(&self, at: DateTime<Utc>) {
        self.status.send_modify(|s| {
            s.last_refresh = Some(at);
            s.stale = false;
        });
    }

    pub(crate) fn mark_socket_message(&self, at: DateTime<Utc>) {
        self.status.send_modify(|s| s.last_socket_message = Some(at));
    }

    pub(crate) fn mark_stale(&self) {
        self.status.send_if_modified(|s| !std::mem::replace(&mut s.stale, true));
    }

    // ── Private helpers ─────────────────────────────────────────────

    fn notify(&self, change: Change) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }

    fn publish_roster(&self) {
        let mut serials: Vec<DeviceSerial> = self.devices.iter().map(|d| d.key().clone()).collect();
        serials.sort();
        self.roster.send_if_modified(|current| {
            if **current == serials {
                false
            } else {
                *current = Arc::new(serials);
                true
            }
        });
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;

    use super::*;
    use crate::model::OperationMode;

    fn serial() -> DeviceSerial {
        DeviceSerial::new("A1")
    }

    fn store_with_device() -> DeviceStore {
        let store = DeviceStore::new();
        store.upsert_device(&serial(), &SiteId::new("home"), DeviceMeta::default());
        store
    }

    fn temp(t: f64) -> FieldValue {
        FieldValue::Temperature(t)
    }

    #[test]
    fn older_remote_update_is_stale() {
        let store = store_with_device();
        let now = clock::now();

        store
            .apply_field_update(&serial(), FieldUpdate::remote(Field::SetpointCool, temp(22.0), now))
            .unwrap();
        let result = store.apply_field_update(
            &serial(),
            FieldUpdate::remote(Field::SetpointCool, temp(18.0), now - TimeDelta::seconds(1)),
        );

        assert_eq!(result, Err(Rejection::Stale));
        assert_eq!(store.get(&serial()).unwrap().setpoint_cool(), Some(22.0));
    }

    #[test]
    fn equal_timestamp_is_accepted() {
        let store = store_with_device();
        let now = clock::now();
        let first = FieldUpdate::remote(Field::Humidity, FieldValue::Percent(40.0), now);
        let second = FieldUpdate::remote(Field::Humidity, FieldValue::Percent(45.0), now);

        store.apply_field_update(&serial(), first).unwrap();
        let applied = store.apply_field_update(&serial(), second).unwrap();
        assert!(applied.changed);
    }

    #[test]
    fn kind_mismatch_and_unknown_device_are_rejected() {
        let store = store_with_device();
        let bad_kind = FieldUpdate::remote(Field::Mode, temp(20.0), clock::now());
        assert_eq!(store.apply_field_update(&serial(), bad_kind), Err(Rejection::KindMismatch));

        let update = FieldUpdate::remote(Field::Power, FieldValue::Flag(true), clock::now());
        assert_eq!(
            store.apply_field_update(&DeviceSerial::new("ghost"), update),
            Err(Rejection::UnknownDevice)
        );
    }

    #[tokio::test]
    async fn notifications_only_on_value_or_source_change() {
        let store = store_with_device();
        let mut changes = store.subscribe();
        let now = clock::now();

        let mode = FieldValue::Mode(OperationMode::Cool);
        store
            .apply_field_update(&serial(), FieldUpdate::remote(Field::Mode, mode.clone(), now))
            .unwrap();
        let again = store
            .apply_field_update(&serial(), FieldUpdate::remote(Field::Mode, mode, now))
            .unwrap();

        assert!(!again.changed);
        assert_eq!(
            changes.drain(),
            vec![Change::Field {
                device: serial(),
                field: Field::Mode
            }]
        );
    }

    #[tokio::test]
    async fn optimistic_write_keeps_timestamp_monotonic() {
        let store = store_with_device();
        let future = clock::now() + TimeDelta::seconds(30);
        store
            .apply_field_update(&serial(), FieldUpdate::remote(Field::SetpointHeat, temp(20.0), future))
            .unwrap();

        let expires_at = Instant::now() + Duration::from_secs(10);
        store
            .apply_field_update(&serial(), FieldUpdate::optimistic(Field::SetpointHeat, temp(21.0), expires_at, 1))
            .unwrap();

        let device = store.get(&serial()).unwrap();
        let state = device.field(Field::SetpointHeat).unwrap();
        assert_eq!(state.source, Source::Optimistic);
        assert_eq!(state.updated_at, future);
        assert_eq!(state.hold_state(), HoldState::OptimisticPending);
        assert_eq!(state.confirmed, Some(temp(20.0)));
    }

    #[tokio::test]
    async fn rollback_restores_confirmed_value_only_for_owning_generation() {
        let store = store_with_device();
        store
            .apply_field_update(&serial(), FieldUpdate::remote(Field::SetpointCool, temp(21.0), clock::now()))
            .unwrap();
        let expires_at = Instant::now() + Duration::from_secs(10);
        store
            .apply_field_update(&serial(), FieldUpdate::optimistic(Field::SetpointCool, temp(23.0), expires_at, 1))
            .unwrap();
        store
            .apply_field_update(&serial(), FieldUpdate::optimistic(Field::SetpointCool, temp(24.0), expires_at, 2))
            .unwrap();

        assert_eq!(store.update(&serial(), |txn| txn.rollback(Field::SetpointCool, 1)), Some(false));
        assert_eq!(store.get(&serial()).unwrap().setpoint_cool(), Some(24.0));

        assert_eq!(store.update(&serial(), |txn| txn.rollback(Field::SetpointCool, 2)), Some(true));
        let device = store.get(&serial()).unwrap();
        assert_eq!(device.setpoint_cool(), Some(21.0));
        assert_eq!(device.field(Field::SetpointCool).unwrap().hold_state(), HoldState::RolledBack);
    }

    #[tokio::test]
    async fn rollback_of_never_reported_field_removes_it() {
        let store = store_with_device();
        let expires_at = Instant::now() + Duration::from_secs(10);
        store
            .apply_field_update(&serial(), FieldUpdate::optimistic(Field::FanSpeed, FieldValue::Fan(crate::model::FanSpeed::Quiet), expires_at, 7))
            .unwrap();

        store.update(&serial(), |txn| txn.rollback(Field::FanSpeed, 7));
        assert!(store.get(&serial()).unwrap().field(Field::FanSpeed).is_none());
    }

    #[tokio::test]
    async fn roster_tracks_membership() {
        let store = DeviceStore::new();
        let roster = store.roster();
        let site = SiteId::new("home");

        store.upsert_device(&DeviceSerial::new("B2"), &site, DeviceMeta::default());
        store.upsert_device(&DeviceSerial::new("A1"), &site, DeviceMeta::default());
        assert_eq!(
            **roster.borrow(),
            vec![DeviceSerial::new("A1"), DeviceSerial::new("B2")]
        );

        store.remove(&DeviceSerial::new("B2"));
        assert_eq!(**roster.borrow(), vec![DeviceSerial::new("A1")]);
    }

    #[test]
    fn stale_flag_clears_on_refresh() {
        let store = DeviceStore::new();
        store.mark_stale();
        assert!(store.current_status().stale);
        store.mark_refreshed(clock::now());
        assert!(!store.current_status().stale);
    }
}
