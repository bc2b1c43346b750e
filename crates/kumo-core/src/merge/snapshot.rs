// ── Snapshot merger ──
//
// Applies a full REST read of a site. Devices are created on first sight
// and removed once a snapshot no longer lists them.

use std::collections::HashSet;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use super::{Reconciled, ReleasedHold, reconcile_remote};
use crate::model::DeviceSerial;
use crate::source::Snapshot;
use crate::store::DeviceStore;

/// What a snapshot merge did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotReport {
    pub created: usize,
    pub removed: Vec<DeviceSerial>,
    /// Fields written with the snapshot's value.
    pub applied: usize,
    /// Fields whose value actually changed.
    pub changed: usize,
    /// Fields that confirmed an optimistic hold.
    pub confirmed: usize,
    /// Fields skipped because an unexpired hold expects another value.
    pub held: usize,
    pub stale: usize,
    /// Fields whose value kind did not fit.
    pub invalid: usize,
    #[serde(skip)]
    pub released: Vec<ReleasedHold>,
}

/// Merge `snapshot` into the store.
pub fn merge_snapshot(store: &DeviceStore, snapshot: Snapshot) -> SnapshotReport {
    let Snapshot {
        site,
        fetched_at,
        devices,
    } = snapshot;
    let mut report = SnapshotReport::default();
    let mut seen = HashSet::with_capacity(devices.len());

    for entry in devices {
        if !seen.insert(entry.serial.clone()) {
            debug!(device = %entry.serial, "duplicate device in snapshot; keeping the first");
            continue;
        }
        if store.upsert_device(&entry.serial, &site, entry.meta) {
            report.created += 1;
        }

        let serial = entry.serial;
        let now = Instant::now();
        let decisions = store.update(&serial, |txn| {
            entry
                .fields
                .into_iter()
                .map(|(field, value)| (field, reconcile_remote(txn, field, value, fetched_at, now)))
                .collect::<Vec<_>>()
        });

        for (field, decision) in decisions.unwrap_or_default() {
            match decision {
                Reconciled::Applied { changed, released } => {
                    report.applied += 1;
                    report.changed += usize::from(changed);
                    report.released.extend(released.map(|generation| ReleasedHold {
                        serial: serial.clone(),
                        field,
                        generation,
                    }));
                }
                Reconciled::Confirmed { changed, released } => {
                    debug!(device = %serial, ?field, "snapshot confirmed optimistic hold");
                    report.applied += 1;
                    report.confirmed += 1;
                    report.changed += usize::from(changed);
                    report.released.extend(released.map(|generation| ReleasedHold {
                        serial: serial.clone(),
                        field,
                        generation,
                    }));
                }
                Reconciled::HeldBack => {
                    debug!(device = %serial, ?field, "snapshot value held back by optimistic hold");
                    report.held += 1;
                }
                Reconciled::Stale => report.stale += 1,
                Reconciled::Invalid => report.invalid += 1,
            }
        }
    }

    for serial in store.serials_for_site(&site) {
        if !seen.contains(&serial) && store.remove(&serial).is_some() {
            debug!(device = %serial, "device absent from snapshot; removed");
            report.removed.push(serial);
        }
    }

    report
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::clock;
    use crate::model::{DeviceMeta, Field, FieldValue, HoldState, SiteId, Source};
    use crate::source::SnapshotDevice;
    use crate::store::FieldUpdate;

    fn snapshot(at: chrono::DateTime<chrono::Utc>, devices: Vec<(&str, Vec<(Field, FieldValue)>)>) -> Snapshot {
        Snapshot {
            site: SiteId::new("home"),
            fetched_at: at,
            devices: devices
                .into_iter()
                .map(|(serial, fields)| SnapshotDevice {
                    serial: DeviceSerial::new(serial),
                    meta: DeviceMeta {
                        name: format!("Unit {serial}"),
                        ..DeviceMeta::default()
                    },
                    fields,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn creates_and_removes_devices() {
        let store = DeviceStore::new();
        let now = clock::now();

        let first = merge_snapshot(
            &store,
            snapshot(now, vec![
                ("A1", vec![(Field::Power, FieldValue::Flag(true))]),
                ("B2", vec![]),
            ]),
        );
        assert_eq!(first.created, 2);
        assert_eq!(first.applied, 1);

        let second = merge_snapshot(&store, snapshot(now + TimeDelta::seconds(1), vec![("A1", vec![])]));
        assert_eq!(second.created, 0);
        assert_eq!(second.removed, vec![DeviceSerial::new("B2")]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&DeviceSerial::new("A1")).unwrap().name(), "Unit A1");
    }

    #[tokio::test]
    async fn held_field_is_skipped_until_confirmed() {
        let store = DeviceStore::new();
        let serial = DeviceSerial::new("A1");
        let start = clock::now();
        merge_snapshot(
            &store,
            snapshot(start, vec![("A1", vec![(Field::SetpointCool, FieldValue::Temperature(21.0))])]),
        );

        let expires_at = Instant::now() + Duration::from_secs(10);
        store
            .apply_field_update(
                &serial,
                FieldUpdate::optimistic(Field::SetpointCool, FieldValue::Temperature(23.0), expires_at, 4),
            )
            .unwrap();

        let contradicting = merge_snapshot(
            &store,
            snapshot(start + TimeDelta::seconds(1), vec![(
                "A1",
                vec![
                    (Field::SetpointCool, FieldValue::Temperature(21.0)),
                    (Field::RoomTemp, FieldValue::Temperature(25.0)),
                ],
            )]),
        );
        assert_eq!(contradicting.held, 1);
        assert_eq!(contradicting.applied, 1);
        assert_eq!(store.get(&serial).unwrap().setpoint_cool(), Some(23.0));

        let confirming = merge_snapshot(
            &store,
            snapshot(start + TimeDelta::seconds(2), vec![(
                "A1",
                vec![(Field::SetpointCool, FieldValue::Temperature(23.0))],
            )]),
        );
        assert_eq!(confirming.confirmed, 1);
        assert_eq!(
            confirming.released,
            vec![ReleasedHold {
                serial: serial.clone(),
                field: Field::SetpointCool,
                generation: 4
            }]
        );

        let device = store.get(&serial).unwrap();
        let state = device.field(Field::SetpointCool).unwrap();
        assert_eq!(state.source, Source::Remote);
        assert_eq!(state.hold_state(), HoldState::Confirmed);
    }

    #[tokio::test]
    async fn older_snapshot_is_stale() {
        let store = DeviceStore::new();
        let now = clock::now();
        merge_snapshot(&store, snapshot(now, vec![("A1", vec![(Field::Humidity, FieldValue::Percent(40.0))])]));

        let report = merge_snapshot(
            &store,
            snapshot(now - TimeDelta::seconds(5), vec![("A1", vec![(Field::Humidity, FieldValue::Percent(55.0))])]),
        );
        assert_eq!(report.stale, 1);
        assert_eq!(store.get(&DeviceSerial::new("A1")).unwrap().humidity(), Some(40.0));
    }
}
