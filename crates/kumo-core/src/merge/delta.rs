// ── Stream merger ──
//
// Applies socket deltas one at a time. Deltas for devices the store does
// not know about are anomalies, not errors.

use tokio::time::Instant;
use tracing::{debug, warn};

use super::{Reconciled, ReleasedHold, reconcile_remote};
use crate::clock;
use crate::source::Delta;
use crate::store::DeviceStore;

/// Outcome of merging one delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    Applied { changed: bool },
    /// Matched an active hold and ended it.
    Confirmed { changed: bool },
    /// Contradicted an unexpired hold; dropped.
    HeldBack,
    /// Older than the field's current value; dropped.
    Stale,
    /// Value kind does not fit the field; dropped.
    Invalid,
    UnknownDevice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaReport {
    pub outcome: DeltaOutcome,
    /// Hold ended by this delta, whose timer can be cancelled.
    pub released: Option<ReleasedHold>,
}

/// Merge one delta. A missing timestamp means "received now".
pub fn merge_delta(store: &DeviceStore, delta: Delta) -> DeltaReport {
    let Delta {
        serial,
        field,
        value,
        at,
    } = delta;
    let at = at.unwrap_or_else(clock::now);
    let now = Instant::now();

    let Some(decision) = store.update(&serial, |txn| reconcile_remote(txn, field, value, at, now)) else {
        warn!(device = %serial, ?field, "delta for unknown device dropped");
        return DeltaReport {
            outcome: DeltaOutcome::UnknownDevice,
            released: None,
        };
    };

    let (outcome, released) = match decision {
        Reconciled::Applied { changed, released } => (DeltaOutcome::Applied { changed }, released),
        Reconciled::Confirmed { changed, released } => {
            debug!(device = %serial, ?field, "delta confirmed optimistic hold");
            (DeltaOutcome::Confirmed { changed }, released)
        }
        Reconciled::HeldBack => {
            debug!(device = %serial, ?field, "delta held back by optimistic hold");
            (DeltaOutcome::HeldBack, None)
        }
        Reconciled::Stale => {
            debug!(device = %serial, ?field, "stale delta dropped");
            (DeltaOutcome::Stale, None)
        }
        Reconciled::Invalid => {
            debug!(device = %serial, ?field, "delta with mismatched value kind dropped");
            (DeltaOutcome::Invalid, None)
        }
    };

    DeltaReport {
        outcome,
        released: released.map(|generation| ReleasedHold {
            serial,
            field,
            generation,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;

    use super::*;
    use crate::model::{DeviceMeta, DeviceSerial, Field, FieldValue, HoldState, SiteId};
    use crate::store::FieldUpdate;

    fn store() -> DeviceStore {
        let store = DeviceStore::new();
        store.upsert_device(&DeviceSerial::new("A1"), &SiteId::new("home"), DeviceMeta::default());
        store
    }

    fn delta(value: f64, at: Option<chrono::DateTime<chrono::Utc>>) -> Delta {
        Delta {
            serial: DeviceSerial::new("A1"),
            field: Field::SetpointHeat,
            value: FieldValue::Temperature(value),
            at,
        }
    }

    #[tokio::test]
    async fn unknown_device_is_reported() {
        let store = DeviceStore::new();
        let report = merge_delta(&store, delta(20.0, None));
        assert_eq!(report.outcome, DeltaOutcome::UnknownDevice);
    }

    #[tokio::test]
    async fn missing_timestamp_uses_receipt_time() {
        let store = store();
        let report = merge_delta(&store, delta(20.0, None));
        assert_eq!(report.outcome, DeltaOutcome::Applied { changed: true });

        let older = merge_delta(&store, delta(19.0, Some(clock::now() - TimeDelta::seconds(60))));
        assert_eq!(older.outcome, DeltaOutcome::Stale);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_hold_lets_contradicting_delta_through() {
        let store = store();
        let serial = DeviceSerial::new("A1");
        let expires_at = Instant::now() + Duration::from_secs(5);
        store
            .apply_field_update(
                &serial,
                FieldUpdate::optimistic(Field::SetpointHeat, FieldValue::Temperature(22.0), expires_at, 1),
            )
            .unwrap();

        assert_eq!(merge_delta(&store, delta(20.0, None)).outcome, DeltaOutcome::HeldBack);

        tokio::time::advance(Duration::from_secs(6)).await;
        let report = merge_delta(&store, delta(20.0, None));
        assert_eq!(report.outcome, DeltaOutcome::Applied { changed: true });
        assert_eq!(report.released.map(|r| r.generation), Some(1));

        let device = store.get(&serial).unwrap();
        assert_eq!(device.setpoint_heat(), Some(20.0));
        assert_eq!(device.field(Field::SetpointHeat).unwrap().hold_state(), HoldState::Expired);
    }
}
