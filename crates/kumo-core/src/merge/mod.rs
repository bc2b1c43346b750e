// ── Remote update mergers ──
//
// REST snapshots and socket deltas share one per-field policy: a remote
// value matching an active hold confirms it, a contradicting value is held
// back until the hold expires, anything else goes through the store's
// timestamp check.

pub mod delta;
pub mod snapshot;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::model::{DeviceSerial, Field, FieldValue};
use crate::store::{DeviceTxn, FieldUpdate, Rejection};

pub use delta::{DeltaOutcome, DeltaReport, merge_delta};
pub use snapshot::{SnapshotReport, merge_snapshot};

/// A hold that a merge ended. Its timer is no longer needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedHold {
    pub serial: DeviceSerial,
    pub field: Field,
    pub generation: u64,
}

/// Per-field merge decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reconciled {
    Applied { changed: bool, released: Option<u64> },
    Confirmed { changed: bool, released: Option<u64> },
    HeldBack,
    Stale,
    Invalid,
}

/// Merge one remote value into a device under its entry lock.
pub(crate) fn reconcile_remote(
    txn: &mut DeviceTxn<'_>,
    field: Field,
    value: FieldValue,
    at: DateTime<Utc>,
    now: Instant,
) -> Reconciled {
    let hold = txn.device().field(field).and_then(|s| s.hold.clone());
    if let Some(hold) = hold {
        if hold.expected.matches(&value) {
            if let Some(applied) = txn.confirm(field, value, at) {
                return Reconciled::Confirmed {
                    changed: applied.changed,
                    released: applied.released.map(|h| h.generation),
                };
            }
            return Reconciled::HeldBack;
        }
        if !hold.is_expired(now) {
            return Reconciled::HeldBack;
        }
    }

    match txn.apply(FieldUpdate::remote(field, value, at)) {
        Ok(applied) => Reconciled::Applied {
            changed: applied.changed,
            released: applied.released.map(|h| h.generation),
        },
        Err(Rejection::Stale) => Reconciled::Stale,
        Err(Rejection::KindMismatch | Rejection::UnknownDevice) => Reconciled::Invalid,
    }
}
