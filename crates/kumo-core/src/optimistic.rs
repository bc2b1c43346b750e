// ── Optimistic write tracker ──
//
// Every local write gets a hold with a fresh generation and a cancellable
// expiry timer. Generations are allocated under the device's entry lock,
// so the newest generation is always the one installed in the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::diagnostics::Diagnostics;
use crate::error::CoreError;
use crate::model::{DeviceSerial, Field, FieldValue};
use crate::store::{DeviceStore, FieldUpdate};

/// Receipt for one optimistic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldTicket {
    pub serial: DeviceSerial,
    pub field: Field,
    pub generation: u64,
    pub expires_at: Instant,
}

type TimerKey = (DeviceSerial, Field);

struct TrackerInner {
    store: Arc<DeviceStore>,
    diagnostics: Arc<Diagnostics>,
    next_generation: AtomicU64,
    timers: DashMap<TimerKey, (u64, CancellationToken)>,
    cancel: CancellationToken,
}

/// Records in-flight local writes and resolves or expires their holds.
#[derive(Clone)]
pub struct HoldTracker {
    inner: Arc<TrackerInner>,
}

impl HoldTracker {
    pub(crate) fn new(store: Arc<DeviceStore>, diagnostics: Arc<Diagnostics>, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                store,
                diagnostics,
                next_generation: AtomicU64::new(0),
                timers: DashMap::new(),
                cancel,
            }),
        }
    }

    /// Apply `value` optimistically and hold it for `hold`.
    ///
    /// Replaces any earlier hold on the same field; its timer is cancelled.
    pub fn begin(
        &self,
        serial: &DeviceSerial,
        field: Field,
        value: FieldValue,
        hold: Duration,
    ) -> Result<HoldTicket, CoreError> {
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
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::Shutdown);
        }

        let expires_at = Instant::now() + hold;
        let next_generation = &self.inner.next_generation;
        let generation = self
            .inner
            .store
            .update(serial, |txn| {
                let generation = next_generation.fetch_add(1, Ordering::SeqCst) + 1;
                txn.apply(FieldUpdate::optimistic(field, value, expires_at, generation))
                    .map(|_| generation)
            })
            .ok_or_else(|| CoreError::DeviceNotFound {
                serial: serial.to_string(),
            })?
            .map_err(|rejection| CoreError::from_rejection(serial.as_str(), field.as_str(), rejection))?;

        let ticket = HoldTicket {
            serial: serial.clone(),
            field,
            generation,
            expires_at,
        };
        Diagnostics::bump(&self.inner.diagnostics.holds_started);
        debug!(device = %serial, ?field, generation, "optimistic hold started");
        self.arm(&ticket);
        Ok(ticket)
    }

    /// Stop the timer of a hold that a remote update already ended.
    pub fn cancel(&self, serial: &DeviceSerial, field: Field, generation: u64) {
        let key = (serial.clone(), field);
        if let Some((_, (_, token))) = self.inner.timers.remove_if(&key, |_, (g, _)| *g == generation) {
            token.cancel();
        }
    }

    /// Revert the ticket's write to the last confirmed remote value.
    ///
    /// Returns `false` when a later write already owns the field.
    pub fn rollback(&self, ticket: &HoldTicket) -> bool {
        let rolled_back = self
            .inner
            .store
            .update(&ticket.serial, |txn| txn.rollback(ticket.field, ticket.generation))
            .unwrap_or(false);
        self.cancel(&ticket.serial, ticket.field, ticket.generation);
        if rolled_back {
            Diagnostics::bump(&self.inner.diagnostics.holds_rolled_back);
            debug!(device = %ticket.serial, field = ?ticket.field, generation = ticket.generation, "optimistic write rolled back");
        }
        rolled_back
    }

    /// Number of holds with a running timer.
    pub fn pending(&self) -> usize {
        self.inner.timers.len()
    }

    /// Cancel every pending timer. Holds stay in the store.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.timers.clear();
    }

    // ── Timers ──────────────────────────────────────────────────────

    fn arm(&self, ticket: &HoldTicket) {
        let token = self.inner.cancel.child_token();
        match self.inner.timers.entry((ticket.serial.clone(), ticket.field)) {
            Entry::Occupied(mut entry) => {
                if entry.get().0 >= ticket.generation {
                    return;
                }
                let (_, previous) = entry.insert((ticket.generation, token.clone()));
                previous.cancel();
            }
            Entry::Vacant(entry) => {
                entry.insert((ticket.generation, token.clone()));
            }
        }

        let inner = Arc::clone(&self.inner);
        let ticket = ticket.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep_until(ticket.expires_at) => inner.expire(&ticket),
            }
        });
    }
}

impl TrackerInner {
    fn expire(&self, ticket: &HoldTicket) {
        let expired = self
            .store
            .update(&ticket.serial, |txn| txn.expire_hold(ticket.field, ticket.generation))
            .unwrap_or(false);
        self.timers
            .remove_if(&(ticket.serial.clone(), ticket.field), |_, (g, _)| *g == ticket.generation);
        if expired {
            Diagnostics::bump(&self.diagnostics.holds_expired);
            debug!(
                device = %ticket.serial,
                field = ?ticket.field,
                generation = ticket.generation,
                "optimistic hold expired without confirmation"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock;
    use crate::model::{DeviceMeta, HoldState, SiteId, Source};
    use crate::stream::Change;

    fn setup() -> (Arc<DeviceStore>, HoldTracker, DeviceSerial) {
        let store = Arc::new(DeviceStore::new());
        let serial = DeviceSerial::new("A1");
        store.upsert_device(&serial, &SiteId::new("home"), DeviceMeta::default());
        store
            .apply_field_update(
                &serial,
                FieldUpdate::remote(Field::SetpointCool, FieldValue::Temperature(21.0), clock::now()),
            )
            .unwrap();
        let tracker = HoldTracker::new(Arc::clone(&store), Arc::default(), CancellationToken::new());
        (store, tracker, serial)
    }

    #[tokio::test(start_paused = true)]
    async fn hold_expires_without_reverting() {
        let (store, tracker, serial) = setup();
        tracker
            .begin(&serial, Field::SetpointCool, FieldValue::Temperature(23.0), Duration::from_secs(5))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;

        let device = store.get(&serial).unwrap();
        let state = device.field(Field::SetpointCool).unwrap();
        assert_eq!(state.value, FieldValue::Temperature(23.0));
        assert_eq!(state.source, Source::Optimistic);
        assert_eq!(state.hold_state(), HoldState::Expired);
        assert_eq!(tracker.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hold_expiry_is_published() {
        let (store, tracker, serial) = setup();
        tracker
            .begin(&serial, Field::SetpointCool, FieldValue::Temperature(23.0), Duration::from_secs(5))
            .unwrap();
        let mut changes = store.subscribe();

        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(
            changes.drain(),
            vec![Change::Field {
                device: serial.clone(),
                field: Field::SetpointCool,
            }]
        );
        let device = store.get(&serial).unwrap();
        assert_eq!(device.field(Field::SetpointCool).unwrap().hold_state(), HoldState::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn later_write_replaces_earlier_hold() {
        let (store, tracker, serial) = setup();
        let first = tracker
            .begin(&serial, Field::SetpointCool, FieldValue::Temperature(23.0), Duration::from_secs(5))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        let second = tracker
            .begin(&serial, Field::SetpointCool, FieldValue::Temperature(24.0), Duration::from_secs(5))
            .unwrap();
        assert!(second.generation > first.generation);

        // The first timer would have fired here.
        tokio::time::sleep(Duration::from_secs(3)).await;
        let device = store.get(&serial).unwrap();
        assert_eq!(device.field(Field::SetpointCool).unwrap().hold_state(), HoldState::OptimisticPending);
        assert_eq!(tracker.pending(), 1);

        assert!(!tracker.rollback(&first));
        assert!(tracker.rollback(&second));
        assert_eq!(store.get(&serial).unwrap().setpoint_cool(), Some(21.0));
    }

    #[tokio::test]
    async fn read_only_fields_are_refused() {
        let (_store, tracker, serial) = setup();
        let err = tracker
            .begin(&serial, Field::RoomTemp, FieldValue::Temperature(20.0), Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, CoreError::ReadOnlyField { .. }));

        let err = tracker
            .begin(&serial, Field::Power, FieldValue::Temperature(20.0), Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidValue { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_timers() {
        let (store, tracker, serial) = setup();
        tracker
            .begin(&serial, Field::SetpointCool, FieldValue::Temperature(23.0), Duration::from_secs(5))
            .unwrap();
        tracker.shutdown();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let device = store.get(&serial).unwrap();
        assert_eq!(device.field(Field::SetpointCool).unwrap().hold_state(), HoldState::OptimisticPending);
        assert!(matches!(
            tracker.begin(&serial, Field::Power, FieldValue::Flag(true), Duration::from_secs(1)),
            Err(CoreError::Shutdown)
        ));
    }
}
