// ── Diagnostics counters ──
//
// Cheap atomic counters for dropped and reconciled updates. Read through
// `Coordinator::diagnostics()` as a serializable snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    pub(crate) refreshes: AtomicU64,
    pub(crate) refresh_failures: AtomicU64,
    pub(crate) deltas_applied: AtomicU64,
    pub(crate) held_back: AtomicU64,
    pub(crate) stale_updates: AtomicU64,
    pub(crate) invalid_updates: AtomicU64,
    pub(crate) unknown_device_updates: AtomicU64,
    pub(crate) holds_started: AtomicU64,
    pub(crate) holds_confirmed: AtomicU64,
    pub(crate) holds_expired: AtomicU64,
    pub(crate) holds_rolled_back: AtomicU64,
    pub(crate) commands_sent: AtomicU64,
    pub(crate) commands_rejected: AtomicU64,
    pub(crate) commands_failed: AtomicU64,
    pub(crate) command_retries: AtomicU64,
    pub(crate) reconnects: AtomicU64,
}

impl Diagnostics {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(u64::try_from(n).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DiagnosticsSnapshot {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        DiagnosticsSnapshot {
            refreshes: read(&self.refreshes),
            refresh_failures: read(&self.refresh_failures),
            deltas_applied: read(&self.deltas_applied),
            held_back: read(&self.held_back),
            stale_updates: read(&self.stale_updates),
            invalid_updates: read(&self.invalid_updates),
            unknown_device_updates: read(&self.unknown_device_updates),
            holds_started: read(&self.holds_started),
            holds_confirmed: read(&self.holds_confirmed),
            holds_expired: read(&self.holds_expired),
            holds_rolled_back: read(&self.holds_rolled_back),
            commands_sent: read(&self.commands_sent),
            commands_rejected: read(&self.commands_rejected),
            commands_failed: read(&self.commands_failed),
            command_retries: read(&self.command_retries),
            reconnects: read(&self.reconnects),
        }
    }
}

/// Point-in-time copy of the coordinator's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub refreshes: u64,
    pub refresh_failures: u64,
    pub deltas_applied: u64,
    /// Remote values dropped because an unexpired hold expected another.
    pub held_back: u64,
    pub stale_updates: u64,
    pub invalid_updates: u64,
    pub unknown_device_updates: u64,
    pub holds_started: u64,
    pub holds_confirmed: u64,
    pub holds_expired: u64,
    pub holds_rolled_back: u64,
    pub commands_sent: u64,
    pub commands_rejected: u64,
    /// Commands that ran out of retries.
    pub commands_failed: u64,
    pub command_retries: u64,
    pub reconnects: u64,
}
