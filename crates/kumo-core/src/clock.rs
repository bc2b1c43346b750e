// ── Shared clock ──
//
// Field timestamps are UTC, hold expiries are tokio instants. Deriving the
// former from the latter keeps both on one timeline, including under a
// paused tokio clock.

use std::sync::OnceLock;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

static ANCHOR: OnceLock<(Instant, DateTime<Utc>)> = OnceLock::new();

/// Current time as seen by the coordinator.
pub fn now() -> DateTime<Utc> {
    let (anchor_instant, anchor_utc) = *ANCHOR.get_or_init(|| (Instant::now(), Utc::now()));
    let current = Instant::now();
    if current >= anchor_instant {
        anchor_utc + delta(current - anchor_instant)
    } else {
        // A paused test runtime may start before the anchor was taken.
        anchor_utc - delta(anchor_instant - current)
    }
}

fn delta(d: std::time::Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or_else(|_| TimeDelta::zero())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn follows_the_tokio_clock() {
        let before = now();
        tokio::time::sleep(Duration::from_secs(5)).await;
        let after = now();
        assert!(after - before >= TimeDelta::seconds(5));
    }
}
