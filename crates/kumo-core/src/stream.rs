// ── Change notifications ──
//
// Subscribers learn *what* changed, then pull the current value from the
// coordinator. Notifications never carry values.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::model::{DeviceSerial, Field};

/// A change observed in the device store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A field's value or source changed.
    Field { device: DeviceSerial, field: Field },
    DeviceAdded(DeviceSerial),
    DeviceRemoved(DeviceSerial),
    /// The subscriber fell behind and missed notifications; re-read
    /// everything it cares about.
    Resync,
}

/// Subscription handle for store changes.
pub struct ChangeStream {
    receiver: broadcast::Receiver<Change>,
}

impl ChangeStream {
    pub(crate) fn new(receiver: broadcast::Receiver<Change>) -> Self {
        Self { receiver }
    }

    /// Wait for the next change. Returns `None` once the store is gone.
    pub async fn next(&mut self) -> Option<Change> {
        match self.receiver.recv().await {
            Ok(change) => Some(change),
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "change subscriber lagged");
                Some(Change::Resync)
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// Take a change that is already queued, without waiting.
    pub fn try_next(&mut self) -> Option<Change> {
        match self.receiver.try_recv() {
            Ok(change) => Some(change),
            Err(TryRecvError::Lagged(_)) => Some(Change::Resync),
            Err(TryRecvError::Empty | TryRecvError::Closed) => None,
        }
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<Change> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> impl Stream<Item = Change> + Send + 'static {
        BroadcastStream::new(self.receiver).map(|item| item.unwrap_or(Change::Resync))
    }
}
