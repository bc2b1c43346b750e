// ── Cloud collaborators ──
//
// The coordinator talks to Kumo Cloud only through these two traits. The
// production implementation lives in `backend`; tests substitute fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::model::{DeviceMeta, DeviceSerial, Field, FieldValue, SiteId};

// ── Payloads ────────────────────────────────────────────────────────

/// A full point-in-time read of a site's devices.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub site: SiteId,
    /// When the read was issued; every field in it carries this timestamp.
    pub fetched_at: DateTime<Utc>,
    pub devices: Vec<SnapshotDevice>,
}

/// One device in a snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotDevice {
    pub serial: DeviceSerial,
    pub meta: DeviceMeta,
    pub fields: Vec<(Field, FieldValue)>,
}

/// A single field-level update pushed by the socket.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub serial: DeviceSerial,
    pub field: Field,
    pub value: FieldValue,
    /// Origin timestamp, if the source provides a trustworthy one.
    /// `None` means "use the receipt time".
    pub at: Option<DateTime<Utc>>,
}

/// Something the push channel produced.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Field updates from one message, in payload order.
    Deltas(Vec<Delta>),
    /// First successful connection of this feed.
    Connected,
    /// Connection re-established after a drop; state may have been missed.
    Reconnected,
    Disconnected,
}

// ── Errors ──────────────────────────────────────────────────────────

/// Failure to read from the cloud.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("{0}")]
    Failed(String),
}

/// Failure to deliver a command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Network trouble or server-side failure; may succeed on retry.
    #[error("{0}")]
    Transient(String),
    /// The cloud refused the command; retrying will not help.
    #[error("{0}")]
    Rejected(String),
}

// ── Traits ──────────────────────────────────────────────────────────

/// Request/response side of the cloud.
#[async_trait]
pub trait CloudApi: Send + Sync + 'static {
    async fn fetch_snapshot(&self, site: &SiteId) -> Result<Snapshot, TransportError>;

    /// Send every write in one remote call.
    async fn send_command(&self, serial: &DeviceSerial, writes: &[(Field, FieldValue)]) -> Result<(), CommandError>;
}

/// Push side of the cloud.
pub trait EventFeed: Send + Sync + 'static {
    /// Open a feed for `devices`. The stream ends when `cancel` fires or
    /// the feed gives up; the coordinator reopens it when the device set
    /// changes.
    fn open(&self, devices: Vec<DeviceSerial>, cancel: CancellationToken) -> BoxStream<'static, FeedEvent>;
}
