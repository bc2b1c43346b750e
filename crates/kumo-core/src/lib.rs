// kumo-core: Reconciliation coordinator between kumo-api and consumers (CLI).

pub mod backend;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod merge;
pub mod model;
pub mod optimistic;
pub mod source;
pub mod store;
pub mod stream;

mod convert;
mod diagnostics;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backend::KumoCloud;
pub use config::{CommandRetry, CoordinatorConfig};
pub use coordinator::{CommandHandle, ConnectionState, Coordinator};
pub use diagnostics::DiagnosticsSnapshot;
pub use error::CoreError;
pub use merge::{DeltaOutcome, DeltaReport, ReleasedHold, SnapshotReport};
pub use optimistic::{HoldTicket, HoldTracker};
pub use source::{CloudApi, CommandError, Delta, EventFeed, FeedEvent, Snapshot, SnapshotDevice, TransportError};
pub use store::{Applied, DeviceStore, FieldUpdate, Rejection, StoreStatus};
pub use stream::{Change, ChangeStream};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    AirDirection, Device, DeviceMeta, DeviceSerial, FanSpeed, Field, FieldState, FieldValue, Hold,
    HoldState, OperationMode, SiteId, Source, ValueKind,
};
