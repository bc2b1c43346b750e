// ── Domain model ──

pub mod device;
pub mod field;
pub mod ids;

pub use device::{Device, DeviceMeta, FieldState, Hold, HoldState, Source};
pub use field::{AirDirection, FanSpeed, Field, FieldValue, OperationMode, ValueKind};
pub use ids::{DeviceSerial, SiteId};
