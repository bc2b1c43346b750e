// ── Device state store ──
//
// Per-device entry locks with push-based change notification.

mod device_store;

pub(crate) use device_store::DeviceTxn;
pub use device_store::{Applied, DeviceStore, FieldUpdate, Rejection, StoreStatus, UpdateOrigin};
