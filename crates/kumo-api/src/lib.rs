// kumo-api: Async Rust client for Kumo Cloud (REST + Socket.IO stream)

pub mod auth;
pub mod client;
pub mod devices;
pub mod error;
pub mod models;
pub mod sites;
pub mod socket;
pub mod transport;

pub use auth::Credentials;
pub use client::KumoClient;
pub use devices::DiscoveredDevice;
pub use error::Error;
pub use socket::{SocketConfig, SocketEvent, SocketHandle};
pub use transport::TransportConfig;
