// ── Kumo Cloud backend ──
//
// Binds the coordinator's collaborator traits to `kumo-api`: snapshots come
// from the zone listing, the feed from the Socket.IO session.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::future;
use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use kumo_api::{KumoClient, SocketConfig, SocketEvent, SocketHandle};

use crate::clock;
use crate::config::CoordinatorConfig;
use crate::convert;
use crate::coordinator::Coordinator;
use crate::model::{DeviceSerial, Field, FieldValue, SiteId};
use crate::source::{CloudApi, CommandError, Delta, EventFeed, FeedEvent, Snapshot, TransportError};

/// `CloudApi` + `EventFeed` backed by the real cloud.
#[derive(Clone)]
pub struct KumoCloud {
    client: KumoClient,
    socket: SocketConfig,
}

impl KumoCloud {
    pub fn new(client: KumoClient) -> Self {
        Self {
            client,
            socket: SocketConfig::default(),
        }
    }

    #[must_use]
    pub fn with_socket_config(mut self, socket: SocketConfig) -> Self {
        self.socket = socket;
        self
    }

    pub fn client(&self) -> &KumoClient {
        &self.client
    }
}

#[async_trait]
impl CloudApi for KumoCloud {
    async fn fetch_snapshot(&self, site: &SiteId) -> Result<Snapshot, TransportError> {
        // Stamped when the request goes out: anything pushed after this
        // point is newer than the snapshot.
        let fetched_at = clock::now();
        let devices = self
            .client
            .site_devices(site.as_str())
            .await
            .map_err(|e| convert::transport_error(&e))?;

        Ok(Snapshot {
            site: site.clone(),
            fetched_at,
            devices: devices.iter().map(convert::snapshot_device).collect(),
        })
    }

    async fn send_command(&self, serial: &DeviceSerial, writes: &[(Field, FieldValue)]) -> Result<(), CommandError> {
        let body = convert::command_body(writes);
        self.client
            .send_command(serial.as_str(), &body)
            .await
            .map_err(|e| convert::command_error(&e))
    }
}

impl EventFeed for KumoCloud {
    fn open(&self, devices: Vec<DeviceSerial>, cancel: CancellationToken) -> BoxStream<'static, FeedEvent> {
        let serials = devices.iter().map(ToString::to_string).collect();
        let handle = SocketHandle::spawn(self.client.clone(), serials, self.socket.clone(), cancel);
        handle
            .into_stream()
            .filter_map(|event| future::ready(feed_event(event)))
            .boxed()
    }
}

/// Translate one socket event. Payloads without a serial or without any
/// recognised field produce nothing.
fn feed_event(event: SocketEvent) -> Option<FeedEvent> {
    let (serial, fields, at) = match event {
        SocketEvent::Connected { resumed: false } => return Some(FeedEvent::Connected),
        SocketEvent::Connected { resumed: true } => return Some(FeedEvent::Reconnected),
        SocketEvent::Disconnected => return Some(FeedEvent::Disconnected),
        SocketEvent::DeviceUpdate(state) => (
            state.device_serial.clone(),
            convert::adapter_fields(&state),
            state.timestamp(),
        ),
        SocketEvent::DeviceStatus(status) => (
            status.device_serial.clone(),
            convert::status_fields(&status),
            status.timestamp(),
        ),
    };

    let Some(serial) = serial.filter(|s| !s.is_empty()) else {
        debug!("socket payload without device serial ignored");
        return None;
    };
    if fields.is_empty() {
        return None;
    }

    let serial = DeviceSerial::new(serial);
    // Payloads without a date are stamped on receipt by the merger.
    let deltas = fields
        .into_iter()
        .map(|(field, value)| Delta {
            serial: serial.clone(),
            field,
            value,
            at,
        })
        .collect();
    Some(FeedEvent::Deltas(deltas))
}

impl Coordinator {
    /// Coordinator wired to Kumo Cloud through `client`.
    pub fn kumo(config: CoordinatorConfig, client: KumoClient) -> Self {
        let socket = SocketConfig {
            refresh_on_connect: config.refresh_on_connect,
            ..SocketConfig::default()
        };
        let cloud = Arc::new(KumoCloud::new(client).with_socket_config(socket));
        let api: Arc<dyn CloudApi> = cloud.clone();
        let feed: Arc<dyn EventFeed> = cloud;
        Self::new(config, api, feed)
    }
}
