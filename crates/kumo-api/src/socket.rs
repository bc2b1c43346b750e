//! Socket.IO event stream with auto-reconnect.
//!
//! Kumo Cloud pushes device telemetry over Socket.IO v4. This module speaks
//! just enough of the Engine.IO/Socket.IO framing over a plain WebSocket to
//! authenticate, subscribe to a set of devices and receive their events.
//! Reconnection uses exponential backoff + jitter.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures_util::StreamExt;
//! use kumo_api::socket::{SocketConfig, SocketHandle};
//! use tokio_util::sync::CancellationToken;
//!
//! let handle = SocketHandle::spawn(client, vec!["ABC123".into()], SocketConfig::default(), CancellationToken::new());
//! let mut events = Box::pin(handle.into_stream());
//! while let Some(event) = events.next().await {
//!     println!("{event:?}");
//! }
//! ```

use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::client::KumoClient;
use crate::error::Error;
use crate::models::{AdapterState, DeviceStatus};
use crate::transport::SOCKET_URL;

// ── Channel capacity ─────────────────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Adapter requests sent after connecting to force fresh state.
pub const DEFAULT_FORCE_REQUESTS: &[&str] = &["iuStatus", "profile", "adapterStatus", "mhk2"];

// ── SocketEvent ──────────────────────────────────────────────────────

/// An event surfaced from the socket stream.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// The session is authenticated and subscriptions were sent.
    /// `resumed` is true for every session after the first.
    Connected { resumed: bool },
    /// An established session dropped; a reconnect is pending.
    Disconnected,
    /// `device_update`: partial adapter state.
    DeviceUpdate(AdapterState),
    /// `device_status_v2`: adapter connectivity.
    DeviceStatus(DeviceStatus),
}

// ── Config ───────────────────────────────────────────────────────────

/// Exponential backoff configuration for socket reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

/// Socket session configuration.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Socket.IO endpoint (`https://` or `wss://`).
    pub endpoint: String,
    pub reconnect: ReconnectConfig,
    /// Send `force_adapter_request` for each device after connecting.
    pub refresh_on_connect: bool,
    pub force_requests: Vec<String>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            endpoint: SOCKET_URL.into(),
            reconnect: ReconnectConfig::default(),
            refresh_on_connect: true,
            force_requests: DEFAULT_FORCE_REQUESTS.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

// ── SocketHandle ─────────────────────────────────────────────────────

/// Handle to a running socket session.
///
/// Dropping the handle (or the stream returned by
/// [`into_stream`](Self::into_stream)) tears down the background task.
pub struct SocketHandle {
    event_rx: mpsc::Receiver<SocketEvent>,
    cancel: CancellationToken,
}

impl SocketHandle {
    /// Spawn the reconnection loop for `serials`.
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background.
    pub fn spawn(
        client: KumoClient,
        serials: Vec<String>,
        config: SocketConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            socket_loop(client, serials, config, event_tx, task_cancel).await;
        });

        Self { event_rx, cancel }
    }

    /// Convert into a `Stream` of events.
    pub fn into_stream(mut self) -> impl Stream<Item = SocketEvent> + Send + 'static {
        async_stream::stream! {
            while let Some(event) = self.event_rx.recv().await {
                yield event;
            }
        }
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on drop, backoff → reconnect.
async fn socket_loop(
    client: KumoClient,
    serials: Vec<String>,
    config: SocketConfig,
    event_tx: mpsc::Sender<SocketEvent>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    let mut sessions: u32 = 0;

    loop {
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&client, &serials, &config, &event_tx, &cancel, sessions > 0) => result,
        };

        if cancel.is_cancelled() || event_tx.is_closed() {
            break;
        }

        match outcome {
            Ok(established) => {
                if established {
                    sessions += 1;
                }
                tracing::info!("socket disconnected, reconnecting");
                attempt = 0;
            }
            Err((e, established)) => {
                if established {
                    sessions += 1;
                    attempt = 0;
                }
                tracing::warn!(error = %e, attempt, "socket error");

                if let Some(max) = config.reconnect.max_retries {
                    if attempt >= max {
                        tracing::error!(max_retries = max, "socket reconnection limit reached, giving up");
                        break;
                    }
                }
            }
        }

        let delay = calculate_backoff(attempt, &config.reconnect);
        tracing::debug!(
            delay_ms = millis(delay),
            attempt,
            "waiting before reconnect"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
        attempt = attempt.saturating_add(1);
    }

    tracing::debug!("socket loop exiting");
}

// ── Single session lifecycle ─────────────────────────────────────────

/// Run one socket session until it drops.
///
/// Returns whether the session got as far as the Socket.IO connect ack,
/// alongside the error on failure.
async fn connect_and_read(
    client: &KumoClient,
    serials: &[String],
    config: &SocketConfig,
    event_tx: &mpsc::Sender<SocketEvent>,
    cancel: &CancellationToken,
    resumed: bool,
) -> Result<bool, (Error, bool)> {
    let token = client.access_token().await.map_err(|e| (e, false))?;
    let url = socket_url(&config.endpoint).map_err(|e| (e, false))?;
    tracing::info!(url = %url, "connecting to socket");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| (Error::SocketConnect(e.to_string()), false))?;
    let request = ClientRequestBuilder::new(uri)
        .with_header("Authorization", format!("Bearer {}", token.expose_secret()));

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| (Error::SocketConnect(e.to_string()), false))?;
    let (mut write, mut read) = ws_stream.split();

    let mut established = false;
    let result: Result<(), Error> = loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break Ok(()),
            frame = read.next() => frame,
        };

        let text = match frame {
            Some(Ok(tungstenite::Message::Text(text))) => text,
            Some(Ok(tungstenite::Message::Close(frame))) => {
                break match frame {
                    Some(cf) => Err(Error::SocketClosed {
                        code: cf.code.into(),
                        reason: cf.reason.to_string(),
                    }),
                    None => Ok(()),
                };
            }
            Some(Err(e)) => break Err(Error::SocketConnect(e.to_string())),
            None => break Ok(()),
            Some(Ok(_)) => continue,
        };

        let reply = match decode_packet(&text) {
            Packet::Open => Some(connect_packet(token.expose_secret())),
            Packet::Ping => Some("3".to_owned()),
            Packet::Connected => {
                tracing::info!(devices = serials.len(), resumed, "socket connected");
                established = true;
                let mut outgoing = Vec::new();
                for serial in serials {
                    outgoing.push(encode_event("subscribe", &[json!(serial)]));
                    outgoing.push(encode_event("device_status_v2", &[json!(serial)]));
                    if config.refresh_on_connect {
                        for request in &config.force_requests {
                            outgoing.push(encode_event(
                                "force_adapter_request",
                                &[json!(serial), json!(request)],
                            ));
                        }
                    }
                }
                let mut failed = None;
                for packet in outgoing {
                    if let Err(e) = write.send(tungstenite::Message::Text(packet.into())).await {
                        failed = Some(e);
                        break;
                    }
                }
                if let Some(e) = failed {
                    break Err(Error::SocketConnect(e.to_string()));
                }
                if event_tx.send(SocketEvent::Connected { resumed }).await.is_err() {
                    break Ok(());
                }
                None
            }
            Packet::ConnectError(reason) => break Err(Error::SocketConnect(reason)),
            Packet::Disconnect | Packet::Close => break Ok(()),
            Packet::Event { name, args } => {
                if let Some(event) = event_from_args(&name, args) {
                    if event_tx.send(event).await.is_err() {
                        break Ok(());
                    }
                }
                None
            }
            Packet::Other => None,
        };

        if let Some(reply) = reply {
            if let Err(e) = write.send(tungstenite::Message::Text(reply.into())).await {
                break Err(Error::SocketConnect(e.to_string()));
            }
        }
    };

    if established {
        let _ = event_tx.send(SocketEvent::Disconnected).await;
    }
    result.map(|()| established).map_err(|e| (e, established))
}

/// `https://host` → `wss://host/socket.io/?EIO=4&transport=websocket`
fn socket_url(endpoint: &str) -> Result<Url, Error> {
    let mut url = Url::parse(endpoint)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::SocketConnect(format!("cannot use scheme {scheme} for {endpoint}")))?;
    url.set_path("/socket.io/");
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url)
}

// ── Framing ──────────────────────────────────────────────────────────

/// Decoded Engine.IO / Socket.IO packet (default namespace only).
#[derive(Debug, PartialEq)]
enum Packet {
    Open,
    Close,
    Ping,
    Connected,
    Disconnect,
    ConnectError(String),
    Event { name: String, args: Vec<Value> },
    Other,
}

fn decode_packet(text: &str) -> Packet {
    match text.get(..1) {
        Some("0") => Packet::Open,
        Some("1") => Packet::Close,
        Some("2") => Packet::Ping,
        Some("4") => decode_message(text.get(1..).unwrap_or_default()),
        _ => Packet::Other,
    }
}

fn decode_message(body: &str) -> Packet {
    let kind = body.get(..1);
    let mut rest = body.get(1..).unwrap_or_default();

    // Optional namespace prefix ("/ns,") and ack id digits.
    if rest.starts_with('/') {
        rest = rest.split_once(',').map_or("", |(_, tail)| tail);
    }
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());

    match kind {
        Some("0") => Packet::Connected,
        Some("1") => Packet::Disconnect,
        Some("2") => match serde_json::from_str::<Vec<Value>>(rest) {
            Ok(mut parts) if !parts.is_empty() => match parts.remove(0) {
                Value::String(name) => Packet::Event { name, args: parts },
                _ => Packet::Other,
            },
            _ => {
                tracing::debug!(frame = body, "unparseable socket event");
                Packet::Other
            }
        },
        Some("4") => Packet::ConnectError(rest.to_owned()),
        _ => Packet::Other,
    }
}

fn connect_packet(token: &str) -> String {
    format!("40{}", json!({ "token": token }))
}

fn encode_event(name: &str, args: &[Value]) -> String {
    let mut frame = Vec::with_capacity(args.len() + 1);
    frame.push(Value::String(name.to_owned()));
    frame.extend(args.iter().cloned());
    format!("42{}", Value::Array(frame))
}

/// Map a Socket.IO event to a typed event. Unknown event names are ignored.
fn event_from_args(name: &str, args: Vec<Value>) -> Option<SocketEvent> {
    let payload = args.into_iter().next()?;
    // Some emitters double-encode the payload as a JSON string.
    let payload = match payload {
        Value::String(raw) => serde_json::from_str(&raw).ok()?,
        other => other,
    };

    match name {
        "device_update" => match serde_json::from_value(payload) {
            Ok(state) => Some(SocketEvent::DeviceUpdate(state)),
            Err(e) => {
                tracing::debug!(error = %e, "could not decode device_update");
                None
            }
        },
        "device_status_v2" => match serde_json::from_value(payload) {
            Ok(status) => Some(SocketEvent::DeviceStatus(status)),
            Err(e) => {
                tracing::debug!(error = %e, "could not decode device_status_v2");
                None
            }
        },
        other => {
            tracing::trace!(event = other, "ignoring socket event");
            None
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 +- 0.25)`
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(31)).unwrap_or(31);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic jitter seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    Duration::from_secs_f64((capped * jitter_factor).max(0.0))
}

/// Whole milliseconds of `d`, saturating.
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Tests ────────────────────────────────────────────────────────────
