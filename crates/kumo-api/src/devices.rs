// Device endpoints
//
// Discovery walks the zone listing; command dispatch posts a batch of
// adapter keys to `send-command`.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::client::KumoClient;
use crate::error::Error;
use crate::models::{AdapterState, CommandRequest};

/// One indoor unit found through a site's zone listing.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub serial: String,
    pub name: String,
    pub zone_id: Option<String>,
    pub state: AdapterState,
}

impl KumoClient {
    /// Fetch a single device's details.
    ///
    /// `GET /v3/devices/{serial}`
    pub async fn device_details(&self, serial: &str) -> Result<AdapterState, Error> {
        debug!(device = serial, "fetching device details");
        let details: Option<AdapterState> = self.get(&format!("v3/devices/{serial}")).await?;
        Ok(details.unwrap_or_default())
    }

    /// Send a batch of adapter commands (e.g. `spCool`, `operationMode`).
    ///
    /// `POST /v3/devices/send-command`
    pub async fn send_command(&self, serial: &str, commands: &Map<String, Value>) -> Result<(), Error> {
        debug!(device = serial, keys = ?commands.keys().collect::<Vec<_>>(), "sending command");
        let body = serde_json::to_value(CommandRequest {
            device_serial: serial,
            commands,
        })
        .map_err(|e| Error::Deserialization {
            message: format!("command body: {e}"),
            body: String::new(),
        })?;
        self.post("v3/devices/send-command", &body).await?;
        Ok(())
    }

    /// Discover every device of a site from its zones.
    ///
    /// Zones without an adapter serial are skipped. Devices whose zone entry
    /// lacks a model number are enriched from the detail endpoint; that
    /// lookup is best-effort and its failures are only logged.
    pub async fn site_devices(&self, site_id: &str) -> Result<Vec<DiscoveredDevice>, Error> {
        let zones = self.list_zones(site_id).await?;

        let mut devices: Vec<DiscoveredDevice> = Vec::with_capacity(zones.len());
        for zone in zones {
            let Some(state) = zone.adapter else { continue };
            let Some(serial) = state.device_serial.clone().filter(|s| !s.is_empty()) else {
                continue;
            };
            if devices.iter().any(|d| d.serial == serial) {
                debug!(device = %serial, "serial listed in several zones, keeping first");
                continue;
            }
            devices.push(DiscoveredDevice {
                name: zone.name.unwrap_or_else(|| serial.clone()),
                zone_id: zone.id,
                serial,
                state,
            });
        }

        for device in devices.iter_mut().filter(|d| d.state.model_number().is_none()) {
            match self.device_details(&device.serial).await {
                Ok(details) => {
                    if let Some(model) = details.model_number() {
                        device.state.model_number = Some(model.to_owned());
                    }
                    if details.serial_number.is_some() {
                        device.state.serial_number = details.serial_number;
                    }
                }
                Err(e) => warn!(device = %device.serial, error = %e, "model lookup failed"),
            }
        }

        Ok(devices)
    }
}
