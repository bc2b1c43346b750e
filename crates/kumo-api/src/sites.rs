// Site and zone endpoints
//
// Zones are the discovery surface: each zone wraps one indoor unit's adapter
// with its current state.

use tracing::debug;

use crate::client::KumoClient;
use crate::error::Error;
use crate::models::{Site, Weather, Zone};

impl KumoClient {
    /// List all sites visible to the account.
    ///
    /// `GET /v3/sites/`
    pub async fn list_sites(&self) -> Result<Vec<Site>, Error> {
        debug!("listing sites");
        let sites: Option<Vec<Site>> = self.get("v3/sites/").await?;
        Ok(sites.unwrap_or_default())
    }

    /// List the zones of a site, each carrying its adapter state.
    ///
    /// `GET /v3/sites/{site}/zones`
    pub async fn list_zones(&self, site_id: &str) -> Result<Vec<Zone>, Error> {
        if site_id.is_empty() {
            return Err(Error::MissingSite {
                operation: "list_zones",
            });
        }
        debug!(site = site_id, "listing zones");
        let zones: Option<Vec<Zone>> = self.get(&format!("v3/sites/{site_id}/zones")).await?;
        Ok(zones.unwrap_or_default())
    }

    /// Current weather at a site.
    ///
    /// `GET /v3/sites/{site}/weather`
    pub async fn weather(&self, site_id: &str) -> Result<Weather, Error> {
        if site_id.is_empty() {
            return Err(Error::MissingSite { operation: "weather" });
        }
        debug!(site = site_id, "fetching weather");
        let weather: Option<Weather> = self.get(&format!("v3/sites/{site_id}/weather")).await?;
        Ok(weather.unwrap_or_default())
    }
}
