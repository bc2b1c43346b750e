//! CLI configuration -- thin wrapper around `kumo_config` shared types.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides (--profile,
//! --site, --timeout, --config).

use std::path::PathBuf;
use std::time::Duration;

use kumo_api::{KumoClient, TransportConfig};
use kumo_config::{Config, ConfigError, Profile};
use kumo_core::{Coordinator, CoordinatorConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file selected by `--config`, or the platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(kumo_config::config_path)
}

/// Load config, falling back to defaults when the file is missing.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(kumo_config::load_config_from(&config_file(global))?)
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Everything a cloud-bound command needs.
pub struct Session {
    pub profile_name: String,
    pub profile: Profile,
    pub client: KumoClient,
}

impl Session {
    /// Load config, pick the profile, and build an authenticated client.
    pub fn open(global: &GlobalOpts) -> Result<Self, CliError> {
        let path = config_file(global);
        let mut config = kumo_config::load_config_from(&path)?;
        let profile_name = active_profile_name(global, &config);

        let Some(profile) = config.profiles.remove(&profile_name) else {
            if config.profiles.is_empty() && !path.exists() {
                return Err(CliError::NoConfig {
                    path: path.display().to_string(),
                });
            }
            let mut available: Vec<&str> = config.profiles.keys().map(String::as_str).collect();
            available.sort_unstable();
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: available.join(", "),
            });
        };

        let client = build_client(&profile, &profile_name, &config, global)?;
        Ok(Self {
            profile_name,
            profile,
            client,
        })
    }

    /// Coordinator config for the profile, with `--site` applied.
    pub fn coordinator_config(&self, global: &GlobalOpts) -> Result<CoordinatorConfig, CliError> {
        let Some(site) = global.site.as_deref() else {
            return Ok(kumo_config::profile_to_coordinator_config(&self.profile)?);
        };
        let overridden = Profile {
            site_id: Some(site.to_owned()),
            ..self.profile.clone()
        };
        Ok(kumo_config::profile_to_coordinator_config(&overridden)?)
    }

    /// Coordinator bound to the session's client and site.
    pub fn coordinator(&self, global: &GlobalOpts) -> Result<Coordinator, CliError> {
        let config = self.coordinator_config(global)?;
        Ok(Coordinator::kumo(config, self.client.clone()))
    }

    /// Attribute an auth failure to the active profile.
    pub fn auth_context(&self, err: CliError) -> CliError {
        match err {
            CliError::AuthFailed { message, .. } => CliError::AuthFailed {
                profile: self.profile_name.clone(),
                message,
            },
            other => other,
        }
    }
}

fn build_client(
    profile: &Profile,
    profile_name: &str,
    config: &Config,
    global: &GlobalOpts,
) -> Result<KumoClient, CliError> {
    let credentials = kumo_config::resolve_credentials(profile, profile_name).map_err(|e| match e {
        ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
        other => other.into(),
    })?;

    let mut transport: TransportConfig = kumo_config::profile_transport(profile, &config.defaults);
    if let Some(secs) = global.timeout {
        transport.timeout = Duration::from_secs(secs);
    }

    let client = match kumo_config::profile_base_url(profile)? {
        Some(url) => KumoClient::with_base_url(url, credentials, &transport),
        None => KumoClient::new(credentials, &transport),
    };
    client.map_err(|e| CliError::from(kumo_core::CoreError::from(e)))
}
