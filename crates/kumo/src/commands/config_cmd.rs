//! Config subcommand handlers.

use dialoguer::{Input, Select};
use secrecy::SecretString;

use kumo_api::{Credentials, KumoClient, TransportConfig};
use kumo_config::{Config, Profile};
use kumo_core::CoreError;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "********";

// ── Helpers ─────────────────────────────────────────────────────────

fn save(cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    kumo_config::save_config_to(cfg, &config::config_file(global))?;
    Ok(())
}

fn profile_not_found(name: String, cfg: &Config) -> CliError {
    let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
    available.sort_unstable();
    CliError::ProfileNotFound {
        name,
        available: if available.is_empty() {
            "(none)".into()
        } else {
            available.join(", ")
        },
    }
}

/// Log in with the entered credentials and let the user pick a site.
async fn choose_site(username: &str, password: &str) -> Result<String, CliError> {
    let credentials = Credentials::new(username, SecretString::from(password.to_owned()));
    let client = KumoClient::new(credentials, &TransportConfig::default())
        .map_err(|e| CliError::from(CoreError::from(e)))?;

    eprintln!("   Signing in to Kumo Cloud...");
    let sites = client
        .list_sites()
        .await
        .map_err(|e| CliError::from(CoreError::from(e)))?;

    match sites.as_slice() {
        [] => Err(CliError::NotFound {
            resource_type: "site".into(),
            identifier: username.into(),
            list_command: "sites".into(),
        }),
        [only] => {
            eprintln!("   Using site {} ({})", only.display_name(), only.id);
            Ok(only.id.clone())
        }
        many => {
            let labels: Vec<String> = many
                .iter()
                .map(|s| format!("{} ({})", s.display_name(), s.id))
                .collect();
            let selection = Select::new()
                .with_prompt("Site")
                .items(&labels)
                .default(0)
                .interact()
                .map_err(CliError::prompt)?;
            Ok(many
                .get(selection)
                .map(|s| s.id.clone())
                .unwrap_or_default())
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init: interactive wizard ────────────────────────────────
        ConfigCommand::Init => {
            let path = config::config_file(global);
            let mut cfg = config::load(global)?;
            eprintln!("Kumo Cloud -- configuration wizard");
            eprintln!("   Config path: {}\n", path.display());

            // 1. Profile name
            let profile_name: String = Input::new()
                .with_prompt("Profile name")
                .default(config::active_profile_name(global, &cfg))
                .interact_text()
                .map_err(CliError::prompt)?;

            // 2. Account
            let username: String = Input::new()
                .with_prompt("Kumo Cloud e-mail")
                .interact_text()
                .map_err(CliError::prompt)?;
            let password = rpassword::prompt_password("Password: ").map_err(CliError::prompt)?;
            if username.is_empty() || password.is_empty() {
                return Err(CliError::Validation {
                    field: "credentials".into(),
                    reason: "e-mail and password cannot be empty".into(),
                });
            }

            // 3. Site (requires a successful login)
            let site_id = choose_site(&username, &password).await?;

            // 4. Password storage
            let store_choices = &[
                "Store password in system keyring (recommended)",
                "Save to config file (plaintext)",
            ];
            let store_selection = Select::new()
                .with_prompt("Where to store the password?")
                .items(store_choices)
                .default(0)
                .interact()
                .map_err(CliError::prompt)?;

            let password_field = if store_selection == 0 {
                kumo_config::store_password(&profile_name, &password)?;
                eprintln!("   ✓ Password stored in system keyring");
                None
            } else {
                Some(password)
            };

            // 5. Merge into the existing config
            let profile = cfg.profiles.remove(&profile_name).unwrap_or_default();
            cfg.profiles.insert(
                profile_name.clone(),
                Profile {
                    username: Some(username),
                    password: password_field,
                    site_id: Some(site_id),
                    ..profile
                },
            );
            if cfg.default_profile.is_none() || cfg.profiles.len() == 1 {
                cfg.default_profile = Some(profile_name.clone());
            }
            save(&cfg, global)?;

            eprintln!("\n✓ Configuration written to {}", path.display());
            eprintln!("  Profile: {profile_name}");
            eprintln!("\n  Test it: kumo devices list");
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let mut cfg = config::load(global)?;
            for profile in cfg.profiles.values_mut() {
                if profile.password.is_some() {
                    profile.password = Some(REDACTED.into());
                }
            }
            let out = output::render_single(
                global.output,
                &cfg,
                |c| toml::to_string_pretty(c).unwrap_or_default(),
                |c| c.default_profile.clone().unwrap_or_default(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Profiles ────────────────────────────────────────────────
        ConfigCommand::Profiles => {
            let cfg = config::load(global)?;
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: kumo config init");
            } else {
                let mut names: Vec<&String> = cfg.profiles.keys().collect();
                names.sort_unstable();
                for name in names {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }

        // ── Use <name> ─────────────────────────────────────────────
        ConfigCommand::Use { name } => {
            let mut cfg = config::load(global)?;
            if !cfg.profiles.contains_key(&name) {
                return Err(profile_not_found(name, &cfg));
            }
            cfg.default_profile = Some(name.clone());
            save(&cfg, global)?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }

        // ── SetPassword ─────────────────────────────────────────────
        ConfigCommand::SetPassword { profile } => {
            let cfg = config::load(global)?;
            let profile_name = profile.unwrap_or_else(|| config::active_profile_name(global, &cfg));
            if !cfg.profiles.contains_key(&profile_name) {
                return Err(profile_not_found(profile_name, &cfg));
            }

            let password = rpassword::prompt_password(format!("Password for '{profile_name}': "))
                .map_err(CliError::prompt)?;
            if password.is_empty() {
                return Err(CliError::Validation {
                    field: "password".into(),
                    reason: "password cannot be empty".into(),
                });
            }
            kumo_config::store_password(&profile_name, &password)?;
            eprintln!("✓ Password stored in system keyring for profile '{profile_name}'");
            Ok(())
        }
    }
}
