use anyhow::{Context as _, Result, bail};

use crate::Context;
use crate::cli::ConfigCommand;
use crate::config::{Config, Profile, mask_key};
use crate::{paths, ui};

/// Changes requested by `config set`
#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub url: Option<String>,
    pub key: Option<String>,
    pub insecure: bool,
    pub timeout: Option<u64>,
    pub default: bool,
}

pub fn run(ctx: &Context, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => show(ctx),
        ConfigCommand::Set {
            name,
            url,
            key,
            insecure,
            timeout,
            default,
        } => {
            let update = ProfileUpdate {
                url,
                key,
                insecure,
                timeout,
                default,
            };
            set(&name, update)
        }
        ConfigCommand::Delete { name } => delete(&name),
        ConfigCommand::Path => {
            println!("{}", paths::config_file()?.display());
            Ok(())
        }
    }
}

fn show(ctx: &Context) -> Result<()> {
    let path = paths::config_file()?;
    let config = Config::load_from(&path)?;

    ui::header("Configuration");
    ui::kv("Config file", &path.display().to_string());
    if let Some(dir) = config.manifest_dir() {
        ui::kv("Manifest dir", &dir.display().to_string());
    }
    println!();

    if config.profiles.is_empty() {
        ui::dim("No profiles. Create one with 'elabctl config set <NAME> --url <URL> --key <KEY>'");
        return Ok(());
    }

    let active = config.profile_name(&ctx.overrides);
    for (name, profile) in &config.profiles {
        if name == active {
            ui::info(&format!("{name} (active)"));
        } else {
            ui::info(name);
        }
        ui::kv("url", &profile.host_url);
        ui::kv("key", &mask_key(&profile.api_key));
        if !profile.verify_ssl {
            ui::kv("verify_ssl", "false");
        }
        ui::kv("timeout", &format!("{}s", profile.timeout_secs));
    }
    Ok(())
}

/// Create or update profile `name` in `config`
pub fn apply_update(config: &mut Config, name: &str, update: ProfileUpdate) -> Result<()> {
    let mut profile = match (config.profiles.get(name), &update.url, &update.key) {
        (Some(existing), _, _) => existing.clone(),
        (None, Some(url), Some(key)) => Profile::new(url, key),
        (None, _, _) => bail!("A new profile needs both --url and --key"),
    };

    if let Some(url) = update.url {
        profile.host_url = url.trim_end_matches('/').to_string();
    }
    if let Some(key) = update.key {
        profile.api_key = key;
    }
    if update.insecure {
        profile.verify_ssl = false;
    }
    if let Some(timeout) = update.timeout {
        profile.timeout_secs = timeout;
    }
    elabapi::Client::new(&profile.client_config())
        .with_context(|| format!("Invalid profile '{name}'"))?;

    config.profiles.insert(name.to_string(), profile);
    if update.default || config.default_profile.is_none() {
        config.default_profile = Some(name.to_string());
    }
    Ok(())
}

fn set(name: &str, update: ProfileUpdate) -> Result<()> {
    let mut config = Config::load()?;
    apply_update(&mut config, name, update)?;
    let path = config.save()?;
    ui::success(&format!("Saved profile '{name}' to {}", path.display()));
    Ok(())
}

fn delete(name: &str) -> Result<()> {
    let mut config = Config::load()?;
    if config.profiles.remove(name).is_none() {
        bail!("Profile '{name}' not found");
    }
    if config.default_profile.as_deref() == Some(name) {
        config.default_profile = None;
    }
    config.save()?;
    ui::success(&format!("Deleted profile '{name}'"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_profile() -> ProfileUpdate {
        ProfileUpdate {
            url: Some("https://elab.example.org/".into()),
            key: Some("3-secret".into()),
            ..ProfileUpdate::default()
        }
    }

    #[test]
    fn test_first_profile_becomes_default() {
        let mut config = Config::default();
        apply_update(&mut config, "prod", new_profile()).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("prod"));
        assert_eq!(config.profiles["prod"].host_url, "https://elab.example.org");

        apply_update(&mut config, "test", new_profile()).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("prod"));
    }

    #[test]
    fn test_update_existing_profile() {
        let mut config = Config::default();
        apply_update(&mut config, "prod", new_profile()).unwrap();
        let update = ProfileUpdate {
            insecure: true,
            timeout: Some(5),
            default: true,
            ..ProfileUpdate::default()
        };
        apply_update(&mut config, "prod", update).unwrap();

        let profile = &config.profiles["prod"];
        assert!(!profile.verify_ssl);
        assert_eq!(profile.timeout_secs, 5);
        assert_eq!(profile.api_key, "3-secret");
    }

    #[test]
    fn test_new_profile_needs_url_and_key() {
        let mut config = Config::default();
        let update = ProfileUpdate {
            url: Some("https://elab.example.org".into()),
            ..ProfileUpdate::default()
        };
        assert!(apply_update(&mut config, "prod", update).is_err());
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let mut config = Config::default();
        let update = ProfileUpdate {
            url: Some("elab.example.org".into()),
            key: Some("k".into()),
            ..ProfileUpdate::default()
        };
        assert!(apply_update(&mut config, "prod", update).is_err());
    }
}
