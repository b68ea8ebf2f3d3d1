//! Connection profiles stored in `config.toml`
//!
//! ```toml
//! default_profile = "prod"
//! manifest_dir = "~/lab/manifests"
//!
//! [profiles.prod]
//! host_url = "https://elab.example.org"
//! api_key = "3-abcdef"
//! verify_ssl = true
//! timeout_secs = 30
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

/// Profile used when neither the command line nor the config names one
pub const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,
    /// Manifest directory used when `--manifests` is not given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_dir: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub host_url: String,
    pub api_key: String,
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_verify_ssl() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

impl Profile {
    pub fn new(host_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            host_url: host_url.into(),
            api_key: api_key.into(),
            verify_ssl: default_verify_ssl(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn client_config(&self) -> elabapi::ClientConfig {
        elabapi::ClientConfig {
            verify_ssl: self.verify_ssl,
            timeout: Duration::from_secs(self.timeout_secs),
            ..elabapi::ClientConfig::new(&self.host_url, &self.api_key)
        }
    }
}

/// Values given on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub profile: Option<String>,
    pub host_url: Option<String>,
    pub api_key: Option<String>,
}

impl Config {
    /// Load the config file, or an empty config when there is none
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config file at {}", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = paths::config_file()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Could not create {}", dir.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Could not serialize config")?;
        fs::write(path, content).with_context(|| format!("Could not write {}", path.display()))
    }

    /// Name of the profile in effect
    pub fn profile_name<'a>(&'a self, overrides: &'a Overrides) -> &'a str {
        overrides
            .profile
            .as_deref()
            .or(self.default_profile.as_deref())
            .unwrap_or(DEFAULT_PROFILE)
    }

    /// Profile in effect, with host and key overrides applied.
    ///
    /// Both overrides together stand in for a missing profile.
    pub fn resolve(&self, overrides: &Overrides) -> Result<Profile> {
        let name = self.profile_name(overrides);
        let mut profile = match (self.profiles.get(name), &overrides.host_url, &overrides.api_key) {
            (Some(profile), _, _) => profile.clone(),
            (None, Some(host), Some(key)) => Profile::new(host, key),
            (None, _, _) => bail!(
                "Profile '{name}' not found; create it with 'elabctl config set {name} --url <URL> --key <KEY>'"
            ),
        };
        if let Some(host) = &overrides.host_url {
            profile.host_url.clone_from(host);
        }
        if let Some(key) = &overrides.api_key {
            profile.api_key.clone_from(key);
        }
        Ok(profile)
    }

    /// Manifest directory from the config, expanded
    pub fn manifest_dir(&self) -> Option<PathBuf> {
        self.manifest_dir.as_deref().map(paths::expand)
    }
}

/// Mask all but the last four characters of an API key
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{visible}", "*".repeat(chars.len() - 4))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> Config {
        let mut config = Config {
            default_profile: Some("prod".into()),
            ..Config::default()
        };
        config
            .profiles
            .insert("prod".into(), Profile::new("https://elab.example.org", "3-secret"));
        config
            .profiles
            .insert("test".into(), Profile::new("https://test.example.org", "4-other"));
        config
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        config().save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn test_defaults_when_omitted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[profiles.default]\nhost_url = \"http://localhost\"\napi_key = \"k\"\n",
        )
        .unwrap();
        let profile = &Config::load_from(&path).unwrap().profiles["default"];
        assert!(profile.verify_ssl);
        assert_eq!(profile.timeout_secs, 30);
    }

    #[test]
    fn test_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "profiles = 3").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_resolve_profiles() {
        let config = config();
        let profile = config.resolve(&Overrides::default()).unwrap();
        assert_eq!(profile.host_url, "https://elab.example.org");

        let overrides = Overrides {
            profile: Some("test".into()),
            api_key: Some("override".into()),
            ..Overrides::default()
        };
        let profile = config.resolve(&overrides).unwrap();
        assert_eq!(profile.host_url, "https://test.example.org");
        assert_eq!(profile.api_key, "override");

        let missing = Overrides {
            profile: Some("nope".into()),
            ..Overrides::default()
        };
        assert!(config.resolve(&missing).is_err());
    }

    #[test]
    fn test_resolve_from_environment_only() {
        let overrides = Overrides {
            host_url: Some("https://env.example.org".into()),
            api_key: Some("5-env".into()),
            ..Overrides::default()
        };
        let profile = Config::default().resolve(&overrides).unwrap();
        assert_eq!(profile.api_key, "5-env");
        assert_eq!(profile.client_config().api_base(), "https://env.example.org/api/v2");
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("3-abcdef"), "****cdef");
        assert_eq!(mask_key("abc"), "***");
    }
}
