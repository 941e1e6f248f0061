//! Persistent CLI profile configuration.
//!
//! A profile names the server a device syncs with, the household commands act
//! on by default and the member recorded as author of new entities.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use flatsync_core::util::normalize_text_option;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CONFIG_FILE_NAME: &str = "cli-config.json";
const CONFIG_VERSION: u32 = 1;
const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Error)]
pub enum ProfileConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("Failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Failed to write config at {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("Config version {0} is newer than this build understands")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfilesConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, CliProfile>,
}

impl Default for CliProfilesConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            active_profile: None,
            profiles: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfile {
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Household commands act on when `--household` is not given
    #[serde(default)]
    pub household_id: Option<String>,
    /// Recorded as `created_by` on new entities
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Fields to overwrite on a profile; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub api_base_url: Option<String>,
    pub household_id: Option<String>,
    pub user_id: Option<String>,
}

const fn default_config_version() -> u32 {
    CONFIG_VERSION
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flatsync")
        .join(CONFIG_FILE_NAME)
}

fn normalize_profile_name(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(ToString::to_string)
}

fn normalize_api_base_url(value: Option<String>) -> Option<String> {
    normalize_text_option(value).map(|url| url.trim_end_matches('/').to_string())
}

impl CliProfilesConfig {
    pub fn load() -> Result<Self, ProfileConfigError> {
        Self::load_from_path(&default_config_path())
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ProfileConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ProfileConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let mut config =
            serde_json::from_str::<Self>(&raw).map_err(|source| ProfileConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if config.version > CONFIG_VERSION {
            return Err(ProfileConfigError::UnsupportedVersion(config.version));
        }
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, ProfileConfigError> {
        let path = default_config_path();
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), ProfileConfigError> {
        let write_error = |source| ProfileConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized =
            serde_json::to_string_pretty(&normalized).map_err(|error| write_error(error.into()))?;
        std::fs::write(path, serialized).map_err(write_error)
    }

    /// `--profile`, then `FLATSYNC_PROFILE`, then the active profile.
    pub fn resolve_profile_name(&self, explicit: Option<&str>) -> String {
        normalize_profile_name(explicit)
            .or_else(|| normalize_profile_name(std::env::var("FLATSYNC_PROFILE").ok().as_deref()))
            .or_else(|| normalize_profile_name(self.active_profile.as_deref()))
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string())
    }

    pub fn profile(&self, name: &str) -> Option<&CliProfile> {
        self.profiles.get(name)
    }

    /// Merges `update` into the named profile, creating it when absent.
    pub fn update_profile(&mut self, name: &str, update: ProfileUpdate) -> &CliProfile {
        let profile = self.profiles.entry(name.to_string()).or_default();
        if let Some(url) = normalize_api_base_url(update.api_base_url) {
            profile.api_base_url = Some(url);
        }
        if let Some(household_id) = normalize_text_option(update.household_id) {
            profile.household_id = Some(household_id);
        }
        if let Some(user_id) = normalize_text_option(update.user_id) {
            profile.user_id = Some(user_id);
        }
        profile
    }

    pub fn activate(&mut self, name: &str) {
        self.active_profile = normalize_profile_name(Some(name));
    }

    fn normalize(&mut self) {
        self.active_profile = normalize_profile_name(self.active_profile.as_deref());
        for profile in self.profiles.values_mut() {
            profile.api_base_url = normalize_api_base_url(profile.api_base_url.take());
            profile.household_id = normalize_text_option(profile.household_id.take());
            profile.user_id = normalize_text_option(profile.user_id.take());
        }
    }
}

impl CliProfile {
    pub fn api_base_url(&self) -> Option<String> {
        normalize_api_base_url(self.api_base_url.clone())
    }

    pub fn household_id(&self) -> Option<String> {
        normalize_text_option(self.household_id.clone())
    }

    pub fn user_id(&self) -> Option<String> {
        normalize_text_option(self.user_id.clone())
    }

    /// Names of settings a sync round still needs.
    pub fn missing_sync_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.api_base_url().is_none() {
            missing.push("api_base_url");
        }
        if self.household_id().is_none() {
            missing.push("household_id");
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn household_profile(household_id: &str) -> ProfileUpdate {
        ProfileUpdate {
            household_id: Some(household_id.to_string()),
            ..ProfileUpdate::default()
        }
    }

    #[test]
    fn saved_profiles_load_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = CliProfilesConfig {
            active_profile: Some(" flat-12 ".to_string()),
            ..CliProfilesConfig::default()
        };
        config.profiles.insert(
            "flat-12".to_string(),
            CliProfile {
                api_base_url: Some(" https://api.example.com/ ".to_string()),
                household_id: Some(" h1 ".to_string()),
                user_id: Some("   ".to_string()),
            },
        );

        config.save_to_path(&path).unwrap();
        let loaded = CliProfilesConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.active_profile.as_deref(), Some("flat-12"));
        assert_eq!(
            loaded.profile("flat-12"),
            Some(&CliProfile {
                api_base_url: Some("https://api.example.com".to_string()),
                household_id: Some("h1".to_string()),
                user_id: None,
            })
        );
    }

    #[test]
    fn missing_config_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = CliProfilesConfig::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, CliProfilesConfig::default());
    }

    #[test]
    fn unparseable_config_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{not json").unwrap();

        let error = CliProfilesConfig::load_from_path(&path).unwrap_err();
        assert!(matches!(error, ProfileConfigError::Parse { .. }));
        assert!(error.to_string().contains(CONFIG_FILE_NAME));
    }

    #[test]
    fn newer_config_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"version": 7, "profiles": {}}"#).unwrap();

        let error = CliProfilesConfig::load_from_path(&path).unwrap_err();
        assert!(matches!(error, ProfileConfigError::UnsupportedVersion(7)));
    }

    #[test]
    fn update_profile_keeps_fields_not_mentioned() {
        let mut config = CliProfilesConfig::default();
        config.update_profile(
            "default",
            ProfileUpdate {
                api_base_url: Some("https://api.example.com//".to_string()),
                user_id: Some("u1".to_string()),
                ..ProfileUpdate::default()
            },
        );
        let profile = config.update_profile("default", household_profile("h2"));

        assert_eq!(profile.api_base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(profile.household_id.as_deref(), Some("h2"));
        assert_eq!(profile.user_id.as_deref(), Some("u1"));
        assert!(profile.missing_sync_fields().is_empty());
    }

    #[test]
    fn blank_update_values_do_not_clear_profile() {
        let mut config = CliProfilesConfig::default();
        config.update_profile("default", household_profile("h1"));
        let profile = config.update_profile("default", household_profile("  "));

        assert_eq!(profile.household_id.as_deref(), Some("h1"));
        assert_eq!(profile.missing_sync_fields(), vec!["api_base_url"]);
    }

    #[test]
    fn resolve_profile_name_prefers_explicit_then_active() {
        let mut config = CliProfilesConfig::default();
        config.activate(" work ");
        assert_eq!(config.resolve_profile_name(Some("mobile")), "mobile");
        if std::env::var_os("FLATSYNC_PROFILE").is_none() {
            assert_eq!(config.resolve_profile_name(None), "work");
            assert_eq!(
                CliProfilesConfig::default().resolve_profile_name(None),
                DEFAULT_PROFILE
            );
        }
    }
}
