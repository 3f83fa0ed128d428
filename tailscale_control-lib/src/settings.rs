use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_PATH: &str = "/data/conf/tailscale-control.toml";
pub const ENV_VAR: &str = "TAILSCALE_CONTROL_SETTINGS_PATH";

/// Persisted string fields are bounded like their settings-store ancestors.
pub const MAX_STRING_LEN: usize = 255;

/// The mutable configuration surface.
///
/// Owned by the GUI / the user through the settings file; the control loop
/// reads it every tick and writes back only the machine name. String
/// fields are free-form and sanitized at their point of use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Whether the connection should be up at all.
    pub enabled: bool,
    /// Machine name advertised to the mesh; auto-derived from the system
    /// name until the user customizes it.
    pub hostname: String,
    /// Free-form comma-separated list of additional networks to advertise.
    pub advertise_routes: String,
    /// Custom coordination server, for self-hosted setups.
    pub custom_server_url: String,
    /// Free-form extra flags passed to the client's `up`/`login` calls.
    pub custom_arguments: String,
    /// Local devices whose networks may be advertised to the mesh.
    pub interfaces: BTreeMap<String, bool>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Deserialization error: {0}")]
    TomlDeserialization(#[from] toml::de::Error),
}

/// File-backed settings store. Reads happen at startup and on watcher
/// reloads; writes persist immediately so they survive a restart.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    settings: Settings,
}

impl Store {
    /// A missing file is a fresh installation and yields defaults; a
    /// malformed file is an error the caller must surface.
    pub fn load(path: &Path) -> Result<Store, Error> {
        let settings = read(path)?;
        Ok(Store {
            path: path.to_path_buf(),
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Re-read the file; on failure the previous values stay in effect.
    pub fn reload(&mut self) {
        match read(&self.path) {
            Ok(settings) => {
                if settings != self.settings {
                    tracing::info!("settings reloaded");
                    self.settings = settings;
                }
            }
            Err(e) => {
                tracing::warn!(error = ?e, "failed to reload settings, keeping previous values");
            }
        }
    }

    pub fn set_hostname(&mut self, name: &str) {
        let name = bounded(name);
        if self.settings.hostname == name {
            return;
        }
        self.settings.hostname = name;
        self.persist();
    }

    pub fn set_custom_server_url(&mut self, url: &str) {
        let url = bounded(url);
        if self.settings.custom_server_url == url {
            return;
        }
        self.settings.custom_server_url = url;
        self.persist();
    }

    fn persist(&self) {
        let content = match toml::to_string_pretty(&self.settings) {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize settings");
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                tracing::error!(error = %e, "failed to create settings directory");
                return;
            }
        }
        if let Err(e) = fs::write(&self.path, content) {
            tracing::error!(error = %e, path = %self.path.display(), "failed to persist settings");
        }
    }
}

fn read(path: &Path) -> Result<Settings, Error> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
        Err(e) => return Err(e.into()),
    };
    let mut settings: Settings = toml::from_str(&content)?;
    settings.hostname = bounded(&settings.hostname);
    settings.advertise_routes = bounded(&settings.advertise_routes);
    settings.custom_server_url = bounded(&settings.custom_server_url);
    settings.custom_arguments = bounded(&settings.custom_arguments);
    Ok(settings)
}

fn bounded(value: &str) -> String {
    value.chars().take(MAX_STRING_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = Store::load(&dir.path().join("settings.toml"))?;
        assert_eq!(store.settings(), &Settings::default());
        Ok(())
    }

    #[test]
    fn malformed_file_is_an_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.toml");
        fs::write(&path, "enabled = \"not a bool")?;
        Store::load(&path).expect_err("malformed settings should not load");
        Ok(())
    }

    #[test]
    fn hostname_write_back_round_trips() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.toml");
        let mut store = Store::load(&path)?;
        store.set_hostname("my-boat");

        let reread = Store::load(&path)?;
        assert_eq!(reread.settings().hostname, "my-boat");
        Ok(())
    }

    #[test]
    fn over_long_strings_are_bounded_on_load() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.toml");
        let long = "a".repeat(400);
        fs::write(&path, format!("hostname = \"{long}\""))?;

        let store = Store::load(&path)?;
        assert_eq!(store.settings().hostname.len(), MAX_STRING_LEN);
        Ok(())
    }

    #[test]
    fn reload_keeps_previous_values_on_parse_failure() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.toml");
        fs::write(&path, "enabled = true")?;
        let mut store = Store::load(&path)?;
        assert!(store.settings().enabled);

        fs::write(&path, "enabled = {{")?;
        store.reload();
        assert!(store.settings().enabled);
        Ok(())
    }

    #[test]
    fn reload_picks_up_external_changes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.toml");
        fs::write(&path, "enabled = false")?;
        let mut store = Store::load(&path)?;

        fs::write(&path, "enabled = true\nhostname = \"gx\"")?;
        store.reload();
        assert!(store.settings().enabled);
        assert_eq!(store.settings().hostname, "gx");
        Ok(())
    }
}
