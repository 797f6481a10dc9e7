//! Persistent configuration for settlers-chat.
//!
//! Config file lives at `~/.config/settlers-chat/cli.toml`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde::Deserialize;
use settlers_chat_sdk::Region;

/// Region used when neither the flags nor the config file name one.
pub const DEFAULT_REGION: Region = Region::Europe;

/// User configuration, read from cli.toml.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Ubisoft account email.
    pub email: Option<String>,
    /// Account password. Prefer the environment variable over storing it here.
    pub password: Option<String>,
    /// Region name, e.g. "EUROPE" or "russia".
    pub region: Option<String>,
    /// Skip realm probing and use this realm number.
    pub realm: Option<String>,
    /// Rooms to join on start.
    pub channels: Option<Vec<String>>,
    /// Alternative region table (TOML).
    pub regions_file: Option<PathBuf>,
    /// Print events as JSON lines.
    pub json: Option<bool>,
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("settlers-chat")
}

pub fn default_path() -> PathBuf {
    config_dir().join("cli.toml")
}

impl Config {
    /// A missing file is an empty config; an unreadable one is only a warning.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(s) => match toml::from_str(&s) {
                    Ok(c) => return c,
                    Err(e) => eprintln!("Warning: bad config file {}: {e}", path.display()),
                },
                Err(e) => eprintln!("Warning: can't read {}: {e}", path.display()),
            }
        }
        Self::default()
    }
}

/// Effective settings after merging CLI flags > config file > defaults.
pub struct Resolved {
    pub email: String,
    pub password: String,
    pub region: Region,
    pub realm: Option<String>,
    pub channels: Vec<String>,
    pub regions_file: Option<PathBuf>,
    pub json: bool,
}

impl Resolved {
    pub fn merge(cli: &super::Args, config: &Config) -> Result<Self> {
        let Some(email) = cli.email.clone().or_else(|| config.email.clone()) else {
            bail!("no email given: pass --email or set it in the config file");
        };
        let Some(password) = cli.password.clone().or_else(|| config.password.clone()) else {
            bail!("no password given: pass --password or set SETTLERS_CHAT_PASSWORD");
        };

        let region = match cli.region.as_deref().or(config.region.as_deref()) {
            Some(name) => name.parse()?,
            None => DEFAULT_REGION,
        };

        let realm = cli.realm.clone().or_else(|| config.realm.clone());

        // Channels: CLI > config > none
        let channels = if let Some(ref ch) = cli.channels {
            split_channels(ch)
        } else {
            config.channels.clone().unwrap_or_default()
        };

        let regions_file = cli.regions_file.clone().or_else(|| config.regions_file.clone());
        let json = cli.json || config.json.unwrap_or(false);

        Ok(Self {
            email,
            password,
            region,
            realm,
            channels,
            regions_file,
            json,
        })
    }
}

fn split_channels(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
