//! Per-guild settings.
//!
//! Each guild's settings live in `<settings_dir>/<guild>.json`. Files are
//! read the first time a guild is seen and written back only through
//! [`SettingsStore::update`].

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Settings errors.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The guild id cannot be used as a file name.
    #[error("Invalid guild id '{0}'")]
    InvalidGuild(String),

    /// Reading or writing the settings file failed.
    #[error("Settings I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON.
    #[error("Corrupt settings for guild '{guild}': {source}")]
    Corrupt {
        guild: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A guild's settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSettings {
    /// Command prefix.
    pub prefix: String,

    /// Custom commands by name.
    #[serde(default)]
    pub commands: BTreeMap<String, CustomCommand>,
}

impl GuildSettings {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            commands: BTreeMap::new(),
        }
    }

    /// Settings as seen by scripts.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// A custom command registered in a guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomCommand {
    #[serde(flatten)]
    pub kind: CommandKind,

    /// User who added the command.
    pub creator: String,
}

/// What a custom command does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CommandKind {
    /// Reply with fixed text. `%user` is replaced by a mention of the issuer.
    Text { text: String },
    /// Run the script at `url`.
    Script { url: String },
}

/// Lazily loaded settings for every guild.
#[derive(Debug)]
pub struct SettingsStore {
    dir: PathBuf,
    default_prefix: String,
    guilds: DashMap<String, Arc<Mutex<GuildSettings>>>,
}

impl SettingsStore {
    pub fn new(dir: impl Into<PathBuf>, default_prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            default_prefix: default_prefix.into(),
            guilds: DashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot of a guild's settings.
    ///
    /// Guilds without a settings file get the default prefix and no
    /// commands.
    pub async fn get(&self, guild: &str) -> Result<GuildSettings, SettingsError> {
        let slot = self.slot(guild).await?;
        let settings = slot.lock().await;
        Ok(settings.clone())
    }

    /// Apply `f` to a guild's settings and persist the result.
    ///
    /// Updates to the same guild are serialized.
    pub async fn update<F, R>(&self, guild: &str, f: F) -> Result<R, SettingsError>
    where
        F: FnOnce(&mut GuildSettings) -> R,
    {
        let slot = self.slot(guild).await?;
        let mut settings = slot.lock().await;
        let result = f(&mut settings);
        self.write(guild, &settings).await?;
        Ok(result)
    }

    /// Number of guilds loaded so far.
    pub fn loaded(&self) -> usize {
        self.guilds.len()
    }

    async fn slot(&self, guild: &str) -> Result<Arc<Mutex<GuildSettings>>, SettingsError> {
        validate_guild(guild)?;

        if let Some(slot) = self.guilds.get(guild) {
            return Ok(Arc::clone(slot.value()));
        }

        let loaded = self.read(guild).await?;
        // A concurrent first load may have won the race; keep its copy
        let slot = self
            .guilds
            .entry(guild.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(loaded)));
        Ok(Arc::clone(slot.value()))
    }

    async fn read(&self, guild: &str) -> Result<GuildSettings, SettingsError> {
        let path = self.path(guild);
        match tokio::fs::read(&path).await {
            Ok(raw) => {
                debug!(guild, "Guild settings loaded");
                serde_json::from_slice(&raw).map_err(|source| SettingsError::Corrupt {
                    guild: guild.to_string(),
                    source,
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Ok(GuildSettings::with_prefix(self.default_prefix.clone()))
            }
            Err(source) => Err(SettingsError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    async fn write(&self, guild: &str, settings: &GuildSettings) -> Result<(), SettingsError> {
        let io_error = |path: &Path, source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(self.dir.as_path(), e))?;

        let body = serde_json::to_vec_pretty(settings).map_err(|source| SettingsError::Corrupt {
            guild: guild.to_string(),
            source,
        })?;
        let path = self.path(guild);
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| io_error(path.as_path(), e))?;

        info!(guild, commands = settings.commands.len(), "Guild settings saved");
        Ok(())
    }

    fn path(&self, guild: &str) -> PathBuf {
        self.dir.join(format!("{guild}.json"))
    }
}

fn validate_guild(guild: &str) -> Result<(), SettingsError> {
    let valid = !guild.is_empty()
        && guild.len() <= 64
        && guild
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SettingsError::InvalidGuild(guild.to_string()))
    }
}
