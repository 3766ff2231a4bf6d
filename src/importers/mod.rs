//! Importers for other players' libraries.
//!
//! Each importer is configured by a flat table of settings (`uid`, `name`,
//! `dbPath`, ...) that is parsed into a typed configuration when the provider
//! is created. Invalid settings are reported as [`Error::Config`]; the caller
//! is expected to log them and go on without that importer.

pub mod banshee;
pub mod clementine;
pub mod fastforward;
pub mod itunes;
pub mod rhythmbox;
pub mod sql;
pub mod xml;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::provider::ProviderPtr;
use crate::track::{TrackMetadata, TrackStatistics};

/// Supported importer kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImporterKind {
    /// Amarok 1.4
    FastForward,
    Banshee,
    Clementine,
    Rhythmbox,
    ITunes,
}

impl ImporterKind {
    #[must_use]
    pub const fn default_name(self) -> &'static str {
        match self {
            Self::FastForward => "Amarok 1.4",
            Self::Banshee => "Banshee",
            Self::Clementine => "Clementine",
            Self::Rhythmbox => "Rhythmbox",
            Self::ITunes => "iTunes",
        }
    }
}

impl fmt::Display for ImporterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_name())
    }
}

/// One `[[importers]]` table of the application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImporterConfig {
    #[serde(rename = "type")]
    pub kind: ImporterKind,

    /// Flat settings; values may be strings, integers or booleans.
    #[serde(flatten)]
    pub settings: BTreeMap<String, toml::Value>,
}

impl ImporterConfig {
    #[must_use]
    pub fn new(kind: ImporterKind) -> Self {
        Self {
            kind,
            settings: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.settings.insert(key.to_string(), value.into());
        self
    }

    /// The configured `uid`, if any.
    #[must_use]
    pub fn uid(&self) -> Option<&str> {
        self.settings
            .get("uid")
            .and_then(toml::Value::as_str)
            .filter(|uid| !uid.trim().is_empty())
    }

    /// Give the importer a fresh `uid` if it has none. Returns whether one
    /// was generated.
    pub fn ensure_uid(&mut self) -> bool {
        if self.uid().is_some() {
            return false;
        }
        self.settings.insert(
            "uid".to_string(),
            toml::Value::String(uuid::Uuid::new_v4().to_string()),
        );
        true
    }
}

/// Name and stable id shared by every importer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImporterIdentity {
    pub uid: String,
    pub name: String,
}

/// Settings stringified for parsing.
#[derive(Debug, Clone, Default)]
pub struct ImporterSettings {
    values: BTreeMap<String, String>,
}

impl ImporterSettings {
    pub fn from_toml(settings: &BTreeMap<String, toml::Value>) -> Result<Self> {
        let mut values = BTreeMap::new();
        for (key, value) in settings {
            let text = match value {
                toml::Value::String(s) => s.clone(),
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                toml::Value::Float(f) => f.to_string(),
                other => {
                    return Err(Error::config(format!(
                        "setting '{key}' has unsupported type {}",
                        other.type_str()
                    )))
                }
            };
            values.insert(key.clone(), text);
        }
        Ok(Self { values })
    }

    /// A trimmed, non-empty setting.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn identity(&self, kind: ImporterKind) -> ImporterIdentity {
        let uid = self.get("uid").map_or_else(
            || {
                let uid = uuid::Uuid::new_v4().to_string();
                warn!(importer = %kind, %uid, "Importer has no uid, using a temporary one");
                uid
            },
            String::from,
        );
        ImporterIdentity {
            uid,
            name: self.get("name").unwrap_or(kind.default_name()).to_string(),
        }
    }

    /// A path setting that must exist on disk. A leading `~/` is expanded.
    pub fn existing_path(&self, key: &str) -> Result<PathBuf> {
        let raw = self
            .get(key)
            .ok_or_else(|| Error::config(format!("'{key}' is required")))?;
        let path = expand_home(raw);
        if !path.exists() {
            return Err(Error::config(format!(
                "'{key}' points to {} which does not exist",
                path.display()
            )));
        }
        Ok(path)
    }

    /// `dbPort`, which must lie in 1-65535 when given.
    pub fn port(&self) -> Result<Option<u16>> {
        let Some(raw) = self.get("dbPort") else {
            return Ok(None);
        };
        let port: i64 = raw
            .parse()
            .map_err(|_| Error::config(format!("dbPort '{raw}' is not a number")))?;
        u16::try_from(port)
            .ok()
            .filter(|p| *p > 0)
            .map(Some)
            .ok_or_else(|| Error::config(format!("dbPort {port} is out of range 1-65535")))
    }

    /// A humantime duration such as `30s`, or `default` when unset.
    pub fn duration(&self, key: &str, default: Duration) -> Result<Duration> {
        self.get(key).map_or(Ok(default), |raw| {
            humantime::parse_duration(raw)
                .map_err(|e| Error::config(format!("'{key}' is not a duration: {e}")))
        })
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

/// A track read by an importer, with the key to write it back.
#[derive(Debug, Clone)]
pub struct ImportedTrack<K> {
    pub key: K,
    pub metadata: TrackMetadata,
    pub statistics: TrackStatistics,
}

/// Create the provider for one importer configuration.
pub fn create_provider(config: &ImporterConfig) -> Result<ProviderPtr> {
    let settings = ImporterSettings::from_toml(&config.settings)?;
    let provider: ProviderPtr = match config.kind {
        ImporterKind::FastForward => {
            fastforward::create(fastforward::FastForwardConfig::parse(&settings)?)?
        }
        ImporterKind::Banshee => {
            let config = FileImporterConfig::parse(config.kind, &settings)?;
            Arc::new(banshee::BansheeProvider::new(config)?)
        }
        ImporterKind::Clementine => {
            let config = FileImporterConfig::parse(config.kind, &settings)?;
            Arc::new(clementine::ClementineProvider::new(config)?)
        }
        ImporterKind::Rhythmbox => {
            let config = FileImporterConfig::parse(config.kind, &settings)?;
            Arc::new(rhythmbox::RhythmboxProvider::new(config))
        }
        ImporterKind::ITunes => {
            let config = FileImporterConfig::parse(config.kind, &settings)?;
            Arc::new(itunes::ITunesProvider::new(config))
        }
    };
    Ok(provider)
}

/// Configuration of importers reading a single library file.
#[derive(Debug, Clone)]
pub struct FileImporterConfig {
    pub identity: ImporterIdentity,
    pub db_path: PathBuf,
}

impl FileImporterConfig {
    pub fn parse(kind: ImporterKind, settings: &ImporterSettings) -> Result<Self> {
        Ok(Self {
            identity: settings.identity(kind),
            db_path: settings.existing_path("dbPath")?,
        })
    }
}
