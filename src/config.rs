//! Configuration management for statsyncing

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fields::Fields;
use crate::importers::ImporterConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Local collection settings
    pub collection: CollectionConfig,

    /// Synchronization settings
    pub sync: SyncSettings,

    /// Other players' libraries
    pub importers: Vec<ImporterConfig>,
}

/// General application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Data directory (default: ~/.local/share/statsyncing)
    pub data_dir: Option<PathBuf>,
}

/// Local collection store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// DuckDB file (default: <data_dir>/collection.duckdb)
    pub path: Option<PathBuf>,
}

/// Matching and state settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Identity fields tracks are matched on
    pub match_fields: Vec<String>,

    /// Provider list, checked fields and excluded labels
    /// (default: ~/.config/statsyncing/statsyncing.toml)
    pub state_path: Option<PathBuf>,
}

// Default implementations

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            data_dir: None,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            match_fields: Fields::IDENTITY
                .names()
                .into_iter()
                .map(String::from)
                .collect(),
            state_path: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::config("Could not determine config directory"))?;
        Ok(config_dir.join("statsyncing"))
    }

    /// Get the data directory
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.general.data_dir {
            Ok(dir.clone())
        } else {
            let data_dir = dirs::data_local_dir()
                .ok_or_else(|| Error::config("Could not determine data directory"))?;
            Ok(data_dir.join("statsyncing"))
        }
    }

    /// Get the local collection path
    pub fn collection_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.collection.path {
            return Ok(path.clone());
        }
        Ok(self.data_dir()?.join("collection.duckdb"))
    }

    /// Get the synchronization state path
    pub fn state_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.sync.state_path {
            return Ok(path.clone());
        }
        Ok(Self::config_dir()?.join("statsyncing.toml"))
    }

    /// Parsed `sync.match_fields`
    pub fn match_fields(&self) -> Result<Fields> {
        Fields::parse_names(&self.sync.match_fields)
    }

    /// Give every importer a stable uid. Returns whether any was added, in
    /// which case the configuration should be saved.
    pub fn ensure_importer_uids(&mut self) -> bool {
        self.importers
            .iter_mut()
            .fold(false, |changed, importer| importer.ensure_uid() || changed)
    }

    /// Validate configuration values.
    ///
    /// Call this after loading to ensure all values are within acceptable ranges.
    pub fn validate(&self) -> Result<()> {
        // Validate log_level is a known level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.to_lowercase().as_str()) {
            return Err(Error::config(format!(
                "log_level must be one of {:?}, got '{}'",
                valid_levels, self.general.log_level
            )));
        }

        // Matching needs at least title and artist
        let fields = self.match_fields()?;
        if !Fields::IDENTITY.contains(fields) {
            return Err(Error::config(format!(
                "match_fields may only name identity fields, got '{fields}'"
            )));
        }
        if !fields.contains(Fields::TITLE | Fields::ARTIST) {
            return Err(Error::config("match_fields must include title and artist"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importers::ImporterKind;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.match_fields().unwrap(), Fields::IDENTITY);
        assert!(config.importers.is_empty());
    }

    #[test]
    fn test_match_fields_need_title_and_artist() {
        let mut config = Config::default();
        config.sync.match_fields = vec!["title".into(), "album".into()];
        assert!(config.validate().is_err());

        config.sync.match_fields = vec!["title".into(), "artist".into(), "rating".into()];
        assert!(config.validate().is_err());

        config.sync.match_fields = vec!["title".into(), "artist".into(), "bogus".into()];
        assert!(config.validate().is_err());

        config.sync.match_fields = vec!["Title".into(), "artist".into()];
        config.validate().unwrap();
    }

    #[test]
    fn test_bad_log_level() {
        let mut config = Config::default();
        config.general.log_level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_with_importers() {
        let config: Config = toml::from_str(
            r#"
[general]
log_level = "debug"

[collection]
path = "/tmp/collection.duckdb"

[sync]
match_fields = ["title", "artist", "album"]

[[importers]]
type = "banshee"
name = "Laptop Banshee"
dbPath = "~/.config/banshee-1/banshee.db"

[[importers]]
type = "fastforward"
dbDriver = "QSQLITE"
dbPath = "/tmp/collection.db"
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(
            config.collection_path().unwrap(),
            PathBuf::from("/tmp/collection.duckdb")
        );
        assert_eq!(config.importers.len(), 2);
        assert_eq!(config.importers[0].kind, ImporterKind::Banshee);
        assert_eq!(config.importers[1].kind, ImporterKind::FastForward);
    }

    #[test]
    fn test_ensure_importer_uids_and_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.importers.push(ImporterConfig::new(ImporterKind::Rhythmbox));
        config
            .importers
            .push(ImporterConfig::new(ImporterKind::ITunes).with("uid", "fixed"));

        assert!(config.ensure_importer_uids());
        assert!(!config.ensure_importer_uids());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.importers[1].uid(), Some("fixed"));
    }
}
