//! Persisted synchronization settings.
//!
//! Remembers every provider that was ever registered (so that its enabled
//! state survives restarts), which statistics fields are synchronized and
//! which labels are left alone. Stored as TOML in a `statSyncing` table of
//! parallel arrays:
//!
//! ```toml
//! [statSyncing]
//! providerIds = ["localCollection", "8d3c..."]
//! providerNames = ["Local Collection", "Banshee"]
//! providerIcons = ["drive-harddisk", "media-player-banshee"]
//! providerEnabledStatuses = [true, false]
//! checkedFields = ["rating", "lastPlayed", "playCount"]
//! excludedLabels = ["favourite"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::fields::Fields;
use crate::track::Labels;

/// What is remembered about one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderData {
    pub name: String,
    pub icon: String,
    /// Currently registered. Never persisted.
    pub online: bool,
    pub enabled: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredFile {
    #[serde(rename = "statSyncing", default)]
    group: StoredGroup,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StoredGroup {
    provider_ids: Vec<String>,
    provider_names: Vec<String>,
    provider_icons: Vec<String>,
    provider_enabled_statuses: Vec<bool>,
    /// Absent means the defaults; an empty list means nothing is checked.
    #[serde(skip_serializing_if = "Option::is_none")]
    checked_fields: Option<Vec<String>>,
    excluded_labels: Vec<String>,
}

/// Synchronization settings with change tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    path: Option<PathBuf>,
    providers: BTreeMap<String, ProviderData>,
    checked_fields: Fields,
    excluded_labels: Labels,
    dirty: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            path: None,
            providers: BTreeMap::new(),
            checked_fields: Fields::STATISTICS,
            excluded_labels: Labels::new(),
            dirty: false,
        }
    }
}

impl SyncConfig {
    /// An empty configuration that lives only in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Read the configuration at `path`; a missing file gives the defaults.
    /// Every provider starts out offline.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self {
            path: Some(path.to_path_buf()),
            ..Self::default()
        };
        if !path.exists() {
            debug!(path = %path.display(), "No synchronization settings yet");
            return Ok(config);
        }
        let contents = std::fs::read_to_string(path)?;
        let stored: StoredFile = toml::from_str(&contents)?;
        config.read(stored.group);
        Ok(config)
    }

    fn read(&mut self, group: StoredGroup) {
        let lengths = [
            group.provider_ids.len(),
            group.provider_names.len(),
            group.provider_icons.len(),
            group.provider_enabled_statuses.len(),
        ];
        let count = lengths.iter().copied().min().unwrap_or(0);
        if lengths.iter().any(|&len| len != count) {
            warn!(
                ?lengths,
                kept = count,
                "Provider lists in synchronization settings differ in length, truncating"
            );
        }

        self.providers = group
            .provider_ids
            .into_iter()
            .zip(group.provider_names)
            .zip(group.provider_icons)
            .zip(group.provider_enabled_statuses)
            .take(count)
            .map(|(((id, name), icon), enabled)| {
                (
                    id,
                    ProviderData {
                        name,
                        icon,
                        online: false,
                        enabled,
                    },
                )
            })
            .collect();

        if let Some(names) = group.checked_fields {
            self.checked_fields = Fields::NONE;
            for name in &names {
                match Fields::from_symbolic_name(name) {
                    Some(field) if Fields::STATISTICS.contains(field) => {
                        self.checked_fields |= field;
                    }
                    _ => warn!(field = %name, "Ignoring unknown field in synchronization settings"),
                }
            }
        }
        self.excluded_labels = group.excluded_labels.into_iter().collect();
        self.dirty = false;
    }

    /// Write the configuration back if it changed since the last load or save.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let contents = toml::to_string_pretty(&self.stored())?;
            std::fs::write(path, contents)?;
            debug!(path = %path.display(), "Saved synchronization settings");
        }
        self.dirty = false;
        Ok(())
    }

    fn stored(&self) -> StoredFile {
        let mut group = StoredGroup {
            checked_fields: Some(
                self.checked_fields
                    .names()
                    .into_iter()
                    .map(String::from)
                    .collect(),
            ),
            excluded_labels: self.excluded_labels.iter().cloned().collect(),
            ..StoredGroup::default()
        };
        for (id, data) in &self.providers {
            group.provider_ids.push(id.clone());
            group.provider_names.push(data.name.clone());
            group.provider_icons.push(data.icon.clone());
            group.provider_enabled_statuses.push(data.enabled);
        }
        StoredFile { group }
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ------------------------------------------------------------------------
    // Providers
    // ------------------------------------------------------------------------

    pub fn providers(&self) -> impl Iterator<Item = (&str, &ProviderData)> {
        self.providers.iter().map(|(id, data)| (id.as_str(), data))
    }

    #[must_use]
    pub fn provider(&self, id: &str) -> Option<&ProviderData> {
        self.providers.get(id)
    }

    #[must_use]
    pub fn provider_known(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    /// Stored enabled state, or `default` for an unknown provider.
    #[must_use]
    pub fn provider_enabled(&self, id: &str, default: bool) -> bool {
        self.providers.get(id).map_or(default, |data| data.enabled)
    }

    /// Insert or update a provider. `enabled = None` keeps the stored state
    /// (disabled for a new provider).
    pub fn update_provider(
        &mut self,
        id: &str,
        name: &str,
        icon: &str,
        online: bool,
        enabled: Option<bool>,
    ) {
        let previous = self.providers.get(id);
        let data = ProviderData {
            name: name.to_string(),
            icon: icon.to_string(),
            online,
            enabled: enabled.unwrap_or_else(|| previous.is_some_and(|p| p.enabled)),
        };
        if previous != Some(&data) {
            self.providers.insert(id.to_string(), data);
            self.dirty = true;
        }
    }

    /// Mark a known provider online or offline.
    pub fn set_provider_online(&mut self, id: &str, online: bool) {
        if let Some(data) = self.providers.get_mut(id) {
            data.online = online;
        }
    }

    /// Enable or disable a known provider. Returns whether it is known.
    pub fn set_provider_enabled(&mut self, id: &str, enabled: bool) -> bool {
        let Some(data) = self.providers.get_mut(id) else {
            return false;
        };
        if data.enabled != enabled {
            data.enabled = enabled;
            self.dirty = true;
        }
        true
    }

    /// Drop a provider that is not currently registered.
    pub fn forget_provider(&mut self, id: &str) -> Result<()> {
        match self.providers.get(id) {
            Some(data) if data.online => Err(Error::ProviderOnline(id.to_string())),
            Some(_) => {
                self.providers.remove(id);
                self.dirty = true;
                Ok(())
            }
            None => Err(Error::config(format!("unknown provider '{id}'"))),
        }
    }

    // ------------------------------------------------------------------------
    // Fields and labels
    // ------------------------------------------------------------------------

    #[must_use]
    pub const fn checked_fields(&self) -> Fields {
        self.checked_fields
    }

    /// Only statistics fields can be checked; others are dropped.
    pub fn set_checked_fields(&mut self, fields: Fields) {
        let fields = fields & Fields::STATISTICS;
        if fields != self.checked_fields {
            self.checked_fields = fields;
            self.dirty = true;
        }
    }

    #[must_use]
    pub const fn excluded_labels(&self) -> &Labels {
        &self.excluded_labels
    }

    pub fn set_excluded_labels(&mut self, labels: Labels) {
        if labels != self.excluded_labels {
            self.excluded_labels = labels;
            self.dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn labels(names: &[&str]) -> Labels {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    #[test]
    fn test_update_provider_keeps_enabled_state() {
        let mut config = SyncConfig::in_memory();
        config.update_provider("a", "A", "icon", true, None);
        assert!(config.provider_known("a"));
        assert!(!config.provider_enabled("a", true));
        assert!(config.provider_enabled("b", true));

        assert!(config.set_provider_enabled("a", true));
        config.update_provider("a", "A renamed", "icon", false, None);
        assert!(config.provider_enabled("a", false));
        assert_eq!(config.provider("a").unwrap().name, "A renamed");
        assert!(!config.set_provider_enabled("missing", true));
    }

    #[test]
    fn test_forget_online_provider_fails() {
        let mut config = SyncConfig::in_memory();
        config.update_provider("a", "A", "icon", true, Some(true));

        assert!(matches!(config.forget_provider("a"), Err(Error::ProviderOnline(_))));
        assert!(config.provider_known("a"));

        config.set_provider_online("a", false);
        config.forget_provider("a").unwrap();
        assert!(!config.provider_known("a"));
        assert!(config.forget_provider("a").is_err());
    }

    #[test]
    fn test_changes_mark_dirty() {
        let mut config = SyncConfig::in_memory();
        assert!(!config.is_dirty());
        config.set_checked_fields(Fields::STATISTICS);
        assert!(!config.is_dirty());
        config.set_checked_fields(Fields::RATING | Fields::TITLE);
        assert!(config.is_dirty());
        assert_eq!(config.checked_fields(), Fields::RATING);
        config.save().unwrap();
        assert!(!config.is_dirty());

        config.set_excluded_labels(labels(&["favourite"]));
        assert!(config.is_dirty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("statsyncing.toml");

        let mut config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.checked_fields(), Fields::STATISTICS);
        config.update_provider("localCollection", "Local Collection", "drive-harddisk", true, Some(true));
        config.update_provider("b", "Banshee", "media-player-banshee", true, Some(false));
        config.set_checked_fields(Fields::RATING | Fields::PLAY_COUNT);
        config.set_excluded_labels(labels(&["favourite", "todo"]));
        config.save().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("[statSyncing]"));
        assert!(text.contains("providerEnabledStatuses"));

        let loaded = SyncConfig::load(&path).unwrap();
        assert_eq!(loaded.checked_fields(), Fields::RATING | Fields::PLAY_COUNT);
        assert_eq!(loaded.excluded_labels(), &labels(&["favourite", "todo"]));
        assert!(loaded.provider_enabled("localCollection", false));
        assert!(!loaded.provider_enabled("b", true));
        assert!(loaded.providers().all(|(_, data)| !data.online));
        assert!(!loaded.is_dirty());
    }

    #[test]
    fn test_load_truncates_mismatched_lists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("statsyncing.toml");
        std::fs::write(
            &path,
            r#"
[statSyncing]
providerIds = ["a", "b", "c"]
providerNames = ["A", "B"]
providerIcons = ["ia", "ib", "ic"]
providerEnabledStatuses = [true, true, true]
checkedFields = ["rating", "bogus", "title", "labels"]
"#,
        )
        .unwrap();

        let config = SyncConfig::load(&path).unwrap();
        let ids: Vec<&str> = config.providers().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(config.checked_fields(), Fields::RATING | Fields::LABELS);
    }

    #[test]
    fn test_empty_checked_fields_stay_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("statsyncing.toml");
        std::fs::write(&path, "[statSyncing]\ncheckedFields = []\n").unwrap();
        let config = SyncConfig::load(&path).unwrap();
        assert!(config.checked_fields().is_empty());
    }
}
