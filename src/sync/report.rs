//! Outcome of one synchronization run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fields::Fields;
use crate::track::Labels;
use crate::types::Rating;

use super::tuple::{MergePolicy, TrackTuple};

/// A commit that did not go through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitFailure {
    pub provider: String,
    /// `None` when the provider-wide flush failed.
    pub track: Option<String>,
    pub error: String,
}

/// A tuple whose members disagree on rating or labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub track: String,
    pub fields: Vec<String>,
    /// Provider id -> rating on the 0-10 scale.
    pub ratings: BTreeMap<String, u8>,
    pub labels: BTreeMap<String, Labels>,
    /// Provider whose rating wins, when overridden.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating_provider: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub label_providers: Vec<String>,
}

impl Conflict {
    /// Describe the conflicts of `tuple`, if it has any.
    #[must_use]
    pub fn of(tuple: &TrackTuple, policy: &MergePolicy) -> Option<Self> {
        let fields: Vec<String> = policy
            .fields
            .singles()
            .filter(|&field| tuple.field_has_conflict(field, &policy.excluded_labels))
            .filter_map(Fields::name)
            .map(String::from)
            .collect();
        if fields.is_empty() {
            return None;
        }
        let members = tuple.members();
        Some(Self {
            track: tuple.describe(),
            fields,
            ratings: members
                .iter()
                .map(|m| (m.provider_id(), m.track.rating().get()))
                .collect(),
            labels: members
                .iter()
                .map(|m| (m.provider_id(), m.track.labels()))
                .collect(),
            rating_provider: tuple.rating_provider().map(String::from),
            label_providers: tuple.label_providers().iter().cloned().collect(),
        })
    }

    #[must_use]
    pub fn merged_rating(&self) -> Rating {
        self.rating_provider
            .as_ref()
            .and_then(|id| self.ratings.get(id))
            .or_else(|| self.ratings.values().filter(|r| **r > 0).max())
            .map_or(Rating::UNRATED, |r| Rating::new(i64::from(*r)))
    }
}

/// Summary of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub providers: Vec<String>,
    pub fields: Vec<String>,
    /// Artists known to at least two providers.
    pub artists: usize,
    pub tuples: usize,
    pub unique_tracks: usize,
    /// Each entry lists the copies of one ambiguous song.
    pub duplicates: Vec<Vec<String>>,
    pub conflicts: Vec<Conflict>,
    /// Provider id -> tracks written.
    pub updated: BTreeMap<String, usize>,
    pub failures: Vec<CommitFailure>,
    pub aborted: bool,
}

impl SyncReport {
    #[must_use]
    pub fn total_updated(&self) -> usize {
        self.updated.values().sum()
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.aborted
    }

    pub(crate) fn record_updated(&mut self, provider: &str, count: usize) {
        if count > 0 {
            *self.updated.entry(provider.to_string()).or_default() += count;
        }
    }
}
