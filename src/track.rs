//! Provider-agnostic track view: identity metadata plus staged statistics.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fields::Fields;
use crate::types::{PlayCount, Rating};

/// Labels of one track; ordered, case sensitive.
pub type Labels = BTreeSet<String>;

/// Identity fields of a track. Empty strings and zeros mean unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub composer: String,
    pub year: i32,
    pub track_number: i32,
    pub disc_number: i32,
}

impl TrackMetadata {
    #[must_use]
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            ..Self::default()
        }
        .trimmed()
    }

    #[must_use]
    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = album.into().trim().to_string();
        self
    }

    #[must_use]
    pub fn with_composer(mut self, composer: impl Into<String>) -> Self {
        self.composer = composer.into().trim().to_string();
        self
    }

    #[must_use]
    pub const fn with_year(mut self, year: i32) -> Self {
        self.year = year;
        self
    }

    #[must_use]
    pub const fn with_track_number(mut self, track_number: i32) -> Self {
        self.track_number = track_number;
        self
    }

    #[must_use]
    pub const fn with_disc_number(mut self, disc_number: i32) -> Self {
        self.disc_number = disc_number;
        self
    }

    /// Strip surrounding whitespace from every text field and clamp negative
    /// numbers (unset sentinels in some databases) to zero.
    #[must_use]
    pub fn trimmed(mut self) -> Self {
        for text in [
            &mut self.title,
            &mut self.artist,
            &mut self.album,
            &mut self.composer,
        ] {
            let trimmed = text.trim();
            if trimmed.len() != text.len() {
                *text = trimmed.to_string();
            }
        }
        self.year = self.year.max(0);
        self.track_number = self.track_number.max(0);
        self.disc_number = self.disc_number.max(0);
        self
    }

    /// Compare the identity fields selected by `fields`: text case-insensitively
    /// after trimming, numbers exactly.
    #[must_use]
    pub fn equals(&self, other: &Self, fields: Fields) -> bool {
        self.compare(other, fields) == Ordering::Equal
    }

    /// Deterministic total order on the projection selected by `fields`.
    #[must_use]
    pub fn compare(&self, other: &Self, fields: Fields) -> Ordering {
        let text = |field: Fields, a: &str, b: &str| {
            if fields.contains(field) {
                normalize(a).cmp(&normalize(b))
            } else {
                Ordering::Equal
            }
        };
        let number = |field: Fields, a: i32, b: i32| {
            if fields.contains(field) {
                a.cmp(&b)
            } else {
                Ordering::Equal
            }
        };

        text(Fields::TITLE, &self.title, &other.title)
            .then_with(|| text(Fields::ARTIST, &self.artist, &other.artist))
            .then_with(|| text(Fields::ALBUM, &self.album, &other.album))
            .then_with(|| text(Fields::COMPOSER, &self.composer, &other.composer))
            .then_with(|| number(Fields::YEAR, self.year, other.year))
            .then_with(|| number(Fields::TRACK_NUMBER, self.track_number, other.track_number))
            .then_with(|| number(Fields::DISC_NUMBER, self.disc_number, other.disc_number))
    }
}

/// Normalized form used for case-insensitive comparisons.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Stored statistics of a track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackStatistics {
    pub first_played: Option<DateTime<Utc>>,
    pub last_played: Option<DateTime<Utc>>,
    pub rating: Rating,
    pub play_count: PlayCount,
    pub labels: Labels,
}

impl TrackStatistics {
    /// Fold staged changes into these statistics.
    pub fn apply(&mut self, changes: &StatisticsChanges) {
        if let Some(first_played) = changes.first_played {
            self.first_played = first_played;
        }
        if let Some(last_played) = changes.last_played {
            self.last_played = last_played;
        }
        if let Some(rating) = changes.rating {
            self.rating = rating;
        }
        if let Some(play_count) = changes.play_count {
            self.play_count = play_count;
        }
        if let Some(labels) = &changes.labels {
            self.labels.clone_from(labels);
        }
    }
}

/// Statistics changes staged on a track but not yet committed.
///
/// For the timestamps the outer `Option` says whether the field was set; the
/// inner one carries the new (possibly cleared) value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatisticsChanges {
    pub first_played: Option<Option<DateTime<Utc>>>,
    pub last_played: Option<Option<DateTime<Utc>>>,
    pub rating: Option<Rating>,
    pub play_count: Option<PlayCount>,
    pub labels: Option<Labels>,
}

impl StatisticsChanges {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.first_played.is_none()
            && self.last_played.is_none()
            && self.rating.is_none()
            && self.play_count.is_none()
            && self.labels.is_none()
    }

    /// The statistics fields touched by these changes.
    #[must_use]
    pub const fn fields(&self) -> Fields {
        let mut bits = 0;
        if self.first_played.is_some() {
            bits |= Fields::FIRST_PLAYED.bits();
        }
        if self.last_played.is_some() {
            bits |= Fields::LAST_PLAYED.bits();
        }
        if self.rating.is_some() {
            bits |= Fields::RATING.bits();
        }
        if self.play_count.is_some() {
            bits |= Fields::PLAY_COUNT.bits();
        }
        if self.labels.is_some() {
            bits |= Fields::LABELS.bits();
        }
        Fields::from_bits_truncate(bits)
    }
}

/// One track as seen by a provider.
///
/// Setters only stage a change; [`Track::commit`] persists every staged change
/// of the track at once. Getters return the staged value when there is one.
pub trait Track: Send + Sync {
    fn metadata(&self) -> &TrackMetadata;

    fn first_played(&self) -> Option<DateTime<Utc>>;
    fn last_played(&self) -> Option<DateTime<Utc>>;
    fn rating(&self) -> Rating;
    fn play_count(&self) -> PlayCount;
    fn labels(&self) -> Labels;

    /// Plays since the last device sync, already included in `play_count`.
    fn recent_play_count(&self) -> PlayCount {
        PlayCount::default()
    }

    fn set_first_played(&self, value: Option<DateTime<Utc>>);
    fn set_last_played(&self, value: Option<DateTime<Utc>>);
    fn set_rating(&self, value: Rating);
    fn set_play_count(&self, value: PlayCount);
    fn set_labels(&self, value: Labels);

    fn has_pending_changes(&self) -> bool;

    /// Persist all staged changes. On failure they stay staged.
    fn commit(&self) -> Result<()>;

    fn title(&self) -> &str {
        &self.metadata().title
    }

    fn artist(&self) -> &str {
        &self.metadata().artist
    }

    fn album(&self) -> &str {
        &self.metadata().album
    }

    /// Current statistics including staged changes.
    fn statistics(&self) -> TrackStatistics {
        TrackStatistics {
            first_played: self.first_played(),
            last_played: self.last_played(),
            rating: self.rating(),
            play_count: self.play_count(),
            labels: self.labels(),
        }
    }

    /// Short human-readable description for reports and logs.
    fn describe(&self) -> String {
        let meta = self.metadata();
        if meta.album.is_empty() {
            format!("{} - {}", meta.artist, meta.title)
        } else {
            format!("{} - {} ({})", meta.artist, meta.title, meta.album)
        }
    }

    /// Compare the fields selected by `fields`. Identity text fields are
    /// compared case-insensitively after trimming; everything else exactly.
    fn equals(&self, other: &dyn Track, fields: Fields) -> bool {
        if !self.metadata().equals(other.metadata(), fields) {
            return false;
        }
        (!fields.contains(Fields::FIRST_PLAYED) || self.first_played() == other.first_played())
            && (!fields.contains(Fields::LAST_PLAYED) || self.last_played() == other.last_played())
            && (!fields.contains(Fields::RATING) || self.rating() == other.rating())
            && (!fields.contains(Fields::PLAY_COUNT) || self.play_count() == other.play_count())
            && (!fields.contains(Fields::LABELS) || self.labels() == other.labels())
    }

    /// Deterministic ordering on the identity fields selected by `fields`.
    fn less_than(&self, other: &dyn Track, fields: Fields) -> bool {
        self.metadata().compare(other.metadata(), fields) == Ordering::Less
    }
}

/// Storage side of a [`SimpleWritableTrack`].
pub trait TrackBackend: Send + Sync {
    /// Write `changes` for the track identified by `metadata` (and whatever
    /// key the backend keeps itself). `previous` holds the stored values.
    fn commit(
        &self,
        metadata: &TrackMetadata,
        previous: &TrackStatistics,
        changes: &StatisticsChanges,
    ) -> Result<()>;
}

#[derive(Debug, Default)]
struct TrackState {
    statistics: TrackStatistics,
    changes: StatisticsChanges,
}

/// A [`Track`] with in-memory statistics whose commits go through a backend.
///
/// Concurrent readers are fine; a commit takes the write lock for its whole
/// duration.
#[derive(Debug)]
pub struct SimpleWritableTrack<B> {
    metadata: TrackMetadata,
    recent_play_count: PlayCount,
    backend: B,
    state: RwLock<TrackState>,
}

impl<B: TrackBackend> SimpleWritableTrack<B> {
    pub fn new(metadata: TrackMetadata, statistics: TrackStatistics, backend: B) -> Self {
        Self {
            metadata: metadata.trimmed(),
            recent_play_count: PlayCount::default(),
            backend,
            state: RwLock::new(TrackState {
                statistics,
                changes: StatisticsChanges::default(),
            }),
        }
    }

    #[must_use]
    pub const fn with_recent_play_count(mut self, recent: PlayCount) -> Self {
        self.recent_play_count = recent;
        self
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Staged changes, for inspection.
    pub fn pending_changes(&self) -> StatisticsChanges {
        self.read().changes.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: TrackBackend> Track for SimpleWritableTrack<B> {
    fn metadata(&self) -> &TrackMetadata {
        &self.metadata
    }

    fn first_played(&self) -> Option<DateTime<Utc>> {
        let state = self.read();
        state
            .changes
            .first_played
            .unwrap_or(state.statistics.first_played)
    }

    fn last_played(&self) -> Option<DateTime<Utc>> {
        let state = self.read();
        state
            .changes
            .last_played
            .unwrap_or(state.statistics.last_played)
    }

    fn rating(&self) -> Rating {
        let state = self.read();
        state.changes.rating.unwrap_or(state.statistics.rating)
    }

    fn play_count(&self) -> PlayCount {
        let state = self.read();
        state.changes.play_count.unwrap_or(state.statistics.play_count)
    }

    fn labels(&self) -> Labels {
        let state = self.read();
        state
            .changes
            .labels
            .clone()
            .unwrap_or_else(|| state.statistics.labels.clone())
    }

    fn recent_play_count(&self) -> PlayCount {
        self.recent_play_count
    }

    fn set_first_played(&self, value: Option<DateTime<Utc>>) {
        self.write().changes.first_played = Some(value);
    }

    fn set_last_played(&self, value: Option<DateTime<Utc>>) {
        self.write().changes.last_played = Some(value);
    }

    fn set_rating(&self, value: Rating) {
        self.write().changes.rating = Some(value);
    }

    fn set_play_count(&self, value: PlayCount) {
        self.write().changes.play_count = Some(value);
    }

    fn set_labels(&self, value: Labels) {
        self.write().changes.labels = Some(value);
    }

    fn has_pending_changes(&self) -> bool {
        !self.read().changes.is_empty()
    }

    fn commit(&self) -> Result<()> {
        let mut state = self.write();
        if state.changes.is_empty() {
            return Ok(());
        }
        self.backend
            .commit(&self.metadata, &state.statistics, &state.changes)?;
        let changes = std::mem::take(&mut state.changes);
        state.statistics.apply(&changes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        fail: bool,
        commits: Mutex<Vec<StatisticsChanges>>,
    }

    impl TrackBackend for RecordingBackend {
        fn commit(
            &self,
            _metadata: &TrackMetadata,
            _previous: &TrackStatistics,
            changes: &StatisticsChanges,
        ) -> Result<()> {
            if self.fail {
                return Err(Error::commit("disk full"));
            }
            self.commits
                .lock()
                .unwrap()
                .push(changes.clone());
            Ok(())
        }
    }

    fn track(fail: bool) -> SimpleWritableTrack<RecordingBackend> {
        let statistics = TrackStatistics {
            rating: Rating::new(6),
            play_count: PlayCount::new(3),
            ..TrackStatistics::default()
        };
        SimpleWritableTrack::new(
            TrackMetadata::new("Aerodynamic", "Daft Punk"),
            statistics,
            RecordingBackend {
                fail,
                ..RecordingBackend::default()
            },
        )
    }

    #[test]
    fn test_metadata_is_trimmed() {
        let meta = TrackMetadata::new("  One ", "Metallica\t").with_album(" ...And Justice for All ");
        assert_eq!(meta.title, "One");
        assert_eq!(meta.artist, "Metallica");
        assert_eq!(meta.album, "...And Justice for All");
    }

    #[test]
    fn test_equals_is_case_insensitive_and_masked() {
        let a = TrackMetadata::new("Aerodynamic", "Daft Punk").with_year(2001);
        let b = TrackMetadata::new("AERODYNAMIC ", "daft punk").with_year(2000);

        let mask = Fields::TITLE | Fields::ARTIST;
        assert!(a.equals(&b, mask));
        assert!(b.equals(&a, mask));
        assert!(!a.equals(&b, mask | Fields::YEAR));
        assert!(!b.equals(&a, mask | Fields::YEAR));
    }

    #[test]
    fn test_equals_ignores_fields_outside_mask() {
        let a = TrackMetadata::new("One", "Metallica").with_album("A").with_track_number(4);
        let b = TrackMetadata::new("Two", "Metallica").with_album("B").with_track_number(4);
        assert!(a.equals(&b, Fields::ARTIST | Fields::TRACK_NUMBER));
        assert!(a.equals(&b, Fields::NONE));
        assert!(!a.equals(&b, Fields::TITLE));
    }

    #[test]
    fn test_compare_is_total_order_on_projection() {
        let a = TrackMetadata::new("a", "x");
        let b = TrackMetadata::new("B", "x");
        assert_eq!(a.compare(&b, Fields::IDENTITY), Ordering::Less);
        assert_eq!(b.compare(&a, Fields::IDENTITY), Ordering::Greater);
        assert_eq!(a.compare(&a, Fields::IDENTITY), Ordering::Equal);
    }

    #[test]
    fn test_setters_stage_until_commit() {
        let track = track(false);
        assert!(!track.has_pending_changes());

        track.set_rating(Rating::new(8));
        assert_eq!(track.rating(), Rating::new(8));
        assert!(track.has_pending_changes());
        assert_eq!(track.pending_changes().fields(), Fields::RATING);

        track.commit().unwrap();
        assert!(!track.has_pending_changes());
        assert_eq!(track.rating(), Rating::new(8));
        assert_eq!(track.backend().commits.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_commit_without_changes_skips_backend() {
        let track = track(false);
        track.commit().unwrap();
        assert!(track.backend().commits.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failed_commit_keeps_changes() {
        let track = track(true);
        track.set_play_count(PlayCount::new(10));
        assert!(track.commit().is_err());
        assert!(track.has_pending_changes());
        assert_eq!(track.play_count(), PlayCount::new(10));
    }

    #[test]
    fn test_clearing_timestamp_is_a_change() {
        let track = track(false);
        track.set_last_played(None);
        assert!(track.has_pending_changes());
        assert_eq!(track.pending_changes().fields(), Fields::LAST_PLAYED);
    }

    #[test]
    fn test_track_equals_covers_statistics() {
        let a = track(false);
        let b = track(false);
        assert!(a.equals(&b, Fields::ALL));
        b.set_rating(Rating::new(2));
        assert!(!a.equals(&b, Fields::RATING));
        assert!(!b.equals(&a, Fields::RATING));
        assert!(a.equals(&b, Fields::IDENTITY));
    }

    #[test]
    fn test_describe() {
        let track = track(false);
        assert_eq!(track.describe(), "Daft Punk - Aerodynamic");
    }
}
