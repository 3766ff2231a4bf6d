//! In-memory provider for exercising the synchronization core.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::fields::Fields;
use crate::provider::{Preference, Provider, ProviderPtr, TrackPtr};
use crate::track::{
    SimpleWritableTrack, StatisticsChanges, TrackBackend, TrackMetadata, TrackStatistics,
};
use crate::types::{PlayCount, Rating, RatingScale};

struct Row {
    metadata: TrackMetadata,
    statistics: TrackStatistics,
    recent: PlayCount,
}

#[derive(Default)]
struct Store {
    rows: Mutex<Vec<Row>>,
    fail_commits: AtomicBool,
    fail_flushes: AtomicBool,
    whole_stars: AtomicBool,
    commits: AtomicUsize,
    flushes: AtomicUsize,
}

impl Store {
    fn scale(&self) -> RatingScale {
        if self.whole_stars.load(Ordering::SeqCst) {
            RatingScale::Stars
        } else {
            RatingScale::HalfStars
        }
    }
}

pub struct MemoryProvider {
    id: String,
    reliable: Fields,
    writable: Fields,
    preference: Preference,
    store: Arc<Store>,
}

impl MemoryProvider {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            reliable: Fields::IDENTITY,
            writable: Fields::STATISTICS,
            preference: Preference::NoByDefault,
            store: Arc::default(),
        }
    }

    pub fn reliable(mut self, fields: Fields) -> Self {
        self.reliable = fields;
        self
    }

    pub fn writable(mut self, fields: Fields) -> Self {
        self.writable = fields;
        self
    }

    pub fn preference(mut self, preference: Preference) -> Self {
        self.preference = preference;
        self
    }

    /// Store ratings in whole stars, like Banshee or Rhythmbox.
    pub fn whole_stars(self) -> Self {
        self.store.whole_stars.store(true, Ordering::SeqCst);
        self
    }

    pub fn track(self, metadata: TrackMetadata, statistics: TrackStatistics) -> Self {
        self.track_with_recent(metadata, statistics, PlayCount::default())
    }

    pub fn track_with_recent(
        self,
        metadata: TrackMetadata,
        statistics: TrackStatistics,
        recent: PlayCount,
    ) -> Self {
        self.store.rows.lock().unwrap().push(Row {
            metadata: metadata.trimmed(),
            statistics,
            recent,
        });
        self
    }

    pub fn into_ptr(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn fail_commits(&self) {
        self.store.fail_commits.store(true, Ordering::SeqCst);
    }

    pub fn fail_flushes(&self) {
        self.store.fail_flushes.store(true, Ordering::SeqCst);
    }

    /// Track commits that reached the store.
    pub fn commits(&self) -> usize {
        self.store.commits.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.store.flushes.load(Ordering::SeqCst)
    }

    /// Stored statistics of the track titled `title`.
    pub fn stored(&self, title: &str) -> TrackStatistics {
        self.store
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.metadata.title == title)
            .map(|row| row.statistics.clone())
            .unwrap()
    }
}

impl Provider for MemoryProvider {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn pretty_name(&self) -> String {
        format!("Memory {}", self.id)
    }

    fn default_preference(&self) -> Preference {
        self.preference
    }

    fn reliable_track_metadata(&self) -> Fields {
        self.reliable
    }

    fn writable_track_stats_data(&self) -> Fields {
        self.writable
    }

    fn rating_scale(&self) -> RatingScale {
        self.store.scale()
    }

    fn artists(&self) -> BTreeSet<String> {
        self.store
            .rows
            .lock()
            .unwrap()
            .iter()
            .map(|row| row.metadata.artist.clone())
            .collect()
    }

    fn artist_tracks(&self, artist: &str) -> Vec<TrackPtr> {
        let rows = self.store.rows.lock().unwrap();
        rows.iter()
            .enumerate()
            .filter(|(_, row)| row.metadata.artist == artist)
            .map(|(index, row)| {
                let backend = MemoryBackend {
                    store: Arc::clone(&self.store),
                    index,
                };
                Arc::new(
                    SimpleWritableTrack::new(row.metadata.clone(), row.statistics.clone(), backend)
                        .with_recent_play_count(row.recent),
                ) as TrackPtr
            })
            .collect()
    }

    fn commit_tracks(&self) -> Result<()> {
        if self.store.fail_flushes.load(Ordering::SeqCst) {
            return Err(Error::commit("injected flush failure"));
        }
        self.store.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryBackend {
    store: Arc<Store>,
    index: usize,
}

impl TrackBackend for MemoryBackend {
    fn commit(
        &self,
        _metadata: &TrackMetadata,
        _previous: &TrackStatistics,
        changes: &StatisticsChanges,
    ) -> Result<()> {
        if self.store.fail_commits.load(Ordering::SeqCst) {
            return Err(Error::commit("injected failure"));
        }
        let scale = self.store.scale();
        let statistics = &mut self.store.rows.lock().unwrap()[self.index].statistics;
        statistics.apply(changes);
        statistics.rating = scale.quantize(statistics.rating);
        self.store.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn ptr(provider: &Arc<MemoryProvider>) -> ProviderPtr {
    Arc::clone(provider) as ProviderPtr
}

pub fn stats(rating: i64, play_count: i64) -> TrackStatistics {
    TrackStatistics {
        rating: Rating::new(rating),
        play_count: PlayCount::new(play_count),
        ..TrackStatistics::default()
    }
}

pub fn labels(names: &[&str]) -> crate::track::Labels {
    names.iter().map(|name| (*name).to_string()).collect()
}
