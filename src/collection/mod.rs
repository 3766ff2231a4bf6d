//! Local collection backed by DuckDB
//!
//! The player's own collection: every identity field is trusted for matching
//! and every statistics field can be written. It takes part in
//! synchronization unless the user opts out.

mod queries;
mod schema;

pub use queries::StoredTrack;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::{DuckDbBackend, SqlConnection};
use crate::error::Result;
use crate::fields::Fields;
use crate::provider::{AbortToken, Preference, Provider, TrackPtr};
use crate::track::{
    SimpleWritableTrack, StatisticsChanges, TrackBackend, TrackMetadata, TrackStatistics,
};

/// Persistence id of the local collection.
pub const COLLECTION_ID: &str = "localCollection";

type Connection = SqlConnection<DuckDbBackend>;

/// The local collection as a statistics provider.
pub struct LocalCollection {
    conn: Arc<Connection>,
    abort: AbortToken,
}

impl LocalCollection {
    /// Open (and create if needed) a collection store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::with_backend(DuckDbBackend::open_path(path))
    }

    /// A throwaway in-memory collection.
    pub fn in_memory() -> Result<Self> {
        Self::with_backend(DuckDbBackend::in_memory())
    }

    fn with_backend(backend: DuckDbBackend) -> Result<Self> {
        let conn = SqlConnection::new("collection", backend)?;
        conn.query(|db| schema::init_schema(db))?;
        Ok(Self {
            conn: Arc::new(conn),
            abort: AbortToken::new(),
        })
    }

    /// Add a track to the collection, returning its id.
    pub fn add_track(
        &self,
        url: &str,
        metadata: &TrackMetadata,
        statistics: &TrackStatistics,
    ) -> Result<i64> {
        let url = url.to_string();
        let metadata = metadata.clone().trimmed();
        let statistics = statistics.clone();
        self.conn.run_in_transaction(|conn| {
            conn.query(move |db| queries::insert_track(db, &url, &metadata, &statistics))
        })
    }

    /// Get total track count
    pub fn track_count(&self) -> Result<i64> {
        self.conn.query(|db| queries::track_count(db))
    }

    /// Stored tracks of one artist, without going through the provider layer.
    pub fn stored_tracks(&self, artist: &str) -> Result<Vec<StoredTrack>> {
        let artist = artist.trim().to_string();
        let abort = self.abort.clone();
        self.conn
            .query(move |db| queries::artist_tracks(db, &artist, &abort))
    }
}

impl Provider for LocalCollection {
    fn id(&self) -> String {
        COLLECTION_ID.to_string()
    }

    fn pretty_name(&self) -> String {
        "Local Collection".to_string()
    }

    fn description(&self) -> String {
        "Tracks of the local music collection".to_string()
    }

    fn icon(&self) -> String {
        "drive-harddisk".to_string()
    }

    fn default_preference(&self) -> Preference {
        Preference::YesByDefault
    }

    fn reliable_track_metadata(&self) -> Fields {
        Fields::IDENTITY
    }

    fn writable_track_stats_data(&self) -> Fields {
        Fields::STATISTICS
    }

    fn artists(&self) -> BTreeSet<String> {
        self.abort.reset();
        self.conn.query(|db| queries::artists(db)).unwrap_or_else(|e| {
            warn!(provider = COLLECTION_ID, error = %e, "Failed to list artists");
            BTreeSet::new()
        })
    }

    fn artist_tracks(&self, artist: &str) -> Vec<TrackPtr> {
        match self.stored_tracks(artist) {
            Ok(stored) => {
                debug!(artist, count = stored.len(), "Fetched collection tracks");
                stored
                    .into_iter()
                    .map(|track| {
                        let backend = CollectionTrackBackend {
                            conn: Arc::clone(&self.conn),
                            id: track.id,
                        };
                        Arc::new(SimpleWritableTrack::new(
                            track.metadata,
                            track.statistics,
                            backend,
                        )) as TrackPtr
                    })
                    .collect()
            }
            Err(e) => {
                warn!(provider = COLLECTION_ID, artist, error = %e, "Failed to fetch tracks");
                Vec::new()
            }
        }
    }

    fn abort(&self) {
        self.abort.abort();
    }
}

/// Writes one collection track's statistics.
struct CollectionTrackBackend {
    conn: Arc<Connection>,
    id: i64,
}

impl TrackBackend for CollectionTrackBackend {
    fn commit(
        &self,
        _metadata: &TrackMetadata,
        _previous: &TrackStatistics,
        changes: &StatisticsChanges,
    ) -> Result<()> {
        let id = self.id;
        let changes = changes.clone();
        self.conn.run_in_transaction(|conn| {
            conn.query(move |db| queries::update_statistics(db, id, &changes))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlayCount, Rating};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn statistics(rating: i64, play_count: i64, labels: &[&str]) -> TrackStatistics {
        TrackStatistics {
            rating: Rating::new(rating),
            play_count: PlayCount::new(play_count),
            labels: labels.iter().map(|l| (*l).to_string()).collect(),
            ..TrackStatistics::default()
        }
    }

    #[test]
    fn test_capabilities() {
        let collection = LocalCollection::in_memory().unwrap();
        assert_eq!(collection.id(), "localCollection");
        assert_eq!(collection.default_preference(), Preference::YesByDefault);
        assert_eq!(collection.reliable_track_metadata(), Fields::IDENTITY);
        assert_eq!(collection.writable_track_stats_data(), Fields::STATISTICS);
    }

    #[test]
    fn test_artists_are_trimmed_and_distinct() {
        let collection = LocalCollection::in_memory().unwrap();
        let stats = TrackStatistics::default();
        collection
            .add_track("file:///a.mp3", &TrackMetadata::new("One", "Metallica"), &stats)
            .unwrap();
        collection
            .add_track("file:///b.mp3", &TrackMetadata::new("Two", " Metallica "), &stats)
            .unwrap();
        collection
            .add_track("file:///c.mp3", &TrackMetadata::new("Around", "Daft Punk"), &stats)
            .unwrap();

        let artists: Vec<String> = collection.artists().into_iter().collect();
        assert_eq!(artists, vec!["Daft Punk", "Metallica"]);
        assert_eq!(collection.track_count().unwrap(), 3);
    }

    #[test]
    fn test_unknown_artist_yields_nothing() {
        let collection = LocalCollection::in_memory().unwrap();
        assert!(collection.artist_tracks("Nobody").is_empty());
    }

    #[test]
    fn test_artist_tracks_is_case_sensitive() {
        let collection = LocalCollection::in_memory().unwrap();
        collection
            .add_track(
                "file:///a.mp3",
                &TrackMetadata::new("One", "Metallica"),
                &TrackStatistics::default(),
            )
            .unwrap();
        assert_eq!(collection.artist_tracks("Metallica").len(), 1);
        assert!(collection.artist_tracks("metallica").is_empty());
    }

    #[test]
    fn test_commit_roundtrip() {
        let dir = TempDir::new().unwrap();
        let collection = LocalCollection::open(&dir.path().join("collection.duckdb")).unwrap();
        collection
            .add_track(
                "file:///aerodynamic.flac",
                &TrackMetadata::new("Aerodynamic", "Daft Punk").with_album("Discovery"),
                &statistics(6, 3, &["electronic"]),
            )
            .unwrap();

        let tracks = collection.artist_tracks("Daft Punk");
        assert_eq!(tracks.len(), 1);
        let track = &tracks[0];
        assert_eq!(track.rating(), Rating::new(6));
        assert_eq!(track.labels().len(), 1);

        let played = Utc.with_ymd_and_hms(2013, 9, 2, 12, 43, 0).unwrap();
        track.set_rating(Rating::new(8));
        track.set_play_count(PlayCount::new(7));
        track.set_last_played(Some(played));
        track.set_labels(["electronic", "french"].iter().map(|l| (*l).to_string()).collect());
        track.commit().unwrap();

        let reread = collection.artist_tracks("Daft Punk");
        let track = &reread[0];
        assert_eq!(track.rating(), Rating::new(8));
        assert_eq!(track.play_count(), PlayCount::new(7));
        assert_eq!(track.last_played(), Some(played));
        assert_eq!(track.first_played(), None);
        assert_eq!(track.labels().len(), 2);
        assert_eq!(track.metadata().album, "Discovery");
    }
}
