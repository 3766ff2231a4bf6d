//! Generic SQL importer.
//!
//! The provider and track plumbing is shared; an [`SqlSchema`] supplies the
//! queries for one player's database layout and names the [`Backend`] it is
//! read through. All database work runs on the connection's owner thread,
//! and every track commit is one transaction.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{ImportedTrack, ImporterIdentity};
use crate::db::{Backend, SqlConnection, SqliteBackend};
use crate::error::Result;
use crate::fields::Fields;
use crate::provider::{AbortToken, Provider, TrackPtr};
use crate::track::{
    SimpleWritableTrack, StatisticsChanges, TrackBackend, TrackMetadata, TrackStatistics,
};
use crate::types::RatingScale;

pub type SqliteConnection = SqlConnection<SqliteBackend>;

/// Queries and write-back for one database layout.
pub trait SqlSchema: Send + Sync + 'static {
    type Backend: Backend;

    /// Identifies a track row for write-back.
    type Key: Clone + Debug + Send + Sync + 'static;

    fn description(&self) -> &'static str;
    fn icon(&self) -> &'static str;

    fn reliable_track_metadata(&self) -> Fields {
        Fields::IDENTITY
    }

    fn writable_track_stats_data(&self) -> Fields;

    fn rating_scale(&self) -> RatingScale {
        RatingScale::HalfStars
    }

    /// Distinct trimmed artist names.
    fn artists(&self, db: &mut <Self::Backend as Backend>::Handle) -> Result<BTreeSet<String>>;

    /// Tracks whose trimmed artist equals `artist`; stops early once `abort`
    /// is set.
    fn artist_tracks(
        &self,
        db: &mut <Self::Backend as Backend>::Handle,
        artist: &str,
        abort: &AbortToken,
    ) -> Result<Vec<ImportedTrack<Self::Key>>>;

    /// Write staged changes of one track. Runs inside a transaction.
    fn commit(
        &self,
        db: &mut <Self::Backend as Backend>::Handle,
        key: &Self::Key,
        previous: &TrackStatistics,
        changes: &StatisticsChanges,
    ) -> Result<()>;
}

/// A provider over an SQL database described by `S`.
pub struct SqlImporter<S: SqlSchema> {
    identity: ImporterIdentity,
    schema: Arc<S>,
    conn: Arc<SqlConnection<S::Backend>>,
    abort: AbortToken,
}

impl<S: SqlSchema> SqlImporter<S> {
    pub fn from_parts(
        identity: ImporterIdentity,
        schema: S,
        conn: SqlConnection<S::Backend>,
    ) -> Self {
        Self {
            identity,
            schema: Arc::new(schema),
            conn: Arc::new(conn),
            abort: AbortToken::new(),
        }
    }

    #[must_use]
    pub fn identity(&self) -> &ImporterIdentity {
        &self.identity
    }

    fn fetch_tracks(&self, artist: &str) -> Result<Vec<ImportedTrack<S::Key>>> {
        let schema = Arc::clone(&self.schema);
        let abort = self.abort.clone();
        let artist = artist.to_string();
        self.conn
            .query(move |db| schema.artist_tracks(db, &artist, &abort))
    }
}

impl<S: SqlSchema> Provider for SqlImporter<S> {
    fn id(&self) -> String {
        self.identity.uid.clone()
    }

    fn pretty_name(&self) -> String {
        self.identity.name.clone()
    }

    fn description(&self) -> String {
        self.schema.description().to_string()
    }

    fn icon(&self) -> String {
        self.schema.icon().to_string()
    }

    fn reliable_track_metadata(&self) -> Fields {
        self.schema.reliable_track_metadata()
    }

    fn writable_track_stats_data(&self) -> Fields {
        self.schema.writable_track_stats_data()
    }

    fn rating_scale(&self) -> RatingScale {
        self.schema.rating_scale()
    }

    fn artists(&self) -> BTreeSet<String> {
        self.abort.reset();
        let schema = Arc::clone(&self.schema);
        self.conn
            .query(move |db| schema.artists(db))
            .unwrap_or_else(|e| {
                warn!(provider = %self.identity.uid, error = %e, "Failed to list artists");
                BTreeSet::new()
            })
    }

    fn artist_tracks(&self, artist: &str) -> Vec<TrackPtr> {
        let rows = match self.fetch_tracks(artist) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(provider = %self.identity.uid, artist, error = %e, "Failed to fetch tracks");
                return Vec::new();
            }
        };
        debug!(provider = %self.identity.uid, artist, count = rows.len(), "Fetched tracks");

        rows.into_iter()
            .map(|row| {
                let backend = SqlTrackBackend {
                    schema: Arc::clone(&self.schema),
                    conn: Arc::clone(&self.conn),
                    key: row.key,
                };
                Arc::new(SimpleWritableTrack::new(row.metadata, row.statistics, backend))
                    as TrackPtr
            })
            .collect()
    }

    fn abort(&self) {
        self.abort.abort();
    }
}

struct SqlTrackBackend<S: SqlSchema> {
    schema: Arc<S>,
    conn: Arc<SqlConnection<S::Backend>>,
    key: S::Key,
}

impl<S: SqlSchema> TrackBackend for SqlTrackBackend<S> {
    fn commit(
        &self,
        _metadata: &TrackMetadata,
        previous: &TrackStatistics,
        changes: &StatisticsChanges,
    ) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let key = self.key.clone();
        let previous = previous.clone();
        let changes = changes.clone();
        self.conn.run_in_transaction(|conn| {
            conn.query(move |db| schema.commit(db, &key, &previous, &changes))
        })
    }
}
