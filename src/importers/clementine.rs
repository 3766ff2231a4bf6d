//! Clementine importer.
//!
//! Clementine stores everything in a single `songs` table and uses `-1` for
//! unset values. Ratings are fractions between 0 and 1.

use std::collections::BTreeSet;

use rusqlite::params;

use super::sql::{SqlImporter, SqlSchema, SqliteConnection};
use super::{FileImporterConfig, ImportedTrack};
use crate::db::{SqliteBackend, UpdateBuilder};
use crate::error::Result;
use crate::fields::Fields;
use crate::provider::AbortToken;
use crate::track::{StatisticsChanges, TrackMetadata, TrackStatistics};
use crate::types::{timestamp_from_unix, PlayCount, Rating};

/// Marker for unset numbers and timestamps.
const UNSET: i64 = -1;
const UNSET_RATING: f64 = -1.0;

pub type ClementineProvider = SqlImporter<ClementineSchema>;

impl ClementineProvider {
    pub fn new(config: FileImporterConfig) -> Result<Self> {
        let conn = SqliteConnection::new(
            format!("clementine-{}", config.identity.uid),
            SqliteBackend::new(config.db_path),
        )?;
        Ok(SqlImporter::from_parts(config.identity, ClementineSchema, conn))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClementineSchema;

impl SqlSchema for ClementineSchema {
    type Backend = SqliteBackend;

    /// `ROWID` of the song.
    type Key = i64;

    fn description(&self) -> &'static str {
        "Clementine music library"
    }

    fn icon(&self) -> &'static str {
        "clementine"
    }

    fn writable_track_stats_data(&self) -> Fields {
        Fields::RATING | Fields::LAST_PLAYED | Fields::PLAY_COUNT
    }

    fn artists(&self, db: &mut rusqlite::Connection) -> Result<BTreeSet<String>> {
        let mut stmt = db.prepare(
            "SELECT DISTINCT TRIM(artist) FROM songs WHERE artist IS NOT NULL AND TRIM(artist) <> ''",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.map(|r| r.map_err(Into::into)).collect()
    }

    fn artist_tracks(
        &self,
        db: &mut rusqlite::Connection,
        artist: &str,
        abort: &AbortToken,
    ) -> Result<Vec<ImportedTrack<i64>>> {
        let mut stmt = db.prepare(
            r"
            SELECT ROWID, title, artist, album, composer, year, track, disc,
                   rating, lastplayed, playcount
            FROM songs
            WHERE TRIM(artist) = ?1
            ORDER BY ROWID
            ",
        )?;

        let mut rows = stmt.query(params![artist])?;
        let mut tracks = Vec::new();
        while let Some(row) = rows.next()? {
            if abort.is_aborted() {
                break;
            }
            let metadata = TrackMetadata {
                title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                artist: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                album: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                composer: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                year: row.get::<_, Option<i32>>(5)?.unwrap_or_default(),
                track_number: row.get::<_, Option<i32>>(6)?.unwrap_or_default(),
                disc_number: row.get::<_, Option<i32>>(7)?.unwrap_or_default(),
            }
            .trimmed();
            let statistics = TrackStatistics {
                rating: row
                    .get::<_, Option<f64>>(8)?
                    .map_or(Rating::UNRATED, Rating::from_fraction),
                last_played: row.get::<_, Option<i64>>(9)?.and_then(timestamp_from_unix),
                play_count: PlayCount::new(row.get::<_, Option<i64>>(10)?.unwrap_or_default()),
                ..TrackStatistics::default()
            };
            tracks.push(ImportedTrack {
                key: row.get(0)?,
                metadata,
                statistics,
            });
        }
        Ok(tracks)
    }

    fn commit(
        &self,
        db: &mut rusqlite::Connection,
        key: &i64,
        _previous: &TrackStatistics,
        changes: &StatisticsChanges,
    ) -> Result<()> {
        let mut update = UpdateBuilder::new("songs");
        if let Some(rating) = changes.rating {
            update.set("rating", rating.to_fraction().unwrap_or(UNSET_RATING));
        }
        if let Some(last_played) = changes.last_played {
            update.set("lastplayed", last_played.map_or(UNSET, |t| t.timestamp()));
        }
        if let Some(play_count) = changes.play_count {
            update.set("playcount", play_count.get());
        }
        update.filter("ROWID", *key);
        update.execute(db)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importers::ImporterIdentity;
    use crate::provider::Provider;
    use tempfile::TempDir;

    fn fixture(dir: &TempDir) -> ClementineProvider {
        let path = dir.path().join("clementine.db");
        let db = rusqlite::Connection::open(&path).unwrap();
        db.execute_batch(
            r"
            CREATE TABLE songs (
                title TEXT, album TEXT, artist TEXT, composer TEXT, year INTEGER,
                track INTEGER, disc INTEGER, rating REAL, lastplayed INTEGER, playcount INTEGER
            );
            INSERT INTO songs VALUES
                ('Aerodynamic', 'Discovery', 'Daft Punk', '', 2001, 3, -1, 0.6, 1378125780, 4),
                ('Digital Love', 'Discovery', 'Daft Punk', '', 2001, 4, -1, -1, -1, 0),
                ('One', '', 'Metallica', 'Hetfield', -1, -1, -1, 1.0, -1, 9);
            ",
        )
        .unwrap();

        let identity = ImporterIdentity {
            uid: "clementine-test".into(),
            name: "Clementine".into(),
        };
        let conn = SqliteConnection::new("clementine-test", SqliteBackend::new(path)).unwrap();
        SqlImporter::from_parts(identity, ClementineSchema, conn)
    }

    fn stored(dir: &TempDir, column: &str, rowid: i64) -> rusqlite::types::Value {
        let db = rusqlite::Connection::open(dir.path().join("clementine.db")).unwrap();
        db.query_row(
            &format!("SELECT {column} FROM songs WHERE ROWID = ?1"),
            [rowid],
            |r| r.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_unset_values_are_treated_as_empty() {
        let dir = TempDir::new().unwrap();
        let provider = fixture(&dir);

        let tracks = provider.artist_tracks("Daft Punk");
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].rating(), Rating::new(6));
        assert_eq!(tracks[0].last_played(), timestamp_from_unix(1_378_125_780));
        assert_eq!(tracks[0].metadata().disc_number, 0);

        assert_eq!(tracks[1].rating(), Rating::UNRATED);
        assert_eq!(tracks[1].last_played(), None);

        let one = provider.artist_tracks("Metallica").remove(0);
        assert_eq!(one.metadata().year, 0);
        assert_eq!(one.metadata().track_number, 0);
        assert_eq!(one.rating(), Rating::MAX);
        assert_eq!(one.play_count(), PlayCount::new(9));
    }

    #[test]
    fn test_commit_writes_fraction_and_timestamp() {
        let dir = TempDir::new().unwrap();
        let provider = fixture(&dir);
        let track = provider.artist_tracks("Daft Punk").remove(1);
        let played = timestamp_from_unix(1_400_000_000);
        track.set_rating(Rating::new(7));
        track.set_last_played(played);
        track.set_play_count(PlayCount::new(3));
        track.commit().unwrap();

        assert_eq!(stored(&dir, "rating", 2), rusqlite::types::Value::Real(0.7));
        assert_eq!(
            stored(&dir, "lastplayed", 2),
            rusqlite::types::Value::Integer(1_400_000_000)
        );

        let reread = provider.artist_tracks("Daft Punk").remove(1);
        assert_eq!(reread.rating(), Rating::new(7));
        assert_eq!(reread.last_played(), played);
        assert_eq!(reread.play_count(), PlayCount::new(3));
    }

    #[test]
    fn test_clearing_writes_unset_markers() {
        let dir = TempDir::new().unwrap();
        let provider = fixture(&dir);
        let track = provider.artist_tracks("Daft Punk").remove(0);
        track.set_rating(Rating::UNRATED);
        track.set_last_played(None);
        track.commit().unwrap();

        assert_eq!(stored(&dir, "rating", 1), rusqlite::types::Value::Real(-1.0));
        assert_eq!(stored(&dir, "lastplayed", 1), rusqlite::types::Value::Integer(-1));
    }

    #[test]
    fn test_labels_are_not_writable() {
        let dir = TempDir::new().unwrap();
        let provider = fixture(&dir);
        assert!(!provider.writable_track_stats_data().contains(Fields::LABELS));
        assert!(!provider.writable_track_stats_data().contains(Fields::FIRST_PLAYED));
    }
}
