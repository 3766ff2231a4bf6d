//! Banshee importer.
//!
//! Banshee keeps its library in SQLite. Only tracks of the primary music
//! source (`PrimarySourceID = 1`) are considered; ratings are whole stars.

use std::collections::BTreeSet;

use rusqlite::params;

use super::sql::{SqlImporter, SqlSchema, SqliteConnection};
use super::{FileImporterConfig, ImportedTrack};
use crate::db::{SqliteBackend, UpdateBuilder};
use crate::error::Result;
use crate::fields::Fields;
use crate::provider::AbortToken;
use crate::track::{StatisticsChanges, TrackMetadata, TrackStatistics};
use crate::types::{timestamp_from_unix, timestamp_to_unix, PlayCount, Rating, RatingScale};

pub type BansheeProvider = SqlImporter<BansheeSchema>;

impl BansheeProvider {
    pub fn new(config: FileImporterConfig) -> Result<Self> {
        let conn = SqliteConnection::new(
            format!("banshee-{}", config.identity.uid),
            SqliteBackend::new(config.db_path),
        )?;
        Ok(SqlImporter::from_parts(config.identity, BansheeSchema, conn))
    }
}

/// `coretracks`/`coreartists`/`corealbums` layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct BansheeSchema;

impl SqlSchema for BansheeSchema {
    type Backend = SqliteBackend;

    /// `TrackID`
    type Key = i64;

    fn description(&self) -> &'static str {
        "Banshee music library"
    }

    fn icon(&self) -> &'static str {
        "media-player-banshee"
    }

    fn writable_track_stats_data(&self) -> Fields {
        Fields::RATING | Fields::LAST_PLAYED | Fields::PLAY_COUNT
    }

    fn rating_scale(&self) -> RatingScale {
        RatingScale::Stars
    }

    fn artists(&self, db: &mut rusqlite::Connection) -> Result<BTreeSet<String>> {
        let mut stmt = db.prepare(
            r"
            SELECT DISTINCT TRIM(a.Name)
            FROM coreartists a
            JOIN coretracks t ON t.ArtistID = a.ArtistID
            WHERE t.PrimarySourceID = 1 AND a.Name IS NOT NULL AND TRIM(a.Name) <> ''
            ",
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
            SELECT t.TrackID, t.Title, a.Name, al.Title, t.Composer, t.Year,
                   t.TrackNumber, t.Disc, t.Rating, t.LastPlayedStamp, t.PlayCount
            FROM coretracks t
            JOIN coreartists a ON a.ArtistID = t.ArtistID
            LEFT JOIN corealbums al ON al.AlbumID = t.AlbumID
            WHERE t.PrimarySourceID = 1 AND TRIM(a.Name) = ?1
            ORDER BY t.TrackID
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
                rating: Rating::from_stars(row.get::<_, Option<i64>>(8)?.unwrap_or_default()),
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
        let mut update = UpdateBuilder::new("coretracks");
        if let Some(rating) = changes.rating {
            update.set("Rating", rating.to_stars());
        }
        if let Some(last_played) = changes.last_played {
            update.set("LastPlayedStamp", timestamp_to_unix(last_played));
        }
        if let Some(play_count) = changes.play_count {
            update.set("PlayCount", play_count.get());
        }
        update.filter("TrackID", *key);
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

    fn fixture(dir: &TempDir) -> BansheeProvider {
        let path = dir.path().join("banshee.db");
        let db = rusqlite::Connection::open(&path).unwrap();
        db.execute_batch(
            r"
            CREATE TABLE coreartists (ArtistID INTEGER PRIMARY KEY, Name TEXT);
            CREATE TABLE corealbums (AlbumID INTEGER PRIMARY KEY, Title TEXT);
            CREATE TABLE coretracks (
                TrackID INTEGER PRIMARY KEY, PrimarySourceID INTEGER, ArtistID INTEGER,
                AlbumID INTEGER, Title TEXT, Composer TEXT, Year INTEGER, TrackNumber INTEGER,
                Disc INTEGER, Rating INTEGER, LastPlayedStamp INTEGER, PlayCount INTEGER
            );
            INSERT INTO coreartists VALUES (1, 'Daft Punk'), (2, ' Metallica '), (3, 'Podcaster');
            INSERT INTO corealbums VALUES (1, 'Discovery');
            INSERT INTO coretracks VALUES
                (1, 1, 1, 1, 'Aerodynamic', NULL, 2001, 3, 1, 4, 1378125780, 12),
                (2, 1, 1, 1, 'One More Time', '', 2001, 1, 1, 0, NULL, 0),
                (3, 1, 2, NULL, ' One ', 'Hetfield', 1988, 4, 0, 5, 0, 3),
                (4, 2, 3, NULL, 'Episode', NULL, 0, 0, 0, 0, 0, 0);
            ",
        )
        .unwrap();

        let identity = ImporterIdentity {
            uid: "banshee-test".into(),
            name: "Banshee".into(),
        };
        let conn = SqliteConnection::new("banshee-test", SqliteBackend::new(path)).unwrap();
        SqlImporter::from_parts(identity, BansheeSchema, conn)
    }

    #[test]
    fn test_artists_only_primary_source() {
        let dir = TempDir::new().unwrap();
        let provider = fixture(&dir);
        let artists: Vec<String> = provider.artists().into_iter().collect();
        assert_eq!(artists, vec!["Daft Punk", "Metallica"]);
    }

    #[test]
    fn test_reads_tracks_and_scales_rating() {
        let dir = TempDir::new().unwrap();
        let provider = fixture(&dir);
        let tracks = provider.artist_tracks("Daft Punk");
        assert_eq!(tracks.len(), 2);

        let aero = &tracks[0];
        assert_eq!(aero.title(), "Aerodynamic");
        assert_eq!(aero.album(), "Discovery");
        assert_eq!(aero.metadata().year, 2001);
        assert_eq!(aero.rating(), Rating::new(8));
        assert_eq!(aero.play_count(), PlayCount::new(12));
        assert_eq!(aero.last_played(), timestamp_from_unix(1_378_125_780));

        assert_eq!(tracks[1].last_played(), None);
        assert_eq!(tracks[1].rating(), Rating::UNRATED);
    }

    #[test]
    fn test_artist_lookup_uses_trimmed_name() {
        let dir = TempDir::new().unwrap();
        let provider = fixture(&dir);
        let tracks = provider.artist_tracks("Metallica");
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title(), "One");
        assert_eq!(tracks[0].artist(), "Metallica");
        assert!(provider.artist_tracks("Unknown Artist").is_empty());
    }

    #[test]
    fn test_odd_rating_rounds_up_to_full_star() {
        let dir = TempDir::new().unwrap();
        let provider = fixture(&dir);
        let track = provider.artist_tracks("Daft Punk").remove(0);
        track.set_rating(Rating::new(7));
        track.commit().unwrap();

        let db = rusqlite::Connection::open(dir.path().join("banshee.db")).unwrap();
        let native: i64 = db
            .query_row("SELECT Rating FROM coretracks WHERE TrackID = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(native, 4);

        let reread = provider.artist_tracks("Daft Punk").remove(0);
        assert_eq!(reread.rating(), Rating::new(8));
    }

    #[test]
    fn test_commit_roundtrip() {
        let dir = TempDir::new().unwrap();
        let provider = fixture(&dir);
        let track = provider.artist_tracks("Daft Punk").remove(1);
        let played = timestamp_from_unix(1_400_000_000);
        track.set_rating(Rating::new(10));
        track.set_play_count(PlayCount::new(5));
        track.set_last_played(played);
        track.commit().unwrap();

        let reread = provider.artist_tracks("Daft Punk").remove(1);
        assert_eq!(reread.rating(), Rating::new(10));
        assert_eq!(reread.play_count(), PlayCount::new(5));
        assert_eq!(reread.last_played(), played);
    }
}
