//! Query implementations for the local collection store

use std::collections::{BTreeSet, HashMap};

use duckdb::{params, Connection};

use crate::error::Result;
use crate::provider::AbortToken;
use crate::track::{Labels, StatisticsChanges, TrackMetadata, TrackStatistics};
use crate::types::{timestamp_from_unix, PlayCount, Rating};

/// A track row with its labels.
#[derive(Debug, Clone)]
pub struct StoredTrack {
    pub id: i64,
    pub url: String,
    pub metadata: TrackMetadata,
    pub statistics: TrackStatistics,
}

/// Insert a track and its labels, returning the new id
pub fn insert_track(
    conn: &Connection,
    url: &str,
    metadata: &TrackMetadata,
    statistics: &TrackStatistics,
) -> Result<i64> {
    let id: i64 = conn.query_row(
        r"
        INSERT INTO tracks (
            url, title, artist, album, composer, year, track_number, disc_number,
            first_played, last_played, rating, play_count
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        RETURNING id
        ",
        params![
            url,
            metadata.title,
            metadata.artist,
            metadata.album,
            metadata.composer,
            metadata.year,
            metadata.track_number,
            metadata.disc_number,
            statistics.first_played.map(|t| t.timestamp()),
            statistics.last_played.map(|t| t.timestamp()),
            i32::from(statistics.rating.get()),
            statistics.play_count.get(),
        ],
        |row| row.get(0),
    )?;

    replace_labels(conn, id, &statistics.labels)?;
    Ok(id)
}

/// Get total track count
pub fn track_count(conn: &Connection) -> Result<i64> {
    let mut stmt = conn.prepare("SELECT COUNT(*) FROM tracks")?;
    let count: i64 = stmt.query_row([], |row| row.get(0))?;
    Ok(count)
}

/// Distinct trimmed artist names
pub fn artists(conn: &Connection) -> Result<BTreeSet<String>> {
    let mut stmt =
        conn.prepare("SELECT DISTINCT TRIM(artist) FROM tracks WHERE TRIM(artist) <> ''")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut artists = BTreeSet::new();
    for row in rows {
        artists.insert(row?);
    }
    Ok(artists)
}

/// All tracks whose trimmed artist equals `artist`
pub fn artist_tracks(
    conn: &Connection,
    artist: &str,
    abort: &AbortToken,
) -> Result<Vec<StoredTrack>> {
    let mut labels = artist_labels(conn, artist)?;

    let mut stmt = conn.prepare(
        r"
        SELECT id, url, title, artist, album, composer, year, track_number, disc_number,
               first_played, last_played, rating, play_count
        FROM tracks
        WHERE TRIM(artist) = ?1
        ORDER BY id
        ",
    )?;

    let mut rows = stmt.query(params![artist])?;
    let mut tracks = Vec::new();
    while let Some(row) = rows.next()? {
        if abort.is_aborted() {
            break;
        }
        let id: i64 = row.get(0)?;
        let metadata = TrackMetadata {
            title: row.get(2)?,
            artist: row.get(3)?,
            album: row.get(4)?,
            composer: row.get(5)?,
            year: row.get(6)?,
            track_number: row.get(7)?,
            disc_number: row.get(8)?,
        }
        .trimmed();
        let statistics = TrackStatistics {
            first_played: row.get::<_, Option<i64>>(9)?.and_then(timestamp_from_unix),
            last_played: row.get::<_, Option<i64>>(10)?.and_then(timestamp_from_unix),
            rating: Rating::new(i64::from(row.get::<_, i32>(11)?)),
            play_count: PlayCount::new(row.get(12)?),
            labels: labels.remove(&id).unwrap_or_default(),
        };
        tracks.push(StoredTrack {
            id,
            url: row.get(1)?,
            metadata,
            statistics,
        });
    }

    Ok(tracks)
}

fn artist_labels(conn: &Connection, artist: &str) -> Result<HashMap<i64, Labels>> {
    let mut stmt = conn.prepare(
        r"
        SELECT l.track_id, l.label
        FROM labels l
        JOIN tracks t ON t.id = l.track_id
        WHERE TRIM(t.artist) = ?1
        ",
    )?;
    let rows = stmt.query_map(params![artist], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut labels: HashMap<i64, Labels> = HashMap::new();
    for row in rows {
        let (id, label) = row?;
        labels.entry(id).or_default().insert(label);
    }
    Ok(labels)
}

/// Write staged statistics of one track
pub fn update_statistics(conn: &Connection, id: i64, changes: &StatisticsChanges) -> Result<()> {
    if let Some(first_played) = changes.first_played {
        conn.execute(
            "UPDATE tracks SET first_played = ?1 WHERE id = ?2",
            params![first_played.map(|t| t.timestamp()), id],
        )?;
    }
    if let Some(last_played) = changes.last_played {
        conn.execute(
            "UPDATE tracks SET last_played = ?1 WHERE id = ?2",
            params![last_played.map(|t| t.timestamp()), id],
        )?;
    }
    if let Some(rating) = changes.rating {
        conn.execute(
            "UPDATE tracks SET rating = ?1 WHERE id = ?2",
            params![i32::from(rating.get()), id],
        )?;
    }
    if let Some(play_count) = changes.play_count {
        conn.execute(
            "UPDATE tracks SET play_count = ?1 WHERE id = ?2",
            params![play_count.get(), id],
        )?;
    }
    if let Some(labels) = &changes.labels {
        replace_labels(conn, id, labels)?;
    }
    Ok(())
}

fn replace_labels(conn: &Connection, id: i64, labels: &Labels) -> Result<()> {
    conn.execute("DELETE FROM labels WHERE track_id = ?1", params![id])?;
    let mut stmt = conn.prepare("INSERT INTO labels (track_id, label) VALUES (?1, ?2)")?;
    for label in labels {
        stmt.execute(params![id, label])?;
    }
    Ok(())
}
