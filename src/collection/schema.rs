//! Local collection schema initialization

use duckdb::Connection;

use crate::error::Result;

/// Initialize the collection schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE SEQUENCE IF NOT EXISTS track_ids START 1")?;

    // One row per track; timestamps are unix seconds, NULL when unset
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS tracks (
            id BIGINT PRIMARY KEY DEFAULT nextval('track_ids'),
            url VARCHAR NOT NULL UNIQUE,

            -- Identity
            title VARCHAR NOT NULL DEFAULT '',
            artist VARCHAR NOT NULL DEFAULT '',
            album VARCHAR NOT NULL DEFAULT '',
            composer VARCHAR NOT NULL DEFAULT '',
            year INTEGER NOT NULL DEFAULT 0,
            track_number INTEGER NOT NULL DEFAULT 0,
            disc_number INTEGER NOT NULL DEFAULT 0,

            -- Statistics
            first_played BIGINT,
            last_played BIGINT,
            rating INTEGER NOT NULL DEFAULT 0,
            play_count BIGINT NOT NULL DEFAULT 0
        )
        ",
    )?;

    conn.execute_batch("CREATE INDEX IF NOT EXISTS idx_tracks_artist ON tracks(artist)")?;

    // Labels are replaced wholesale on commit, so no key constraint here
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS labels (
            track_id BIGINT NOT NULL,
            label VARCHAR NOT NULL
        )
        ",
    )?;

    conn.execute_batch("CREATE INDEX IF NOT EXISTS idx_labels_track ON labels(track_id)")?;

    Ok(())
}
