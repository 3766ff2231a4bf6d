//! Amarok 1.4 ("FastForward") importer.
//!
//! Amarok 1.4 kept its collection in SQLite, MySQL or PostgreSQL with the
//! same tables in each. The schema is written once against [`SqlHandle`] and
//! read through whichever backend the `dbDriver` setting names. A server
//! database bundled with the player can be run as an [`EmbeddedServer`]
//! through the `server*` settings.

use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use rusqlite::types::Value;
use tracing::debug;

use super::sql::{SqlImporter, SqlSchema};
use super::{ImportedTrack, ImporterIdentity, ImporterKind, ImporterSettings};
use crate::db::{
    Backend, EmbeddedServer, Row, ServerBackend, ServerConfig, ServerDriver, SqlConnection,
    SqlHandle, SqliteBackend, UpdateBuilder,
};
use crate::error::{Error, Result};
use crate::fields::Fields;
use crate::provider::{AbortToken, ProviderPtr};
use crate::track::{Labels, StatisticsChanges, TrackMetadata, TrackStatistics};
use crate::types::{timestamp_from_unix, timestamp_to_unix, PlayCount, Rating};

/// `labels.type` of labels set by the user.
const USER_LABEL: i64 = 1;

/// Database drivers Amarok 1.4 could be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbDriver {
    Sqlite,
    MySql,
    PostgreSql,
}

impl FromStr for DbDriver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "QSQLITE" | "sqlite" => Ok(Self::Sqlite),
            "QMYSQL" | "mysql" => Ok(Self::MySql),
            "QPSQL" | "postgresql" => Ok(Self::PostgreSql),
            other => Err(Error::config(format!("unknown dbDriver '{other}'"))),
        }
    }
}

/// Where the collection lives.
#[derive(Debug, Clone)]
pub enum FastForwardDatabase {
    File(PathBuf),
    Server(ServerBackend),
}

/// Parsed settings of a FastForward importer.
#[derive(Debug, Clone)]
pub struct FastForwardConfig {
    pub identity: ImporterIdentity,
    pub driver: DbDriver,
    pub database: FastForwardDatabase,
    pub server: Option<ServerConfig>,
}

impl FastForwardConfig {
    pub fn parse(settings: &ImporterSettings) -> Result<Self> {
        let driver = settings
            .get("dbDriver")
            .map_or(Ok(DbDriver::Sqlite), str::parse)?;
        let port = settings.port()?;
        let server = parse_server(settings)?;

        let database = match driver {
            DbDriver::Sqlite => {
                if server.is_some() {
                    return Err(Error::config(
                        "'serverProgram' needs a MySQL or PostgreSQL dbDriver",
                    ));
                }
                FastForwardDatabase::File(settings.existing_path("dbPath")?)
            }
            DbDriver::MySql | DbDriver::PostgreSql => {
                let server_driver = if driver == DbDriver::MySql {
                    ServerDriver::MySql
                } else {
                    ServerDriver::PostgreSql
                };
                let name = settings
                    .get("dbName")
                    .ok_or_else(|| Error::config(format!("'dbName' is required with {driver:?}")))?;
                let backend =
                    ServerBackend::new(server_driver, settings.get("dbHost").unwrap_or("localhost"), name)
                        .port(port.unwrap_or_else(|| server_driver.default_port()))
                        .credentials(
                            settings.get("dbUser").map(String::from),
                            settings.get("dbPass").map(String::from),
                        );
                FastForwardDatabase::Server(backend)
            }
        };

        Ok(Self {
            identity: settings.identity(ImporterKind::FastForward),
            driver,
            database,
            server,
        })
    }
}

fn parse_server(settings: &ImporterSettings) -> Result<Option<ServerConfig>> {
    let Some(program) = settings.get("serverProgram") else {
        return Ok(None);
    };
    let pid_file = settings
        .get("serverPidFile")
        .ok_or_else(|| Error::config("'serverPidFile' is required with 'serverProgram'"))?;

    let mut server = ServerConfig::new(program, pid_file);
    server.args = settings
        .get("serverArgs")
        .map(|args| args.split_whitespace().map(String::from).collect())
        .unwrap_or_default();
    server.idle_timeout = settings.duration("serverIdleTimeout", server.idle_timeout)?;
    server.startup_timeout = settings.duration("serverStartupTimeout", server.startup_timeout)?;
    Ok(Some(server))
}

/// Amarok 1.4 collection in an SQLite file.
pub type FastForwardProvider = SqlImporter<FastForwardSchema<SqliteBackend>>;

/// Amarok 1.4 collection on a MySQL or PostgreSQL server.
pub type FastForwardServerProvider = SqlImporter<FastForwardSchema<ServerBackend>>;

/// Create the provider for the configured database.
pub fn create(config: FastForwardConfig) -> Result<ProviderPtr> {
    let name = format!("fastforward-{}", config.identity.uid);
    match config.database {
        FastForwardDatabase::File(path) => {
            let conn = SqlConnection::new(name, SqliteBackend::new(path))?;
            Ok(Arc::new(FastForwardProvider::from_parts(
                config.identity,
                FastForwardSchema::new(),
                conn,
            )))
        }
        FastForwardDatabase::Server(backend) => {
            let conn = match config.server {
                Some(server) => {
                    let server = Arc::new(EmbeddedServer::new(server)?);
                    SqlConnection::with_server(name, backend, server)?
                }
                None => SqlConnection::new(name, backend)?,
            };
            Ok(Arc::new(FastForwardServerProvider::from_parts(
                config.identity,
                FastForwardSchema::new(),
                conn,
            )))
        }
    }
}

/// Identifies one `tags` row and its `statistics` row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TrackKey {
    pub url: String,
    pub device_id: i64,
    pub unique_id: String,
}

/// Amarok 1.4 collection tables, read through backend `B`.
pub struct FastForwardSchema<B> {
    backend: PhantomData<fn() -> B>,
}

impl<B> FastForwardSchema<B> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            backend: PhantomData,
        }
    }
}

impl<B> Default for FastForwardSchema<B> {
    fn default() -> Self {
        Self::new()
    }
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn small(row: &Row, index: usize) -> i32 {
    row.int(index)
        .and_then(|v| i32::try_from(v).ok())
        .unwrap_or_default()
}

fn labels<H: SqlHandle>(db: &mut H, artist: &str) -> Result<BTreeMap<(String, i64), Labels>> {
    let rows = db.select(
        r"
        SELECT t.url, t.deviceid, l.name
        FROM tags t
        JOIN artist a ON a.id = t.artist
        JOIN tags_labels tl ON tl.url = t.url AND tl.deviceid = t.deviceid
        JOIN labels l ON l.id = tl.labelid
        WHERE TRIM(a.name) = ? AND l.type = ?
        ",
        &[text(artist), Value::Integer(USER_LABEL)],
    )?;
    let mut labels: BTreeMap<(String, i64), Labels> = BTreeMap::new();
    for row in rows {
        let (Some(url), Some(device_id), Some(name)) = (row.text(0), row.int(1), row.text(2))
        else {
            continue;
        };
        labels.entry((url, device_id)).or_default().insert(name);
    }
    Ok(labels)
}

fn find_label<H: SqlHandle>(db: &mut H, name: &str) -> Result<Option<i64>> {
    let rows = db.select(
        "SELECT id FROM labels WHERE name = ? AND type = ?",
        &[text(name), Value::Integer(USER_LABEL)],
    )?;
    Ok(rows.first().and_then(|row| row.int(0)))
}

fn label_id<H: SqlHandle>(db: &mut H, name: &str) -> Result<i64> {
    if let Some(id) = find_label(db, name)? {
        return Ok(id);
    }
    db.execute(
        "INSERT INTO labels (name, type) VALUES (?, ?)",
        &[text(name), Value::Integer(USER_LABEL)],
    )?;
    find_label(db, name)?.ok_or_else(|| Error::commit(format!("label '{name}' was not created")))
}

fn write_statistics<H: SqlHandle>(
    db: &mut H,
    key: &TrackKey,
    previous: &TrackStatistics,
    changes: &StatisticsChanges,
) -> Result<()> {
    let existing = db.select(
        "SELECT COUNT(*) FROM statistics WHERE url = ? AND deviceid = ?",
        &[text(&key.url), Value::Integer(key.device_id)],
    )?;
    let exists = existing.first().and_then(|row| row.int(0)).unwrap_or(0) > 0;

    if exists {
        let mut update = UpdateBuilder::new("statistics");
        if let Some(first_played) = changes.first_played {
            update.set("createdate", timestamp_to_unix(first_played));
        }
        if let Some(last_played) = changes.last_played {
            update.set("accessdate", timestamp_to_unix(last_played));
        }
        if let Some(rating) = changes.rating {
            update.set("rating", i64::from(rating.get()));
        }
        if let Some(play_count) = changes.play_count {
            update.set("playcounter", play_count.get());
        }
        update.filter("url", key.url.clone());
        update.filter("deviceid", key.device_id);
        update.execute_on(db)?;
        return Ok(());
    }

    let mut merged = previous.clone();
    merged.apply(changes);
    db.execute(
        r"
        INSERT INTO statistics (url, deviceid, uniqueid, createdate, accessdate, rating, playcounter)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ",
        &[
            text(&key.url),
            Value::Integer(key.device_id),
            text(&key.unique_id),
            Value::Integer(timestamp_to_unix(merged.first_played)),
            Value::Integer(timestamp_to_unix(merged.last_played)),
            Value::Integer(i64::from(merged.rating.get())),
            Value::Integer(merged.play_count.get()),
        ],
    )?;
    Ok(())
}

fn write_labels<H: SqlHandle>(
    db: &mut H,
    key: &TrackKey,
    previous: &Labels,
    labels: &Labels,
) -> Result<()> {
    for removed in previous.difference(labels) {
        db.execute(
            r"
            DELETE FROM tags_labels
            WHERE url = ? AND deviceid = ?
              AND labelid IN (SELECT id FROM labels WHERE name = ? AND type = ?)
            ",
            &[
                text(&key.url),
                Value::Integer(key.device_id),
                text(removed),
                Value::Integer(USER_LABEL),
            ],
        )?;
    }
    for added in labels.difference(previous) {
        let label_id = label_id(db, added)?;
        db.execute(
            "INSERT INTO tags_labels (deviceid, url, uniqueid, labelid) VALUES (?, ?, ?, ?)",
            &[
                Value::Integer(key.device_id),
                text(&key.url),
                text(&key.unique_id),
                Value::Integer(label_id),
            ],
        )?;
    }
    Ok(())
}

impl<B> SqlSchema for FastForwardSchema<B>
where
    B: Backend,
    B::Handle: SqlHandle,
{
    type Backend = B;
    type Key = TrackKey;

    fn description(&self) -> &'static str {
        "Amarok 1.4 collection database"
    }

    fn icon(&self) -> &'static str {
        "amarok"
    }

    fn writable_track_stats_data(&self) -> Fields {
        Fields::STATISTICS
    }

    fn artists(&self, db: &mut B::Handle) -> Result<BTreeSet<String>> {
        let rows = db.select(
            r"
            SELECT DISTINCT TRIM(a.name)
            FROM artist a
            JOIN tags t ON t.artist = a.id
            WHERE a.name IS NOT NULL AND TRIM(a.name) <> ''
            ",
            &[],
        )?;
        Ok(rows.iter().filter_map(|row| row.text(0)).collect())
    }

    fn artist_tracks(
        &self,
        db: &mut B::Handle,
        artist: &str,
        abort: &AbortToken,
    ) -> Result<Vec<ImportedTrack<TrackKey>>> {
        let mut labels = labels(db, artist)?;
        let rows = db.select(
            r"
            SELECT t.url, t.deviceid, COALESCE(s.uniqueid, ''),
                   t.title, a.name, al.name, c.name, y.name,
                   t.track, t.discnumber,
                   s.createdate, s.accessdate, s.rating, s.playcounter
            FROM tags t
            JOIN artist a ON a.id = t.artist
            LEFT JOIN album al ON al.id = t.album
            LEFT JOIN composer c ON c.id = t.composer
            LEFT JOIN year y ON y.id = t.year
            LEFT JOIN statistics s ON s.url = t.url AND s.deviceid = t.deviceid
            WHERE TRIM(a.name) = ?
            ORDER BY t.url
            ",
            &[text(artist)],
        )?;

        let mut tracks = Vec::new();
        for row in rows {
            if abort.is_aborted() {
                debug!(artist, "Aborted reading Amarok 1.4 tracks");
                break;
            }
            let key = TrackKey {
                url: row.text(0).unwrap_or_default(),
                device_id: row.int(1).unwrap_or_default(),
                unique_id: row.text(2).unwrap_or_default(),
            };
            let metadata = TrackMetadata {
                title: row.text(3).unwrap_or_default(),
                artist: row.text(4).unwrap_or_default(),
                album: row.text(5).unwrap_or_default(),
                composer: row.text(6).unwrap_or_default(),
                year: small(&row, 7),
                track_number: small(&row, 8),
                disc_number: small(&row, 9),
            }
            .trimmed();
            let statistics = TrackStatistics {
                first_played: row.int(10).and_then(timestamp_from_unix),
                last_played: row.int(11).and_then(timestamp_from_unix),
                rating: Rating::new(row.int(12).unwrap_or_default()),
                play_count: PlayCount::new(row.int(13).unwrap_or_default()),
                labels: labels
                    .remove(&(key.url.clone(), key.device_id))
                    .unwrap_or_default(),
            };
            tracks.push(ImportedTrack {
                key,
                metadata,
                statistics,
            });
        }
        Ok(tracks)
    }

    fn commit(
        &self,
        db: &mut B::Handle,
        key: &TrackKey,
        previous: &TrackStatistics,
        changes: &StatisticsChanges,
    ) -> Result<()> {
        if changes.fields().intersects(Fields::STATISTICS - Fields::LABELS) {
            write_statistics(db, key, previous, changes)?;
        }
        if let Some(labels) = &changes.labels {
            write_labels(db, key, &previous.labels, labels)?;
        }
        Ok(())
    }
}
