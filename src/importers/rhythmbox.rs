//! Rhythmbox importer.
//!
//! Reads `rhythmdb.xml`, where every song is an `<entry type="song">` directly
//! under the `<rhythmdb>` root, identified by its `<location>`. Radio
//! stations, podcasts and ignored files are other entry types and are passed
//! through untouched.

use std::io::BufRead;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::xml::{Fragment, XmlFormat, XmlImporter};
use super::{FileImporterConfig, ImportedTrack};
use crate::error::Result;
use crate::fields::Fields;
use crate::track::{StatisticsChanges, TrackMetadata, TrackStatistics};
use crate::types::{timestamp_from_unix, PlayCount, Rating, RatingScale};

pub type RhythmboxProvider = XmlImporter<RhythmboxFormat>;

impl RhythmboxProvider {
    #[must_use]
    pub fn new(config: FileImporterConfig) -> Self {
        XmlImporter::from_parts(config.identity, config.db_path, RhythmboxFormat)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RhythmboxFormat;

impl RhythmboxFormat {
    fn number(fragment: &Fragment, name: &str) -> i64 {
        fragment
            .child_text(name)
            .and_then(|text| text.trim().parse().ok())
            .unwrap_or_default()
    }
}

impl XmlFormat for RhythmboxFormat {
    /// `<location>` URI.
    type Key = String;

    fn pretty_name(&self) -> &'static str {
        "Rhythmbox"
    }

    fn description(&self) -> &'static str {
        "Rhythmbox music database"
    }

    fn icon(&self) -> &'static str {
        "rhythmbox"
    }

    fn reliable_track_metadata(&self) -> Fields {
        Fields::TITLE | Fields::ARTIST | Fields::ALBUM | Fields::TRACK_NUMBER | Fields::DISC_NUMBER
    }

    fn writable_track_stats_data(&self) -> Fields {
        Fields::RATING | Fields::LAST_PLAYED | Fields::PLAY_COUNT
    }

    fn rating_scale(&self) -> RatingScale {
        RatingScale::Stars
    }

    fn walk(
        &self,
        reader: &mut Reader<Box<dyn BufRead>>,
        emit: &mut dyn FnMut(Event<'_>) -> Result<()>,
        record: &mut dyn FnMut(&mut Fragment) -> Result<()>,
    ) -> Result<()> {
        let mut buf = Vec::new();
        let mut depth = 0_usize;
        loop {
            buf.clear();
            match reader.read_event_into(&mut buf)? {
                Event::Eof => return Ok(()),
                Event::Start(start) if depth == 1 && start.name().as_ref() == b"entry" => {
                    let mut fragment = Fragment::read(reader, start.into_owned())?;
                    if fragment.attribute("type").as_deref() == Some("song") {
                        record(&mut fragment)?;
                    }
                    fragment.emit(emit)?;
                }
                Event::Start(start) => {
                    depth += 1;
                    emit(Event::Start(start))?;
                }
                Event::End(end) => {
                    depth = depth.saturating_sub(1);
                    emit(Event::End(end))?;
                }
                other => emit(other)?,
            }
        }
    }

    fn parse(&self, fragment: &Fragment) -> Option<ImportedTrack<String>> {
        let key = self.key(fragment)?;
        let text = |name: &str| fragment.child_text(name).unwrap_or_default();
        let metadata = TrackMetadata {
            title: text("title"),
            artist: text("artist"),
            album: text("album"),
            track_number: i32::try_from(Self::number(fragment, "track-number")).unwrap_or(0),
            disc_number: i32::try_from(Self::number(fragment, "disc-number")).unwrap_or(0),
            ..TrackMetadata::default()
        }
        .trimmed();
        let statistics = TrackStatistics {
            rating: Rating::from_stars(Self::number(fragment, "rating")),
            last_played: timestamp_from_unix(Self::number(fragment, "last-played")),
            play_count: PlayCount::new(Self::number(fragment, "play-count")),
            ..TrackStatistics::default()
        };
        Some(ImportedTrack {
            key,
            metadata,
            statistics,
        })
    }

    fn key(&self, fragment: &Fragment) -> Option<String> {
        fragment
            .child_text("location")
            .filter(|location| !location.is_empty())
    }

    fn apply(&self, fragment: &mut Fragment, changes: &StatisticsChanges) {
        // Rhythmbox omits elements whose value is unset or zero.
        if let Some(rating) = changes.rating {
            let stars = rating.to_stars();
            fragment.set_child_text("rating", (stars > 0).then(|| stars.to_string()).as_deref());
        }
        if let Some(last_played) = changes.last_played {
            let secs = last_played.map(|t| t.timestamp().to_string());
            fragment.set_child_text("last-played", secs.as_deref());
        }
        if let Some(play_count) = changes.play_count {
            let count = (!play_count.is_zero()).then(|| play_count.to_string());
            fragment.set_child_text("play-count", count.as_deref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importers::xml::backup_path;
    use crate::importers::ImporterIdentity;
    use crate::provider::Provider;
    use std::fmt::Write as _;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    const METALLICA_TITLES: [&str; 12] = [
        "Enter Sandman",
        "Sad but True",
        "Holier Than Thou",
        "The Unforgiven",
        "Wherever I May Roam",
        "Don't Tread on Me",
        "Through the Never",
        "Nothing Else Matters",
        "Of Wolf and Man",
        "The God That Failed",
        "My Friend of Misery",
        "The Struggle Within",
    ];

    fn library() -> String {
        let mut xml = String::from("<?xml version=\"1.0\" standalone=\"yes\"?>\n<rhythmdb version=\"1.8\">\n");
        for (index, title) in METALLICA_TITLES.iter().enumerate() {
            let _ = write!(
                xml,
                "  <entry type=\"song\">\n    <title>{}</title>\n    <artist>Metallica</artist>\n    <album>Metallica</album>\n    <track-number>{}</track-number>\n    <location>file:///music/metallica/{:02}.mp3</location>\n  </entry>\n",
                title.replace('\'', "&apos;"),
                index + 1,
                index + 1,
            );
        }
        xml.push_str(
            "  <entry type=\"song\">\n    <title>Aerodynamic</title>\n    <artist>Daft Punk</artist>\n    <album>Discovery</album>\n    <track-number>3</track-number>\n    <rating>3</rating>\n    <last-played>1378125780</last-played>\n    <play-count>7</play-count>\n    <location>file:///music/daft_punk/aerodynamic.mp3</location>\n  </entry>\n",
        );
        xml.push_str(
            "  <entry type=\"iradio\">\n    <title>Radio Paradise</title>\n    <artist>Metallica</artist>\n    <location>http://stream.radioparadise.com/mp3-192</location>\n  </entry>\n",
        );
        xml.push_str("</rhythmdb>\n");
        xml
    }

    fn fixture(dir: &TempDir) -> (RhythmboxProvider, PathBuf) {
        let path = dir.path().join("rhythmdb.xml");
        fs::write(&path, library()).unwrap();
        let config = FileImporterConfig {
            identity: ImporterIdentity {
                uid: "rb-test".into(),
                name: "Rhythmbox".into(),
            },
            db_path: path.clone(),
        };
        (RhythmboxProvider::new(config), path)
    }

    #[test]
    fn test_capabilities() {
        let dir = TempDir::new().unwrap();
        let (provider, _) = fixture(&dir);
        assert!(!provider.reliable_track_metadata().contains(Fields::COMPOSER));
        assert!(!provider.reliable_track_metadata().contains(Fields::YEAR));
        assert_eq!(
            provider.writable_track_stats_data(),
            Fields::RATING | Fields::LAST_PLAYED | Fields::PLAY_COUNT
        );
    }

    #[test]
    fn test_reads_only_song_entries() {
        let dir = TempDir::new().unwrap();
        let (provider, _) = fixture(&dir);

        let artists: Vec<String> = provider.artists().into_iter().collect();
        assert_eq!(artists, vec!["Daft Punk", "Metallica"]);

        let tracks = provider.artist_tracks("Metallica");
        assert_eq!(tracks.len(), 12);
        assert!(tracks.iter().all(|t| t.album() == "Metallica"));
        assert_eq!(tracks[5].title(), "Don't Tread on Me");
        assert_eq!(tracks[11].metadata().track_number, 12);
    }

    #[test]
    fn test_reads_statistics() {
        let dir = TempDir::new().unwrap();
        let (provider, _) = fixture(&dir);
        let track = provider.artist_tracks("Daft Punk").remove(0);
        assert_eq!(track.rating(), Rating::new(6));
        assert_eq!(track.play_count(), PlayCount::new(7));
        assert_eq!(track.last_played(), timestamp_from_unix(1_378_125_780));

        let unplayed = provider.artist_tracks("Metallica").remove(0);
        assert_eq!(unplayed.rating(), Rating::UNRATED);
        assert_eq!(unplayed.last_played(), None);
        assert!(unplayed.play_count().is_zero());
    }

    #[test]
    fn test_commit_rewrites_only_changed_entries() {
        let dir = TempDir::new().unwrap();
        let (provider, path) = fixture(&dir);

        let sandman = provider.artist_tracks("Metallica").remove(0);
        sandman.set_rating(Rating::new(7));
        sandman.set_play_count(PlayCount::new(3));
        sandman.set_last_played(timestamp_from_unix(1_400_000_000));
        sandman.commit().unwrap();

        let aero = provider.artist_tracks("Daft Punk").remove(0);
        aero.set_rating(Rating::UNRATED);
        aero.set_play_count(PlayCount::default());
        aero.commit().unwrap();

        // Nothing reaches the file before the provider flushes.
        assert_eq!(fs::read_to_string(&path).unwrap(), library());
        provider.commit_tracks().unwrap();

        assert_eq!(fs::read_to_string(backup_path(&path)).unwrap(), library());
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("<rating>4</rating>"));
        assert!(written.contains("<play-count>3</play-count>"));
        assert!(written.contains("<last-played>1400000000</last-played>"));
        assert!(!written.contains("<rating>3</rating>"));
        assert!(!written.contains("<play-count>7</play-count>"));
        assert!(written.contains("<location>http://stream.radioparadise.com/mp3-192</location>"));
        assert!(written.starts_with("<?xml version=\"1.0\" standalone=\"yes\"?>\n<rhythmdb version=\"1.8\">"));

        let reread = provider.artist_tracks("Metallica");
        assert_eq!(reread.len(), 12);
        assert_eq!(reread[0].rating(), Rating::new(8));
        assert_eq!(reread[0].play_count(), PlayCount::new(3));
        assert_eq!(reread[1].rating(), Rating::UNRATED);

        let aero = provider.artist_tracks("Daft Punk").remove(0);
        assert_eq!(aero.rating(), Rating::UNRATED);
        assert!(aero.play_count().is_zero());
        assert_eq!(aero.last_played(), timestamp_from_unix(1_378_125_780));
    }

    #[test]
    fn test_commit_without_changes_leaves_file_alone() {
        let dir = TempDir::new().unwrap();
        let (provider, path) = fixture(&dir);
        provider.commit_tracks().unwrap();
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn test_rating_scale_is_whole_stars() {
        let dir = TempDir::new().unwrap();
        let (provider, _) = fixture(&dir);
        assert_eq!(provider.rating_scale(), RatingScale::Stars);
    }

    #[test]
    fn test_reloads_after_external_edit() {
        let dir = TempDir::new().unwrap();
        let (provider, path) = fixture(&dir);
        assert_eq!(provider.artist_tracks("Daft Punk")[0].play_count(), PlayCount::new(7));

        let edited = library().replace("<play-count>7</play-count>", "<play-count>9</play-count>");
        fs::write(&path, edited).unwrap();
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();

        assert_eq!(provider.artist_tracks("Daft Punk")[0].play_count(), PlayCount::new(9));
    }

    #[test]
    fn test_failed_flush_discards_staged_changes() {
        let dir = TempDir::new().unwrap();
        let (provider, path) = fixture(&dir);
        let aero = provider.artist_tracks("Daft Punk").remove(0);
        aero.set_play_count(PlayCount::new(42));
        aero.commit().unwrap();

        let moved = dir.path().join("moved.xml");
        fs::rename(&path, &moved).unwrap();
        assert!(provider.commit_tracks().is_err());
        fs::rename(&moved, &path).unwrap();

        // Nothing is left to retry: the file stays as it was.
        provider.commit_tracks().unwrap();
        assert!(!backup_path(&path).exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), library());
        assert_eq!(provider.artist_tracks("Daft Punk")[0].play_count(), PlayCount::new(7));
    }
}
