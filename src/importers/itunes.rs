//! iTunes importer.
//!
//! Reads the `iTunes Library.xml` property list. Tracks are the `<dict>`
//! values of the top-level `Tracks` dictionary, keyed by `Track ID`.
//! Playlists and every other part of the document are passed through as is.

use std::collections::BTreeMap;
use std::io::BufRead;

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use super::xml::{Fragment, XmlFormat, XmlImporter};
use super::{FileImporterConfig, ImportedTrack};
use crate::error::Result;
use crate::fields::Fields;
use crate::track::{StatisticsChanges, TrackMetadata, TrackStatistics};
use crate::types::{PlayCount, Rating, RatingScale};

/// Format of `<date>` values.
const PLIST_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Depth of the top-level dictionary's children (`plist` > `dict` > child).
const ROOT_DICT_DEPTH: usize = 2;

pub type ITunesProvider = XmlImporter<ITunesFormat>;

impl ITunesProvider {
    #[must_use]
    pub fn new(config: FileImporterConfig) -> Self {
        XmlImporter::from_parts(config.identity, config.db_path, ITunesFormat)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ITunesFormat;

/// Values of one track dictionary, by key.
struct PlistTrack(BTreeMap<String, (String, String)>);

impl PlistTrack {
    fn new(fragment: &Fragment) -> Self {
        Self(
            fragment
                .plist_entries()
                .into_iter()
                .map(|(key, tag, text)| (key, (tag, text)))
                .collect(),
        )
    }

    fn text(&self, key: &str) -> String {
        self.0
            .get(key)
            .map(|(_, text)| text.clone())
            .unwrap_or_default()
    }

    fn integer(&self, key: &str) -> i64 {
        self.0
            .get(key)
            .filter(|(tag, _)| tag == "integer")
            .and_then(|(_, text)| text.trim().parse().ok())
            .unwrap_or_default()
    }

    fn flag(&self, key: &str) -> bool {
        self.0.get(key).is_some_and(|(tag, _)| tag == "true")
    }

    fn date(&self, key: &str) -> Option<DateTime<Utc>> {
        self.0
            .get(key)
            .filter(|(tag, _)| tag == "date")
            .and_then(|(_, text)| DateTime::parse_from_rfc3339(text.trim()).ok())
            .map(|date| date.with_timezone(&Utc))
    }
}

impl XmlFormat for ITunesFormat {
    /// `Track ID`
    type Key = i64;

    fn pretty_name(&self) -> &'static str {
        "iTunes"
    }

    fn description(&self) -> &'static str {
        "iTunes music library"
    }

    fn icon(&self) -> &'static str {
        "audio-x-generic"
    }

    fn reliable_track_metadata(&self) -> Fields {
        Fields::IDENTITY
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
        // Key of the top-level entry being read, and the last one read.
        let mut reading_key: Option<String> = None;
        let mut last_key = String::new();
        let mut tracks_depth: Option<usize> = None;

        loop {
            buf.clear();
            match reader.read_event_into(&mut buf)? {
                Event::Eof => return Ok(()),
                Event::Start(start)
                    if tracks_depth == Some(depth) && start.name().as_ref() == b"dict" =>
                {
                    let mut fragment = Fragment::read(reader, start.into_owned())?;
                    record(&mut fragment)?;
                    fragment.emit(emit)?;
                }
                Event::Start(start) => {
                    if depth == ROOT_DICT_DEPTH {
                        match start.name().as_ref() {
                            b"key" => reading_key = Some(String::new()),
                            b"dict" if last_key == "Tracks" => tracks_depth = Some(depth + 1),
                            _ => {}
                        }
                    }
                    depth += 1;
                    emit(Event::Start(start))?;
                }
                Event::Text(text) => {
                    if let Some(key) = reading_key.as_mut() {
                        key.push_str(&text.unescape()?);
                    }
                    emit(Event::Text(text))?;
                }
                Event::End(end) => {
                    depth = depth.saturating_sub(1);
                    if depth == ROOT_DICT_DEPTH {
                        if let Some(key) = reading_key.take() {
                            last_key = key;
                        }
                    }
                    if tracks_depth == Some(depth + 1) {
                        tracks_depth = None;
                    }
                    emit(Event::End(end))?;
                }
                other => emit(other)?,
            }
        }
    }

    fn parse(&self, fragment: &Fragment) -> Option<ImportedTrack<i64>> {
        let track = PlistTrack::new(fragment);
        let key = Some(track.integer("Track ID")).filter(|id| *id != 0)?;

        let number = |name: &str| i32::try_from(track.integer(name)).unwrap_or(0);
        let metadata = TrackMetadata {
            title: track.text("Name"),
            artist: track.text("Artist"),
            album: track.text("Album"),
            composer: track.text("Composer"),
            year: number("Year"),
            track_number: number("Track Number"),
            disc_number: number("Disc Number"),
        }
        .trimmed();

        // A computed rating is derived from the album rating, not set by the user.
        let rating = if track.flag("Rating Computed") {
            Rating::UNRATED
        } else {
            Rating::from_percent(track.integer("Rating"))
        };
        let statistics = TrackStatistics {
            rating,
            last_played: track.date("Play Date UTC"),
            play_count: PlayCount::new(track.integer("Play Count")),
            ..TrackStatistics::default()
        };

        Some(ImportedTrack {
            key,
            metadata,
            statistics,
        })
    }

    fn key(&self, fragment: &Fragment) -> Option<i64> {
        Some(PlistTrack::new(fragment).integer("Track ID")).filter(|id| *id != 0)
    }

    fn apply(&self, fragment: &mut Fragment, changes: &StatisticsChanges) {
        if let Some(rating) = changes.rating {
            let percent = rating.is_rated().then(|| rating.to_percent().to_string());
            fragment.set_plist_value("Rating Computed", None);
            fragment.set_plist_value("Rating", percent.as_deref().map(|p| ("integer", p)));
        }
        if let Some(last_played) = changes.last_played {
            let date = last_played.map(|t| t.format(PLIST_DATE_FORMAT).to_string());
            // "Play Date" is the same moment in Mac epoch seconds; drop the stale copy.
            fragment.set_plist_value("Play Date", None);
            fragment.set_plist_value("Play Date UTC", date.as_deref().map(|d| ("date", d)));
        }
        if let Some(play_count) = changes.play_count {
            let count = (!play_count.is_zero()).then(|| play_count.to_string());
            fragment.set_plist_value("Play Count", count.as_deref().map(|c| ("integer", c)));
        }
    }
}
