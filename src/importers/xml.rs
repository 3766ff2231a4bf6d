//! Streaming XML importers.
//!
//! Library files of XML-based players can be large, so they are never loaded
//! as a whole. A format walks the document with `quick-xml`, hands every
//! track record to the caller as a small [`Fragment`] of buffered events, and
//! passes everything else through untouched. Reading and writing use the same
//! walk: for write-back the events are copied into a temporary file with only
//! the statistics of changed records substituted, and the temporary file then
//! replaces the original.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::{debug, info, warn};

use super::{ImportedTrack, ImporterIdentity};
use crate::error::{Error, Result};
use crate::fields::Fields;
use crate::provider::{AbortToken, Provider, TrackPtr};
use crate::track::{
    SimpleWritableTrack, StatisticsChanges, TrackBackend, TrackMetadata, TrackStatistics,
};
use crate::types::RatingScale;

// ============================================================================
// Fragments
// ============================================================================

/// One buffered element, from its start tag to the matching end tag.
#[derive(Debug, Clone)]
pub struct Fragment {
    events: Vec<Event<'static>>,
}

impl Fragment {
    /// Buffer the element opened by `start` up to its end tag.
    pub fn read<R: BufRead>(reader: &mut Reader<R>, start: BytesStart<'static>) -> Result<Self> {
        let mut events = vec![Event::Start(start)];
        let mut depth = 1_usize;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let event = reader.read_event_into(&mut buf)?;
            match &event {
                Event::Start(_) => depth += 1,
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(Error::xml("unexpected end of document")),
                _ => {}
            }
            events.push(event.into_owned());
            if depth == 0 {
                return Ok(Self { events });
            }
        }
    }

    /// An attribute of the outer element.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<String> {
        let Some(Event::Start(start)) = self.events.first() else {
            return None;
        };
        start
            .try_get_attribute(name)
            .ok()
            .flatten()
            .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
    }

    /// Text of the first direct child element called `name`.
    #[must_use]
    pub fn child_text(&self, name: &str) -> Option<String> {
        self.children()
            .into_iter()
            .find(|range| self.element_name(range) == name)
            .map(|range| self.text_of(&range))
    }

    /// Set the text of the direct child `name`, adding the element if it is
    /// missing, or remove the element when `value` is `None`.
    pub fn set_child_text(&mut self, name: &str, value: Option<&str>) {
        let existing = self
            .children()
            .into_iter()
            .find(|range| self.element_name(range) == name);
        match (existing, value) {
            (Some(range), Some(value)) => {
                self.events.splice(range, simple_element(name, value));
            }
            (Some(range), None) => self.remove_with_indent(range),
            (None, Some(value)) => self.append_children(simple_element(name, value)),
            (None, None) => {}
        }
    }

    /// Key/value pairs of a plist `<dict>`: key text, value tag, value text.
    #[must_use]
    pub fn plist_entries(&self) -> Vec<(String, String, String)> {
        let children = self.children();
        children
            .chunks_exact(2)
            .filter(|pair| self.element_name(&pair[0]) == "key")
            .map(|pair| {
                (
                    self.text_of(&pair[0]),
                    self.element_name(&pair[1]),
                    self.text_of(&pair[1]),
                )
            })
            .collect()
    }

    /// Set `key` of a plist `<dict>` to a `<tag>text</tag>` value, adding the
    /// pair if missing, or remove the pair when `value` is `None`.
    pub fn set_plist_value(&mut self, key: &str, value: Option<(&str, &str)>) {
        let children = self.children();
        let position = children
            .chunks_exact(2)
            .position(|pair| self.element_name(&pair[0]) == "key" && self.text_of(&pair[0]) == key);
        match (position, value) {
            (Some(index), Some((tag, text))) => {
                let range = children[index * 2 + 1].clone();
                self.events.splice(range, simple_element(tag, text));
            }
            (Some(index), None) => {
                let key_range = &children[index * 2];
                let value_range = &children[index * 2 + 1];
                self.remove_with_indent(*key_range.start()..=*value_range.end());
            }
            (None, Some((tag, text))) => {
                let mut events = simple_element("key", key);
                events.extend(simple_element(tag, text));
                self.append_children(events);
            }
            (None, None) => {}
        }
    }

    /// Feed every buffered event to `emit`.
    pub fn emit(&self, emit: &mut dyn FnMut(Event<'_>) -> Result<()>) -> Result<()> {
        for event in &self.events {
            emit(event.borrow())?;
        }
        Ok(())
    }

    /// Index ranges of the direct child elements.
    fn children(&self) -> Vec<RangeInclusive<usize>> {
        let mut children = Vec::new();
        let mut depth = 0_usize;
        let mut start = 0;
        for (index, event) in self.events.iter().enumerate() {
            match event {
                Event::Start(_) => {
                    depth += 1;
                    if depth == 2 {
                        start = index;
                    }
                }
                Event::End(_) => {
                    if depth == 2 {
                        children.push(start..=index);
                    }
                    depth = depth.saturating_sub(1);
                }
                Event::Empty(_) if depth == 1 => children.push(index..=index),
                _ => {}
            }
        }
        children
    }

    fn element_name(&self, range: &RangeInclusive<usize>) -> String {
        match &self.events[*range.start()] {
            Event::Start(e) | Event::Empty(e) => {
                String::from_utf8_lossy(e.name().as_ref()).into_owned()
            }
            _ => String::new(),
        }
    }

    fn text_of(&self, range: &RangeInclusive<usize>) -> String {
        let mut text = String::new();
        for event in &self.events[range.clone()] {
            match event {
                Event::Text(t) => match t.unescape() {
                    Ok(s) => text.push_str(&s),
                    Err(e) => debug!(error = %e, "Skipping undecodable text"),
                },
                Event::CData(c) => text.push_str(&String::from_utf8_lossy(c)),
                _ => {}
            }
        }
        text
    }

    fn remove_with_indent(&mut self, range: RangeInclusive<usize>) {
        let mut start = *range.start();
        if start > 0 && is_whitespace(&self.events[start - 1]) {
            start -= 1;
        }
        self.events.drain(start..=*range.end());
    }

    /// Insert new children after the last one, reusing the existing indentation.
    fn append_children(&mut self, elements: Vec<Event<'static>>) {
        let indent = self
            .children()
            .first()
            .and_then(|range| range.start().checked_sub(1))
            .and_then(|index| match &self.events[index] {
                Event::Text(t) if t.iter().all(u8::is_ascii_whitespace) => Some(t.clone()),
                _ => None,
            })
            .unwrap_or_else(|| BytesText::from_escaped("\n"));

        let last = self.events.len() - 1;
        let at = if last > 0 && is_whitespace(&self.events[last - 1]) {
            last - 1
        } else {
            last
        };
        let mut inserted = vec![Event::Text(indent)];
        inserted.extend(elements);
        self.events.splice(at..at, inserted);
    }
}

fn is_whitespace(event: &Event<'_>) -> bool {
    matches!(event, Event::Text(t) if t.iter().all(u8::is_ascii_whitespace))
}

fn simple_element(name: &str, text: &str) -> Vec<Event<'static>> {
    vec![
        Event::Start(BytesStart::new(name.to_string())),
        Event::Text(BytesText::new(text).into_owned()),
        Event::End(BytesEnd::new(name.to_string())),
    ]
}

// ============================================================================
// File replacement
// ============================================================================

/// Path of the backup kept next to a rewritten file.
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Write a new version of `path` through `write` and swap it in.
///
/// The content goes to a temporary file in the same directory first. The
/// original is then renamed to `<file>.bak` and the new content copied into
/// place; if that copy fails the backup is restored.
pub fn replace_file(path: &Path, write: impl FnOnce(&mut dyn Write) -> Result<()>) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut out = BufWriter::new(temp.as_file_mut());
        write(&mut out)?;
        out.flush()?;
    }
    temp.as_file().sync_all()?;

    let backup = backup_path(path);
    fs::rename(path, &backup)?;
    if let Err(e) = fs::copy(temp.path(), path) {
        warn!(path = %path.display(), error = %e, "Replacing file failed, restoring backup");
        let _ = fs::remove_file(path);
        fs::rename(&backup, path)?;
        return Err(e.into());
    }
    Ok(())
}

// ============================================================================
// Generic XML importer
// ============================================================================

/// One XML library format.
pub trait XmlFormat: Send + Sync + 'static {
    /// Identifies a record across reads and writes.
    type Key: Ord + Clone + Debug + Send + Sync + 'static;

    fn pretty_name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn icon(&self) -> &'static str;
    fn reliable_track_metadata(&self) -> Fields;
    fn writable_track_stats_data(&self) -> Fields;

    fn rating_scale(&self) -> RatingScale {
        RatingScale::HalfStars
    }

    /// Walk the document: every track record goes to `record` (which may
    /// modify it) and then, like every other event, to `emit`.
    fn walk(
        &self,
        reader: &mut Reader<Box<dyn BufRead>>,
        emit: &mut dyn FnMut(Event<'_>) -> Result<()>,
        record: &mut dyn FnMut(&mut Fragment) -> Result<()>,
    ) -> Result<()>;

    fn parse(&self, fragment: &Fragment) -> Option<ImportedTrack<Self::Key>>;

    fn key(&self, fragment: &Fragment) -> Option<Self::Key>;

    /// Substitute staged statistics into a record.
    fn apply(&self, fragment: &mut Fragment, changes: &StatisticsChanges);
}

type Pending<K> = Arc<Mutex<BTreeMap<K, StatisticsChanges>>>;

/// Size and modification time of the library file when it was parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: SystemTime,
    len: u64,
}

impl Stamp {
    fn of(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        Some(Self {
            modified: meta.modified().ok()?,
            len: meta.len(),
        })
    }
}

struct Cached<K> {
    stamp: Option<Stamp>,
    records: Arc<Vec<ImportedTrack<K>>>,
}

/// A provider reading and writing an XML library file.
pub struct XmlImporter<F: XmlFormat> {
    identity: ImporterIdentity,
    path: PathBuf,
    format: F,
    cache: Mutex<Option<Cached<F::Key>>>,
    pending: Pending<F::Key>,
    abort: AbortToken,
}

impl<F: XmlFormat> XmlImporter<F> {
    pub fn from_parts(identity: ImporterIdentity, path: PathBuf, format: F) -> Self {
        Self {
            identity,
            path,
            format,
            cache: Mutex::new(None),
            pending: Arc::default(),
            abort: AbortToken::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Reader<Box<dyn BufRead>>> {
        let file = File::open(&self.path)?;
        Ok(Reader::from_reader(Box::new(BufReader::new(file))))
    }

    fn cache(&self) -> MutexGuard<'_, Option<Cached<F::Key>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parse the library, again only when the file changed on disk.
    fn records(&self) -> Result<Arc<Vec<ImportedTrack<F::Key>>>> {
        let stamp = Stamp::of(&self.path);
        if let Some(cached) = self.cache().as_ref() {
            if stamp.is_some() && cached.stamp == stamp {
                return Ok(Arc::clone(&cached.records));
            }
            debug!(path = %self.path.display(), "Library changed on disk, reloading");
        }

        let mut reader = self.open()?;
        let mut records = Vec::new();
        self.format.walk(&mut reader, &mut |_| Ok(()), &mut |fragment| {
            if self.abort.is_aborted() {
                return Err(Error::Aborted);
            }
            if let Some(record) = self.format.parse(fragment) {
                records.push(record);
            }
            Ok(())
        })?;
        debug!(path = %self.path.display(), count = records.len(), "Parsed XML library");

        let records = Arc::new(records);
        *self.cache() = Some(Cached {
            stamp,
            records: Arc::clone(&records),
        });
        Ok(records)
    }
}

impl<F: XmlFormat> Provider for XmlImporter<F> {
    fn id(&self) -> String {
        self.identity.uid.clone()
    }

    fn pretty_name(&self) -> String {
        self.identity.name.clone()
    }

    fn description(&self) -> String {
        format!("{} ({})", self.format.description(), self.path.display())
    }

    fn icon(&self) -> String {
        self.format.icon().to_string()
    }

    fn reliable_track_metadata(&self) -> Fields {
        self.format.reliable_track_metadata()
    }

    fn writable_track_stats_data(&self) -> Fields {
        self.format.writable_track_stats_data()
    }

    fn rating_scale(&self) -> RatingScale {
        self.format.rating_scale()
    }

    fn artists(&self) -> BTreeSet<String> {
        self.abort.reset();
        match self.records() {
            Ok(records) => records
                .iter()
                .map(|r| r.metadata.artist.clone())
                .filter(|a| !a.is_empty())
                .collect(),
            Err(e) => {
                warn!(provider = %self.identity.uid, error = %e, "Failed to read library");
                BTreeSet::new()
            }
        }
    }

    fn artist_tracks(&self, artist: &str) -> Vec<TrackPtr> {
        let records = match self.records() {
            Ok(records) => records,
            Err(e) => {
                warn!(provider = %self.identity.uid, error = %e, "Failed to read library");
                return Vec::new();
            }
        };
        records
            .iter()
            .filter(|r| r.metadata.artist == artist)
            .map(|r| {
                let backend = XmlTrackBackend {
                    key: r.key.clone(),
                    pending: Arc::clone(&self.pending),
                };
                Arc::new(SimpleWritableTrack::new(
                    r.metadata.clone(),
                    r.statistics.clone(),
                    backend,
                )) as TrackPtr
            })
            .collect()
    }

    fn commit_tracks(&self) -> Result<()> {
        let pending = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if pending.is_empty() {
            return Ok(());
        }

        let mut written = 0_usize;
        let result = replace_file(&self.path, |out| {
            let mut writer = Writer::new(out);
            let mut reader = self.open()?;
            self.format.walk(
                &mut reader,
                &mut |event| writer.write_event(event).map_err(Error::xml),
                &mut |fragment| {
                    if let Some(changes) = self.format.key(fragment).and_then(|k| pending.get(&k)) {
                        self.format.apply(fragment, changes);
                        written += 1;
                    }
                    Ok(())
                },
            )
        });
        *self.cache() = None;

        match result {
            Ok(()) => {
                info!(path = %self.path.display(), tracks = written, "Wrote statistics");
                Ok(())
            }
            Err(e) => {
                // The file is untouched; the next run reads it and stages again.
                warn!(
                    path = %self.path.display(),
                    dropped = pending.len(),
                    "Discarding unwritten statistics"
                );
                Err(e)
            }
        }
    }

    fn abort(&self) {
        self.abort.abort();
    }
}

/// Records a track's changes until the provider flushes the file.
struct XmlTrackBackend<K> {
    key: K,
    pending: Pending<K>,
}

impl<K: Ord + Clone + Send + Sync> TrackBackend for XmlTrackBackend<K> {
    fn commit(
        &self,
        _metadata: &TrackMetadata,
        _previous: &TrackStatistics,
        changes: &StatisticsChanges,
    ) -> Result<()> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = pending.entry(self.key.clone()).or_default();
        merge_changes(entry, changes);
        Ok(())
    }
}

fn merge_changes(into: &mut StatisticsChanges, changes: &StatisticsChanges) {
    if changes.first_played.is_some() {
        into.first_played = changes.first_played;
    }
    if changes.last_played.is_some() {
        into.last_played = changes.last_played;
    }
    if changes.rating.is_some() {
        into.rating = changes.rating;
    }
    if changes.play_count.is_some() {
        into.play_count = changes.play_count;
    }
    if changes.labels.is_some() {
        into.labels.clone_from(&changes.labels);
    }
}
