//! Track field masks.
//!
//! Providers describe which identity fields they can be trusted with for
//! matching and which statistics they can write back as a [`Fields`] mask.
//! Every single field also has a stable symbolic name used in persisted
//! configuration, so the on-disk format never depends on bit positions.

use std::fmt;

use crate::error::{Error, Result};

bitflags::bitflags! {
    /// A set of track fields.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Fields: u32 {
        const TITLE = 1 << 0;
        const ARTIST = 1 << 1;
        const ALBUM = 1 << 2;
        const COMPOSER = 1 << 3;
        const YEAR = 1 << 4;
        const TRACK_NUMBER = 1 << 5;
        const DISC_NUMBER = 1 << 6;

        const FIRST_PLAYED = 1 << 7;
        const LAST_PLAYED = 1 << 8;
        const RATING = 1 << 9;
        const PLAY_COUNT = 1 << 10;
        const LABELS = 1 << 11;

        /// All identity fields usable for matching.
        const IDENTITY = Self::TITLE.bits()
            | Self::ARTIST.bits()
            | Self::ALBUM.bits()
            | Self::COMPOSER.bits()
            | Self::YEAR.bits()
            | Self::TRACK_NUMBER.bits()
            | Self::DISC_NUMBER.bits();

        /// All statistics fields that can be synchronized.
        const STATISTICS = Self::FIRST_PLAYED.bits()
            | Self::LAST_PLAYED.bits()
            | Self::RATING.bits()
            | Self::PLAY_COUNT.bits()
            | Self::LABELS.bits();

        const ALL = Self::IDENTITY.bits() | Self::STATISTICS.bits();
    }
}

impl Fields {
    pub const NONE: Self = Self::empty();

    /// Single fields in display order, paired with their symbolic names.
    const NAMED: [(Self, &'static str); 12] = [
        (Self::TITLE, "title"),
        (Self::ARTIST, "artist"),
        (Self::ALBUM, "album"),
        (Self::COMPOSER, "composer"),
        (Self::YEAR, "year"),
        (Self::TRACK_NUMBER, "trackNumber"),
        (Self::DISC_NUMBER, "discNumber"),
        (Self::FIRST_PLAYED, "firstPlayed"),
        (Self::LAST_PLAYED, "lastPlayed"),
        (Self::RATING, "rating"),
        (Self::PLAY_COUNT, "playCount"),
        (Self::LABELS, "labels"),
    ];

    /// Single fields contained in this mask, in display order.
    pub fn singles(self) -> impl Iterator<Item = Self> {
        Self::NAMED
            .into_iter()
            .map(|(field, _)| field)
            .filter(move |field| self.contains(*field))
    }

    /// Symbolic name of a single field, `None` for composite masks.
    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        Self::NAMED
            .iter()
            .find(|(field, _)| *field == self)
            .map(|(_, name)| *name)
    }

    /// Symbolic names of all fields in this mask.
    #[must_use]
    pub fn names(self) -> Vec<&'static str> {
        self.singles().filter_map(Self::name).collect()
    }

    /// Look up a single field by its symbolic name (case-insensitive).
    #[must_use]
    pub fn from_symbolic_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::NAMED
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(field, _)| *field)
    }

    /// Parse a list of symbolic names, failing on the first unknown one.
    pub fn parse_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        names.iter().try_fold(Self::NONE, |acc, name| {
            Self::from_symbolic_name(name.as_ref())
                .map(|field| acc | field)
                .ok_or_else(|| Error::config(format!("unknown field '{}'", name.as_ref())))
        })
    }
}

impl Default for Fields {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join(", "))
    }
}
