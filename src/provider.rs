//! Provider abstraction: one external source of track statistics.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fields::Fields;
use crate::track::Track;
use crate::types::RatingScale;

pub type TrackPtr = Arc<dyn Track>;
pub type ProviderPtr = Arc<dyn Provider>;

/// Whether a newly seen provider takes part in automatic synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Preference {
    /// Never synchronized automatically and never remembered.
    Never,
    NoByDefault,
    /// Ask the user the first time the provider shows up.
    Ask,
    YesByDefault,
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Never => "never",
            Self::NoByDefault => "no by default",
            Self::Ask => "ask",
            Self::YesByDefault => "yes by default",
        };
        f.write_str(name)
    }
}

/// Cooperative cancellation flag shared between a sync run and its providers.
#[derive(Debug, Clone, Default)]
pub struct AbortToken(Arc<AtomicBool>);

impl AbortToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag before a new run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A source of tracks and their statistics.
///
/// Failures while fetching are logged by the implementation and show up as
/// empty results; they never propagate into the synchronization core.
pub trait Provider: Send + Sync {
    /// Stable identifier, used as the persistence key.
    fn id(&self) -> String;

    fn pretty_name(&self) -> String;

    fn description(&self) -> String {
        String::new()
    }

    /// Icon name.
    fn icon(&self) -> String {
        "view-services-scripted-amarok".to_string()
    }

    fn default_preference(&self) -> Preference {
        Preference::NoByDefault
    }

    /// Identity fields this provider's values can be trusted with for matching.
    fn reliable_track_metadata(&self) -> Fields;

    /// Statistics fields this provider can write back.
    fn writable_track_stats_data(&self) -> Fields;

    /// Resolution at which written ratings read back.
    fn rating_scale(&self) -> RatingScale {
        RatingScale::HalfStars
    }

    /// Distinct artist names, trimmed. May be expensive.
    fn artists(&self) -> BTreeSet<String>;

    /// Tracks whose trimmed artist is exactly `artist`; unknown artists
    /// yield an empty list.
    fn artist_tracks(&self, artist: &str) -> Vec<TrackPtr>;

    /// Flush after every modified track of a run has been committed.
    fn commit_tracks(&self) -> Result<()> {
        Ok(())
    }

    /// Best-effort cancellation of an in-flight fetch.
    fn abort(&self) {}
}

impl fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id())
            .field("name", &self.pretty_name())
            .finish()
    }
}
