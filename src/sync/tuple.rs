//! Track tuples and the merge policy.
//!
//! A tuple holds the copies of one song, at most one per provider. Every
//! statistics field is merged on its own:
//!
//! * rating: the highest non-zero rating (or the override provider's rating),
//!   rounded to the coarsest scale among the members that store ratings;
//! * first played: the earliest timestamp; last played: the latest one;
//! * play count: `max(count - recent) + sum(recent)`, i.e. the maximum when
//!   no provider reports recent plays;
//! * labels: the union of member labels (or of the override providers'
//!   labels) without the excluded ones.
//!
//! Excluded labels are neither propagated nor deleted: a member keeps the
//! excluded labels it already had.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::fields::Fields;
use crate::provider::{ProviderPtr, TrackPtr};
use crate::track::Labels;
use crate::types::{PlayCount, Rating, RatingScale};

/// Fields to synchronize and labels to leave alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePolicy {
    pub fields: Fields,
    pub excluded_labels: Labels,
}

impl MergePolicy {
    #[must_use]
    pub fn new(fields: Fields, excluded_labels: Labels) -> Self {
        Self {
            fields: fields & Fields::STATISTICS,
            excluded_labels,
        }
    }
}

/// One provider's copy of the song.
#[derive(Clone)]
pub struct TupleMember {
    pub provider: ProviderPtr,
    pub track: TrackPtr,
}

impl TupleMember {
    #[must_use]
    pub fn new(provider: ProviderPtr, track: TrackPtr) -> Self {
        Self { provider, track }
    }

    #[must_use]
    pub fn provider_id(&self) -> String {
        self.provider.id()
    }
}

impl fmt::Debug for TupleMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TupleMember")
            .field("provider", &self.provider.id())
            .field("track", &self.track.describe())
            .finish()
    }
}

/// Merged values of every statistics field.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Synced {
    first_played: Option<DateTime<Utc>>,
    last_played: Option<DateTime<Utc>>,
    rating: Rating,
    play_count: PlayCount,
    labels: Labels,
}

/// The copies of one song across providers.
#[derive(Debug, Clone)]
pub struct TrackTuple {
    /// Ordered by provider id.
    members: Vec<TupleMember>,
    rating_provider: Option<String>,
    label_providers: BTreeSet<String>,
}

impl TrackTuple {
    #[must_use]
    pub fn new(mut members: Vec<TupleMember>) -> Self {
        members.sort_by_cached_key(TupleMember::provider_id);
        Self {
            members,
            rating_provider: None,
            label_providers: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn members(&self) -> &[TupleMember] {
        &self.members
    }

    #[must_use]
    pub fn provider_ids(&self) -> Vec<String> {
        self.members.iter().map(TupleMember::provider_id).collect()
    }

    /// The copy held by `provider_id`.
    #[must_use]
    pub fn track(&self, provider_id: &str) -> Option<&TrackPtr> {
        self.member(provider_id).map(|m| &m.track)
    }

    fn member(&self, provider_id: &str) -> Option<&TupleMember> {
        self.members.iter().find(|m| m.provider.id() == provider_id)
    }

    #[must_use]
    pub fn describe(&self) -> String {
        self.members
            .first()
            .map(|m| m.track.describe())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn rating_provider(&self) -> Option<&str> {
        self.rating_provider.as_deref()
    }

    /// Take the rating from `provider` instead of the maximum; `None` resets.
    /// Returns `false` (and changes nothing) if `provider` is not a member.
    pub fn set_rating_provider(&mut self, provider: Option<&str>) -> bool {
        match provider {
            Some(id) if self.member(id).is_none() => false,
            _ => {
                self.rating_provider = provider.map(String::from);
                true
            }
        }
    }

    #[must_use]
    pub fn label_providers(&self) -> &BTreeSet<String> {
        &self.label_providers
    }

    /// Merge labels only from `providers`; non-members are dropped. An empty
    /// set means all members.
    pub fn set_label_providers(&mut self, providers: BTreeSet<String>) {
        self.label_providers = providers
            .into_iter()
            .filter(|id| self.member(id).is_some())
            .collect();
    }

    // ------------------------------------------------------------------------
    // Merged values
    // ------------------------------------------------------------------------

    /// Coarsest scale among the members that write ratings. A merged rating
    /// finer than that would read back differently on the next run.
    #[must_use]
    pub fn rating_scale(&self) -> RatingScale {
        self.members
            .iter()
            .filter(|m| m.provider.writable_track_stats_data().contains(Fields::RATING))
            .map(|m| m.provider.rating_scale())
            .max()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn synced_rating(&self) -> Rating {
        let rating = match self.rating_provider.as_deref().and_then(|id| self.member(id)) {
            Some(member) => member.track.rating(),
            None => self
                .members
                .iter()
                .map(|m| m.track.rating())
                .filter(|r| r.is_rated())
                .max()
                .unwrap_or(Rating::UNRATED),
        };
        self.rating_scale().quantize(rating)
    }

    #[must_use]
    pub fn synced_first_played(&self) -> Option<DateTime<Utc>> {
        self.members.iter().filter_map(|m| m.track.first_played()).min()
    }

    #[must_use]
    pub fn synced_last_played(&self) -> Option<DateTime<Utc>> {
        self.members.iter().filter_map(|m| m.track.last_played()).max()
    }

    /// Plays recorded before the last device sync are shared, recent plays
    /// happened on one provider only.
    #[must_use]
    pub fn synced_play_count(&self) -> PlayCount {
        let mut recent_total = PlayCount::default();
        let mut shared = PlayCount::default();
        for member in &self.members {
            let recent = member.track.recent_play_count();
            shared = shared.max(member.track.play_count() - recent);
            recent_total += recent;
        }
        shared + recent_total
    }

    /// Union of member labels without the excluded ones.
    #[must_use]
    pub fn synced_labels(&self, excluded: &Labels) -> Labels {
        self.members
            .iter()
            .filter(|m| {
                self.label_providers.is_empty() || self.label_providers.contains(&m.provider.id())
            })
            .flat_map(|m| m.track.labels())
            .filter(|label| !excluded.contains(label))
            .collect()
    }

    fn synced(&self, excluded: &Labels) -> Synced {
        Synced {
            first_played: self.synced_first_played(),
            last_played: self.synced_last_played(),
            rating: self.synced_rating(),
            play_count: self.synced_play_count(),
            labels: self.synced_labels(excluded),
        }
    }

    // ------------------------------------------------------------------------
    // Conflicts and updates
    // ------------------------------------------------------------------------

    /// Members disagree in a way the merge can only settle arbitrarily.
    #[must_use]
    pub fn field_has_conflict(&self, field: Fields, excluded: &Labels) -> bool {
        if field == Fields::RATING {
            let scale = self.rating_scale();
            let ratings: BTreeSet<Rating> = self
                .members
                .iter()
                .map(|m| scale.quantize(m.track.rating()))
                .filter(|r| r.is_rated())
                .collect();
            ratings.len() > 1
        } else if field == Fields::LABELS {
            let label_sets: BTreeSet<Labels> = self
                .members
                .iter()
                .map(|m| &m.track.labels() - excluded)
                .filter(|labels| !labels.is_empty())
                .collect();
            label_sets.len() > 1
        } else {
            false
        }
    }

    #[must_use]
    pub fn has_conflict(&self, policy: &MergePolicy) -> bool {
        policy
            .fields
            .singles()
            .any(|field| self.field_has_conflict(field, &policy.excluded_labels))
    }

    /// Whether synchronizing would write `field`, to `provider` or to any member.
    #[must_use]
    pub fn field_updated(&self, field: Fields, policy: &MergePolicy, provider: Option<&str>) -> bool {
        if !policy.fields.contains(field) {
            return false;
        }
        let synced = self.synced(&policy.excluded_labels);
        self.members
            .iter()
            .filter(|m| provider.is_none_or(|id| m.provider.id() == id))
            .any(|m| self.needs_update(m, field, &synced, &policy.excluded_labels))
    }

    #[must_use]
    pub fn has_update(&self, policy: &MergePolicy) -> bool {
        policy
            .fields
            .singles()
            .any(|field| self.field_updated(field, policy, None))
    }

    /// Stage the merged values on every member that differs and can take
    /// them. Returns the members with staged changes.
    pub fn stage(&self, policy: &MergePolicy) -> Vec<TupleMember> {
        let excluded = &policy.excluded_labels;
        let synced = self.synced(excluded);
        let mut staged = Vec::new();
        for member in &self.members {
            let track = &member.track;
            for field in policy.fields.singles() {
                if !self.needs_update(member, field, &synced, excluded) {
                    continue;
                }
                if field == Fields::FIRST_PLAYED {
                    track.set_first_played(synced.first_played);
                } else if field == Fields::LAST_PLAYED {
                    track.set_last_played(synced.last_played);
                } else if field == Fields::RATING {
                    track.set_rating(synced.rating);
                } else if field == Fields::PLAY_COUNT {
                    track.set_play_count(synced.play_count);
                } else if field == Fields::LABELS {
                    track.set_labels(member_labels(&track.labels(), &synced.labels, excluded));
                }
            }
            if track.has_pending_changes() {
                staged.push(member.clone());
            }
        }
        staged
    }

    fn needs_update(&self, member: &TupleMember, field: Fields, synced: &Synced, excluded: &Labels) -> bool {
        if !member.provider.writable_track_stats_data().contains(field) {
            return false;
        }
        let track = &member.track;
        if field == Fields::FIRST_PLAYED {
            track.first_played() != synced.first_played
        } else if field == Fields::LAST_PLAYED {
            track.last_played() != synced.last_played
        } else if field == Fields::RATING {
            track.rating() != synced.rating
        } else if field == Fields::PLAY_COUNT {
            track.play_count() != synced.play_count
        } else if field == Fields::LABELS {
            let own = track.labels();
            own != member_labels(&own, &synced.labels, excluded)
        } else {
            false
        }
    }
}

/// Labels to write to a member: the merged ones plus its own excluded ones.
fn member_labels(own: &Labels, merged: &Labels, excluded: &Labels) -> Labels {
    merged
        .iter()
        .chain(own.intersection(excluded))
        .cloned()
        .collect()
}
