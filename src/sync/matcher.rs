//! Track matching across providers.
//!
//! Artists are grouped by normalized name. For one artist the tracks of all
//! providers are joined pairwise: two tracks of different providers belong
//! together when they are equal on the identity fields both providers can be
//! trusted with (and the user wants matched on). The groups are the connected
//! components of that relation, so they do not depend on the order in which
//! providers or tracks are enumerated.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::tuple::{TrackTuple, TupleMember};
use crate::fields::Fields;
use crate::provider::{ProviderPtr, TrackPtr};
use crate::track::normalize;

/// One artist as spelled by each provider that knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtistGroup {
    /// Normalized name.
    pub key: String,
    /// Provider index -> that provider's spellings.
    pub spellings: BTreeMap<usize, BTreeSet<String>>,
}

impl ArtistGroup {
    /// Name to show for the group: the first spelling found.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.spellings
            .values()
            .flat_map(BTreeSet::iter)
            .next()
            .map_or(self.key.as_str(), String::as_str)
    }
}

/// Outcome of matching one artist.
#[derive(Debug, Default)]
pub struct ArtistMatch {
    pub tuples: Vec<TrackTuple>,
    /// Tracks no other provider has.
    pub unique: Vec<TupleMember>,
    /// Groups holding more than one track of some provider.
    pub duplicates: Vec<Vec<TupleMember>>,
}

/// Group artist names of all providers by normalized name, keeping only
/// artists at least two providers know.
#[must_use]
pub fn group_artists(artists: &[BTreeSet<String>]) -> Vec<ArtistGroup> {
    let mut groups: BTreeMap<String, BTreeMap<usize, BTreeSet<String>>> = BTreeMap::new();
    for (index, names) in artists.iter().enumerate() {
        for name in names {
            let key = normalize(name);
            if key.is_empty() {
                continue;
            }
            groups
                .entry(key)
                .or_default()
                .entry(index)
                .or_default()
                .insert(name.clone());
        }
    }
    groups
        .into_iter()
        .filter(|(_, spellings)| spellings.len() >= 2)
        .map(|(key, spellings)| ArtistGroup { key, spellings })
        .collect()
}

/// Disjoint-set forest over track indices.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        match self.rank[a].cmp(&self.rank[b]) {
            Ordering::Less => self.parent[a] = b,
            Ordering::Greater => self.parent[b] = a,
            Ordering::Equal => {
                self.parent[b] = a;
                self.rank[a] += 1;
            }
        }
    }
}

/// Groups tracks of several providers into tuples.
pub struct Matcher {
    providers: Vec<ProviderPtr>,
    match_fields: Fields,
}

impl Matcher {
    /// `match_fields` limits which identity fields are compared at all.
    #[must_use]
    pub fn new(providers: Vec<ProviderPtr>, match_fields: Fields) -> Self {
        Self {
            providers,
            match_fields: match_fields & Fields::IDENTITY,
        }
    }

    #[must_use]
    pub fn providers(&self) -> &[ProviderPtr] {
        &self.providers
    }

    /// Fields compared between tracks of providers `a` and `b`.
    #[must_use]
    pub fn match_mask(&self, a: usize, b: usize) -> Fields {
        self.providers[a].reliable_track_metadata()
            & self.providers[b].reliable_track_metadata()
            & self.match_fields
    }

    /// Fetch every provider's artists once and group them.
    #[must_use]
    pub fn artist_groups(&self) -> Vec<ArtistGroup> {
        let artists: Vec<BTreeSet<String>> = self.providers.iter().map(|p| p.artists()).collect();
        for (provider, names) in self.providers.iter().zip(&artists) {
            debug!(provider = %provider.id(), artists = names.len(), "Fetched artists");
        }
        group_artists(&artists)
    }

    /// Fetch and match the tracks of one artist.
    #[must_use]
    pub fn match_artist(&self, group: &ArtistGroup) -> ArtistMatch {
        let mut tracks: Vec<(usize, TrackPtr)> = Vec::new();
        for (&index, spellings) in &group.spellings {
            for spelling in spellings {
                tracks.extend(
                    self.providers[index]
                        .artist_tracks(spelling)
                        .into_iter()
                        .map(|track| (index, track)),
                );
            }
        }
        self.match_tracks(tracks)
    }

    /// Group already fetched `(provider index, track)` pairs.
    #[must_use]
    pub fn match_tracks(&self, tracks: Vec<(usize, TrackPtr)>) -> ArtistMatch {
        let mut sets = UnionFind::new(tracks.len());
        for i in 0..tracks.len() {
            for j in (i + 1)..tracks.len() {
                let (pi, ti) = &tracks[i];
                let (pj, tj) = &tracks[j];
                if pi == pj {
                    continue;
                }
                if ti.metadata().equals(tj.metadata(), self.match_mask(*pi, *pj)) {
                    sets.union(i, j);
                }
            }
        }

        let mut components: BTreeMap<usize, Vec<(usize, TrackPtr)>> = BTreeMap::new();
        for (index, entry) in tracks.into_iter().enumerate() {
            components.entry(sets.find(index)).or_default().push(entry);
        }

        let mut components: Vec<Vec<(usize, TrackPtr)>> = components.into_values().collect();
        for component in &mut components {
            component.sort_by(|(pa, ta), (pb, tb)| self.order(*pa, ta, *pb, tb));
        }
        components.sort_by(|a, b| self.order(a[0].0, &a[0].1, b[0].0, &b[0].1));

        let mut result = ArtistMatch::default();
        for component in components {
            let providers: BTreeSet<usize> = component.iter().map(|(p, _)| *p).collect();
            let members: Vec<TupleMember> = component
                .into_iter()
                .map(|(p, track)| TupleMember::new(self.providers[p].clone(), track))
                .collect();
            if members.len() == 1 {
                result.unique.extend(members);
            } else if providers.len() < members.len() {
                result.duplicates.push(members);
            } else {
                result.tuples.push(TrackTuple::new(members));
            }
        }
        result
    }

    /// Deterministic order: identity fields, then provider id.
    fn order(&self, pa: usize, ta: &TrackPtr, pb: usize, tb: &TrackPtr) -> Ordering {
        ta.metadata()
            .compare(tb.metadata(), Fields::IDENTITY)
            .then_with(|| self.providers[pa].id().cmp(&self.providers[pb].id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Provider;
    use crate::sync::testing::{ptr, stats, MemoryProvider};
    use crate::track::TrackMetadata;
    use std::sync::Arc;

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|n| (*n).to_string()).collect()
    }

    fn provider(id: &str, tracks: &[TrackMetadata]) -> Arc<MemoryProvider> {
        tracks
            .iter()
            .fold(MemoryProvider::new(id), |p, meta| p.track(meta.clone(), stats(0, 0)))
            .into_ptr()
    }

    fn titles(tuple: &TrackTuple) -> Vec<String> {
        tuple
            .members()
            .iter()
            .map(|m| format!("{}:{}", m.provider.id(), m.track.title()))
            .collect()
    }

    #[test]
    fn test_group_artists_by_normalized_name() {
        let groups = group_artists(&[
            names(&["Metallica", "Daft Punk", "Solo Artist"]),
            names(&["metallica ", "Daft Punk"]),
            names(&["METALLICA", "Metallica"]),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, "daft punk");
        assert_eq!(groups[1].key, "metallica");
        assert_eq!(groups[1].spellings.len(), 3);
        assert_eq!(groups[1].spellings[&2].len(), 2);
        assert_eq!(groups[1].display_name(), "Metallica");
    }

    #[test]
    fn test_matches_case_insensitively() {
        let a = provider("a", &[TrackMetadata::new("Aerodynamic", "Daft Punk")]);
        let b = provider("b", &[TrackMetadata::new("AERODYNAMIC", "daft punk")]);
        let matcher = Matcher::new(vec![ptr(&a), ptr(&b)], Fields::IDENTITY);

        let groups = matcher.artist_groups();
        assert_eq!(groups.len(), 1);
        let result = matcher.match_artist(&groups[0]);
        assert_eq!(result.tuples.len(), 1);
        assert!(result.unique.is_empty());
    }

    #[test]
    fn test_unreliable_fields_do_not_prevent_match() {
        let a = provider(
            "a",
            &[TrackMetadata::new("One", "Metallica").with_composer("Hetfield").with_year(1988)],
        );
        let b = MemoryProvider::new("b")
            .reliable(Fields::TITLE | Fields::ARTIST | Fields::ALBUM)
            .track(TrackMetadata::new("One", "Metallica"), stats(0, 0))
            .into_ptr();
        let matcher = Matcher::new(vec![ptr(&a), ptr(&b)], Fields::IDENTITY);
        let groups = matcher.artist_groups();
        let result = matcher.match_artist(&groups[0]);
        assert_eq!(result.tuples.len(), 1);

        // Without the reliability mask the year would keep them apart.
        let strict = MemoryProvider::new("c")
            .track(TrackMetadata::new("One", "Metallica"), stats(0, 0))
            .into_ptr();
        let matcher = Matcher::new(vec![ptr(&a), ptr(&strict)], Fields::IDENTITY);
        let result = matcher.match_artist(&matcher.artist_groups()[0]);
        assert!(result.tuples.is_empty());
        assert_eq!(result.unique.len(), 2);
    }

    #[test]
    fn test_match_fields_limit_comparison() {
        let a = provider("a", &[TrackMetadata::new("One", "Metallica").with_album("A")]);
        let b = provider("b", &[TrackMetadata::new("One", "Metallica").with_album("B")]);
        let matcher = Matcher::new(vec![ptr(&a), ptr(&b)], Fields::TITLE | Fields::ARTIST);
        let result = matcher.match_artist(&matcher.artist_groups()[0]);
        assert_eq!(result.tuples.len(), 1);
    }

    #[test]
    fn test_transitive_groups() {
        // a matches b on title/artist; b matches c on title/artist/album.
        let a = MemoryProvider::new("a")
            .reliable(Fields::TITLE | Fields::ARTIST)
            .track(TrackMetadata::new("One", "Metallica").with_album("X"), stats(0, 0))
            .into_ptr();
        let b = provider("b", &[TrackMetadata::new("One", "Metallica").with_album("Y")]);
        let c = provider("c", &[TrackMetadata::new("One", "Metallica").with_album("Y")]);
        let matcher = Matcher::new(vec![ptr(&a), ptr(&b), ptr(&c)], Fields::IDENTITY);
        let result = matcher.match_artist(&matcher.artist_groups()[0]);
        assert_eq!(result.tuples.len(), 1);
        assert_eq!(result.tuples[0].provider_ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_same_provider_copies_are_duplicates() {
        let a = provider(
            "a",
            &[
                TrackMetadata::new("One", "Metallica"),
                TrackMetadata::new("One", "Metallica"),
            ],
        );
        let b = provider("b", &[TrackMetadata::new("One", "Metallica")]);
        let matcher = Matcher::new(vec![ptr(&a), ptr(&b)], Fields::IDENTITY);
        let result = matcher.match_artist(&matcher.artist_groups()[0]);
        assert!(result.tuples.is_empty());
        assert_eq!(result.duplicates.len(), 1);
        assert_eq!(result.duplicates[0].len(), 3);
    }

    #[test]
    fn test_result_is_independent_of_provider_order() {
        let tracks = [
            TrackMetadata::new("One", "Metallica"),
            TrackMetadata::new("Fuel", "Metallica"),
            TrackMetadata::new("Battery", "Metallica"),
        ];
        let a = provider("a", &tracks);
        let b = provider("b", &[tracks[2].clone(), tracks[0].clone()]);
        let c = provider("c", &[tracks[1].clone(), tracks[0].clone()]);

        let forward = Matcher::new(vec![ptr(&a), ptr(&b), ptr(&c)], Fields::IDENTITY);
        let backward = Matcher::new(vec![ptr(&c), ptr(&b), ptr(&a)], Fields::IDENTITY);
        let first = forward.match_artist(&forward.artist_groups()[0]);
        let second = backward.match_artist(&backward.artist_groups()[0]);

        let render = |m: &ArtistMatch| m.tuples.iter().map(titles).collect::<Vec<_>>();
        assert_eq!(render(&first), render(&second));
        assert_eq!(
            render(&first),
            vec![
                vec!["a:Battery", "b:Battery"],
                vec!["a:Fuel", "c:Fuel"],
                vec!["a:One", "b:One", "c:One"],
            ]
        );
    }
}
