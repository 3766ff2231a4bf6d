//! One synchronization run: match, merge, stage, commit, report.
//!
//! [`Process::prepare`] does all the reading and yields a [`SyncPlan`]. The
//! plan can be inspected and adjusted (rating and label overrides for
//! conflicting tuples) before [`SyncPlan::commit`] writes it back.

use std::collections::BTreeMap;
use std::thread;

use tracing::{debug, error, info, warn};

use super::matcher::Matcher;
use super::report::{CommitFailure, Conflict, SyncReport};
use super::tuple::{MergePolicy, TrackTuple};
use crate::fields::Fields;
use crate::provider::{AbortToken, ProviderPtr, TrackPtr};

/// How a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Started by the user; every registered provider takes part and
    /// conflicts may be resolved before committing.
    Interactive,
    /// Periodic run over enabled providers only.
    NonInteractive,
}

/// Reads every provider and builds a [`SyncPlan`].
pub struct Process {
    providers: Vec<ProviderPtr>,
    match_fields: Fields,
    policy: MergePolicy,
    abort: AbortToken,
}

impl Process {
    #[must_use]
    pub fn new(
        providers: Vec<ProviderPtr>,
        match_fields: Fields,
        policy: MergePolicy,
        abort: AbortToken,
    ) -> Self {
        Self {
            providers,
            match_fields,
            policy,
            abort,
        }
    }

    /// Match the tracks of every artist at least two providers know.
    #[must_use]
    pub fn prepare(self) -> SyncPlan {
        let mut report = SyncReport {
            providers: self.providers.iter().map(|p| p.id()).collect(),
            fields: self.policy.fields.names().into_iter().map(String::from).collect(),
            ..SyncReport::default()
        };
        info!(
            providers = ?report.providers,
            fields = %self.policy.fields,
            "Starting synchronization"
        );

        let matcher = Matcher::new(self.providers.clone(), self.match_fields);
        let groups = matcher.artist_groups();
        report.artists = groups.len();

        let mut tuples = Vec::new();
        for group in &groups {
            if self.abort.is_aborted() {
                warn!("Synchronization aborted while matching");
                report.aborted = true;
                break;
            }
            let matched = matcher.match_artist(group);
            debug!(
                artist = group.display_name(),
                tuples = matched.tuples.len(),
                unique = matched.unique.len(),
                duplicates = matched.duplicates.len(),
                "Matched artist"
            );
            report.unique_tracks += matched.unique.len();
            report.duplicates.extend(matched.duplicates.iter().map(|members| {
                members
                    .iter()
                    .map(|m| format!("{}: {}", m.provider_id(), m.track.describe()))
                    .collect()
            }));
            tuples.extend(matched.tuples);
        }
        report.tuples = tuples.len();

        SyncPlan {
            providers: self.providers,
            policy: self.policy,
            tuples,
            report,
            abort: self.abort,
        }
    }
}

/// Matched tuples waiting to be written.
pub struct SyncPlan {
    providers: Vec<ProviderPtr>,
    policy: MergePolicy,
    tuples: Vec<TrackTuple>,
    report: SyncReport,
    abort: AbortToken,
}

impl SyncPlan {
    #[must_use]
    pub fn tuples(&self) -> &[TrackTuple] {
        &self.tuples
    }

    #[must_use]
    pub const fn policy(&self) -> &MergePolicy {
        &self.policy
    }

    /// Narrow or widen the fields to write, e.g. after asking the user.
    pub fn set_fields(&mut self, fields: Fields) {
        self.policy.fields = fields & Fields::STATISTICS;
    }

    /// Tuples whose members disagree on a checked field.
    #[must_use]
    pub fn conflicts(&self) -> Vec<Conflict> {
        self.tuples
            .iter()
            .filter_map(|tuple| Conflict::of(tuple, &self.policy))
            .collect()
    }

    /// Number of tuples that would change something.
    #[must_use]
    pub fn pending_updates(&self) -> usize {
        self.tuples
            .iter()
            .filter(|tuple| tuple.has_update(&self.policy))
            .count()
    }

    /// Use `provider`'s rating for every tuple with a rating conflict.
    pub fn take_ratings_from(&mut self, provider: &str) {
        let excluded = &self.policy.excluded_labels;
        for tuple in &mut self.tuples {
            if tuple.field_has_conflict(Fields::RATING, excluded) {
                tuple.set_rating_provider(Some(provider));
            }
        }
    }

    /// Add `provider` to the label sources of every tuple with a label
    /// conflict.
    pub fn include_labels_from(&mut self, provider: &str) {
        let excluded = &self.policy.excluded_labels;
        for tuple in &mut self.tuples {
            if tuple.field_has_conflict(Fields::LABELS, excluded) {
                let mut providers = tuple.label_providers().clone();
                providers.insert(provider.to_string());
                tuple.set_label_providers(providers);
            }
        }
    }

    /// Drop `provider` from the label sources of every tuple with a label
    /// conflict; `None` goes back to merging all members.
    pub fn exclude_labels_from(&mut self, provider: Option<&str>) {
        let excluded = &self.policy.excluded_labels;
        for tuple in &mut self.tuples {
            if !tuple.field_has_conflict(Fields::LABELS, excluded) {
                continue;
            }
            let providers = match provider {
                Some(id) => {
                    let mut providers = tuple.label_providers().clone();
                    providers.remove(id);
                    providers
                }
                None => Default::default(),
            };
            tuple.set_label_providers(providers);
        }
    }

    /// Report of the matching phase alone.
    #[must_use]
    pub fn report(&self) -> SyncReport {
        let mut report = self.report.clone();
        report.conflicts = self.conflicts();
        report
    }

    /// Stage every tuple and commit the changes, one thread per provider.
    #[must_use]
    pub fn commit(self) -> SyncReport {
        let mut report = self.report();
        if report.aborted || self.abort.is_aborted() {
            report.aborted = true;
            return report;
        }

        let mut staged: BTreeMap<String, Vec<TrackPtr>> = BTreeMap::new();
        for tuple in &self.tuples {
            for member in tuple.stage(&self.policy) {
                staged.entry(member.provider_id()).or_default().push(member.track);
            }
        }
        if staged.is_empty() {
            info!("Everything is in sync");
            return report;
        }

        let abort = &self.abort;
        let results: Vec<ProviderOutcome> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .providers
                .iter()
                .filter_map(|provider| {
                    let tracks = staged.remove(&provider.id())?;
                    let provider = provider.clone();
                    Some((
                        provider.id(),
                        scope.spawn(move || commit_provider(&provider, &tracks, abort)),
                    ))
                })
                .collect();
            handles
                .into_iter()
                .map(|(id, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        error!(provider = %id, "Commit thread panicked");
                        ProviderOutcome {
                            provider: id.clone(),
                            updated: 0,
                            failures: vec![CommitFailure {
                                provider: id,
                                track: None,
                                error: "commit thread panicked".to_string(),
                            }],
                        }
                    })
                })
                .collect()
        });

        for outcome in results {
            report.record_updated(&outcome.provider, outcome.updated);
            report.failures.extend(outcome.failures);
        }
        report.aborted = self.abort.is_aborted();
        info!(
            updated = report.total_updated(),
            failures = report.failures.len(),
            "Synchronization finished"
        );
        report
    }
}

struct ProviderOutcome {
    provider: String,
    updated: usize,
    failures: Vec<CommitFailure>,
}

/// Commit `tracks` one by one, then flush the provider.
fn commit_provider(provider: &ProviderPtr, tracks: &[TrackPtr], abort: &AbortToken) -> ProviderOutcome {
    let id = provider.id();
    let mut outcome = ProviderOutcome {
        provider: id.clone(),
        updated: 0,
        failures: Vec::new(),
    };
    for track in tracks {
        if abort.is_aborted() {
            warn!(provider = %id, "Commit aborted");
            break;
        }
        match track.commit() {
            Ok(()) => outcome.updated += 1,
            Err(e) => {
                warn!(provider = %id, track = %track.describe(), error = %e, "Failed to commit track");
                outcome.failures.push(CommitFailure {
                    provider: id.clone(),
                    track: Some(track.describe()),
                    error: e.to_string(),
                });
            }
        }
    }
    // Only buffering providers do work here. A failed flush leaves their file
    // untouched and drops the buffered changes, so none of this run's updates
    // reached storage; the next run fetches and stages them again.
    if let Err(e) = provider.commit_tracks() {
        error!(provider = %id, error = %e, "Failed to write provider changes");
        outcome.failures.push(CommitFailure {
            provider: id.clone(),
            track: None,
            error: e.to_string(),
        });
        outcome.updated = 0;
    }
    debug!(provider = %id, updated = outcome.updated, "Committed provider");
    outcome
}
