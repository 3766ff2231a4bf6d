//! Display utilities for formatting synchronization output.
//!
//! This module provides the formatting functions used by the `statsync`
//! binary to print reports, conflicts and provider lists in the terminal.
//!
//! # Functions
//!
//! - [`truncate`] - Truncate strings to a maximum length with ellipsis
//! - [`rating_stars`] - Render a 0-10 rating as five stars with halves
//! - [`print_section`] / [`print_section_simple`] - Print section headers
//! - [`display_report`] / [`display_conflicts`] / [`display_providers`] /
//!   [`display_fields`] - Display formatted results

use crate::fields::Fields;
use crate::sync::{Conflict, SyncConfig, SyncReport};
use crate::types::Rating;

/// Truncate a string to a maximum length, adding "..." if truncated.
///
/// Handles Unicode characters correctly by counting characters rather than bytes.
/// For `max_len < 3`, truncates without ellipsis since there's no room for "...".
///
/// # Examples
///
/// ```
/// use statsyncing::display::truncate;
///
/// assert_eq!(truncate("hello", 10), "hello");
/// assert_eq!(truncate("hello world", 8), "hello...");
/// assert_eq!(truncate("hello", 2), "he");
/// ```
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_len {
        s.to_string()
    } else if max_len < 3 {
        // No room for ellipsis, just truncate
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{truncated}...")
    }
}

/// Render a rating as five stars; an odd rating ends in a half star.
#[must_use]
pub fn rating_stars(rating: Rating) -> String {
    let value = usize::from(rating.get());
    let full = value / 2;
    let half = value % 2;
    let empty = 5 - full - half;
    format!("{}{}{}", "★".repeat(full), "½".repeat(half), "☆".repeat(empty))
}

/// Print a section header with equals signs.
pub fn print_section(title: &str) {
    println!("\n{}", "=".repeat(50));
    println!("  {title}");
    println!("{}", "=".repeat(50));
}

/// Print a simple section header with dashes.
pub fn print_section_simple(title: &str) {
    println!("\n{title}");
    println!("{}", "-".repeat(30));
}

/// Display the outcome of a synchronization run.
pub fn display_report(report: &SyncReport) {
    print_section("Synchronization");
    println!("  Providers:        {}", report.providers.join(", "));
    println!("  Fields:           {}", report.fields.join(", "));
    println!("  Shared artists:   {:>10}", report.artists);
    println!("  Matched tracks:   {:>10}", report.tuples);
    println!("  Unique tracks:    {:>10}", report.unique_tracks);
    println!("  Ambiguous:        {:>10}", report.duplicates.len());
    println!("  Tracks written:   {:>10}", report.total_updated());

    if !report.updated.is_empty() {
        print_section_simple("Written per provider");
        for (provider, count) in &report.updated {
            println!("  {:<36} {count:>6}", truncate(provider, 36));
        }
    }

    if !report.conflicts.is_empty() {
        print_section_simple("Conflicts");
        display_conflicts(&report.conflicts);
    }

    if !report.duplicates.is_empty() {
        print_section_simple("Ambiguous matches (not written)");
        for copies in &report.duplicates {
            for copy in copies {
                println!("  {}", truncate(copy, 70));
            }
            println!();
        }
    }

    if !report.failures.is_empty() {
        print_section_simple("Failures");
        for failure in &report.failures {
            let track = failure.track.as_deref().unwrap_or("(all tracks)");
            println!(
                "  {:<20} {:<35} {}",
                truncate(&failure.provider, 20),
                truncate(track, 35),
                failure.error
            );
        }
    }

    if report.aborted {
        println!("\n  Synchronization was aborted.");
    }
}

/// Display tuples whose members disagree.
pub fn display_conflicts(conflicts: &[Conflict]) {
    for conflict in conflicts {
        println!("  {} [{}]", truncate(&conflict.track, 60), conflict.fields.join(", "));
        if conflict.fields.iter().any(|f| f == "rating") {
            for (provider, rating) in &conflict.ratings {
                println!(
                    "      {:<30} {}",
                    truncate(provider, 30),
                    rating_stars(Rating::new(i64::from(*rating)))
                );
            }
            println!("      {:<30} {}", "-> result", rating_stars(conflict.merged_rating()));
        }
        if conflict.fields.iter().any(|f| f == "labels") {
            for (provider, labels) in &conflict.labels {
                let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
                println!("      {:<30} {}", truncate(provider, 30), labels.join(", "));
            }
        }
    }
}

/// Display remembered providers, marking the registered ones.
pub fn display_providers(config: &SyncConfig) {
    println!("  {:<38} {:<22} {:<8} {}", "ID", "Name", "Enabled", "Status");
    for (id, data) in config.providers() {
        println!(
            "  {:<38} {:<22} {:<8} {}",
            truncate(id, 38),
            truncate(&data.name, 22),
            if data.enabled { "yes" } else { "no" },
            if data.online { "online" } else { "offline" }
        );
    }
}

/// Display checked fields and excluded labels.
pub fn display_fields(config: &SyncConfig, available: Fields) {
    for field in available.singles() {
        let mark = if config.checked_fields().contains(field) { "x" } else { " " };
        println!("  [{mark}] {}", field.name().unwrap_or_default());
    }
    if !config.excluded_labels().is_empty() {
        let labels: Vec<&str> = config.excluded_labels().iter().map(String::as_str).collect();
        println!("\n  Excluded labels: {}", labels.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_string() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_long_string() {
        assert_eq!(truncate("hello world", 8), "hello...");
    }

    #[test]
    fn test_truncate_unicode() {
        assert_eq!(truncate("日本語テスト", 5), "日本...");
    }

    #[test]
    fn test_truncate_small_max_len() {
        assert_eq!(truncate("hello", 2), "he");
        assert_eq!(truncate("hello", 0), "");
        assert_eq!(truncate("hello", 3), "...");
    }

    #[test]
    fn test_rating_stars() {
        assert_eq!(rating_stars(Rating::UNRATED), "☆☆☆☆☆");
        assert_eq!(rating_stars(Rating::new(7)), "★★★½☆");
        assert_eq!(rating_stars(Rating::new(8)), "★★★★☆");
        assert_eq!(rating_stars(Rating::MAX), "★★★★★");
    }
}
