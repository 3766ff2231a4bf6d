//! # statsyncing
//!
//! Statistics synchronization between music libraries.
//!
//! This crate provides:
//! - A provider abstraction over the local collection and other players'
//!   libraries (Amarok 1.4, Banshee, Clementine, iTunes, Rhythmbox)
//! - Track matching across differently normalized metadata
//! - Field-by-field merging of ratings, play counts, play times and labels
//! - Transactional write-back to SQL databases and XML library files
//!
//! The entry point is [`sync::Controller`]: register providers, then call
//! [`sync::Controller::synchronize`].

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod collection;
pub mod config;
pub mod db;
pub mod display;
pub mod error;
pub mod fields;
pub mod importers;
pub mod provider;
pub mod sync;
pub mod track;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use fields::Fields;
pub use provider::{Preference, Provider, ProviderPtr, TrackPtr};
pub use sync::{Controller, SyncConfig, SyncMode, SyncReport};
pub use track::{Track, TrackMetadata, TrackStatistics};
pub use types::{PlayCount, Rating, RatingScale};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "statsyncing";
