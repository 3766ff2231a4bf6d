//! Statistics synchronization core.
//!
//! [`Controller`] owns the registered providers and the persisted
//! [`SyncConfig`]. A run goes through [`Process`]: the [`matcher`] groups the
//! tracks of all providers into [`TrackTuple`]s, each tuple merges its
//! statistics field by field, and the changes are committed per provider.

pub mod config;
pub mod controller;
pub mod matcher;
pub mod process;
pub mod report;
pub mod tuple;

#[cfg(test)]
mod testing;

pub use config::{ProviderData, SyncConfig};
pub use controller::{AbortHandle, Asker, Controller};
pub use process::{Process, SyncMode, SyncPlan};
pub use report::{CommitFailure, Conflict, SyncReport};
pub use tuple::{MergePolicy, TrackTuple, TupleMember};
