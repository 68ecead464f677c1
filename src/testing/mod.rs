//! Testing helpers
//!
//! Provides:
//! - Fixture generators for the source store
//! - A reference time for reproducible snapshots

pub mod generators;

pub use generators::{base_time, FixtureBuilder};
