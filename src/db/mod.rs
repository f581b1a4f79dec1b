//! Database layer for lessonforge
//!
//! SQLite persistence behind the [`ResumableStore`](crate::store::ResumableStore) seam.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`artifacts`]: Per-topic generated artifacts
//! - [`state`]: Process-wide runtime values (credential index, active topic)

use sqlx::sqlite::SqlitePool;

mod artifacts;
mod migrations;
mod state;

/// Database handle for lessonforge
pub struct Database {
    pool: SqlitePool,
}
