//! Legacy Joomla → CMS migration engine: cleaning, per-entity upserts with a
//! provenance ledger, orchestration, rollback and integrity reporting.

pub mod cleaner;
pub mod config;
pub mod entity;
pub mod error;
pub mod job;
pub mod ledger;
pub mod manager;
pub mod report;
pub mod rollback;
pub mod runtime;
pub mod sanitize;
pub mod schema;
pub mod services;
pub mod source;
pub mod target;

pub use entity::EntityType;
pub use error::{MigrationError, MigrationResult};

use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
