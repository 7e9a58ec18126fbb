//! Per-entity migration services.
//!
//! Every entity goes through the same record loop: ledger lookup, clean,
//! resolve references, write the target row and the ledger item in one
//! transaction. Record-level problems become [`RecordFailure`] values; only
//! orchestration problems are returned as `Err`.

pub mod category;
pub mod document;
pub mod menu;
pub mod news;
pub mod page;

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;

use crate::cleaner::CleanOutcome;
use crate::entity::EntityType;
use crate::error::{MigrationError, MigrationResult};
use crate::ledger::{self, ItemOutcome, ItemStatus};
use crate::source::{RawRecord, value_as_i64};
use crate::target;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StepStats {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StepStats {
    pub fn processed(&self) -> usize {
        self.success + self.failed
    }

    pub fn total(&self) -> usize {
        self.success + self.failed + self.skipped
    }

    pub fn absorb(&mut self, other: StepStats) {
        self.success += other.success;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub entity_type: EntityType,
    pub source_id: Option<i64>,
    pub message: String,
}

/// Why a record could not be written.
#[derive(Debug)]
pub enum WriteError {
    /// The record itself is unacceptable (unresolved reference, bad data).
    Rejected(String),
    Store(MigrationError),
}

impl WriteError {
    /// Message to record against the item. Transient store errors are not a
    /// property of the record and abort the step instead.
    fn into_record_message(self) -> MigrationResult<String> {
        match self {
            Self::Rejected(message) => Ok(message),
            Self::Store(err) if err.is_transient() => Err(err),
            Self::Store(err) => Ok(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for WriteError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(MigrationError::Database(err))
    }
}

impl From<MigrationError> for WriteError {
    fn from(err: MigrationError) -> Self {
        Self::Store(err)
    }
}

/// State threaded through one run's entity steps.
#[derive(Debug)]
pub struct StepContext {
    pub run_id: i64,
    pub force: bool,
    pub deadline: Option<Instant>,
    pub failures: Vec<RecordFailure>,
    /// Counts of the step in flight; taken when the step finishes, so an
    /// aborted step still leaves what it did here.
    pub progress: StepStats,
}

impl StepContext {
    pub fn new(run_id: i64, force: bool, deadline: Option<Instant>) -> Self {
        Self {
            run_id,
            force,
            deadline,
            failures: Vec::new(),
            progress: StepStats::default(),
        }
    }

    pub fn check_deadline(&self, entity_type: EntityType) -> MigrationResult<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(MigrationError::Timeout(entity_type.to_string()))
            }
            _ => Ok(()),
        }
    }
}

pub trait EntityMigrator {
    type Prepared;
    type Resolved;

    fn entity_type(&self) -> EntityType;

    /// Clean and validate one raw record.
    fn prepare(&self, record: &RawRecord) -> Result<CleanOutcome<Self::Prepared>, String>;

    /// Look up the target ids of everything the record references.
    fn resolve(
        &self,
        connection: &Connection,
        prepared: Self::Prepared,
    ) -> Result<Self::Resolved, WriteError>;

    /// Insert or update the target row, returning its id.
    fn write(
        &self,
        connection: &Connection,
        resolved: &Self::Resolved,
        existing_target: Option<i64>,
    ) -> Result<i64, WriteError>;
}

/// Run the shared record loop for one entity type.
pub fn migrate_records<'r, M, I>(
    connection: &mut Connection,
    context: &mut StepContext,
    migrator: &M,
    records: I,
) -> MigrationResult<StepStats>
where
    M: EntityMigrator,
    I: IntoIterator<Item = &'r RawRecord>,
{
    let entity_type = migrator.entity_type();
    context.progress = StepStats::default();

    for record in records {
        context.check_deadline(entity_type)?;
        let (source_id, existing_target, prepared) =
            match preflight(connection, context, entity_type, record, |raw| {
                migrator.prepare(raw)
            })? {
                Preflight::Proceed {
                    source_id,
                    existing_target,
                    prepared,
                } => (source_id, existing_target, prepared),
                Preflight::Skipped => {
                    context.progress.skipped += 1;
                    continue;
                }
                Preflight::Failed => {
                    context.progress.failed += 1;
                    continue;
                }
            };

        let transaction = connection.transaction()?;
        let written = migrator
            .resolve(&transaction, prepared)
            .and_then(|resolved| migrator.write(&transaction, &resolved, existing_target))
            .and_then(|target_id| {
                ledger::record_item(
                    &transaction,
                    context.run_id,
                    entity_type,
                    source_id,
                    &record.payload,
                    &ItemOutcome::Completed { target_id },
                )?;
                Ok(target_id)
            });

        match written {
            Ok(_) => {
                transaction.commit()?;
                context.progress.success += 1;
            }
            Err(err) => {
                drop(transaction);
                let message = err.into_record_message()?;
                fail_record(
                    connection,
                    context,
                    entity_type,
                    Some(source_id),
                    &record.payload,
                    message,
                    existing_target.is_some(),
                )?;
                context.progress.failed += 1;
            }
        }
    }

    let stats = std::mem::take(&mut context.progress);
    tracing::info!(
        entity = %entity_type,
        success = stats.success,
        failed = stats.failed,
        skipped = stats.skipped,
        "entity step finished"
    );
    Ok(stats)
}

pub(crate) enum Preflight<T> {
    Proceed {
        source_id: i64,
        existing_target: Option<i64>,
        prepared: T,
    },
    Skipped,
    Failed,
}

/// Ledger lookup and cleaning, shared by the generic loop and the menu
/// item passes. Failures and exclusions are recorded here.
pub(crate) fn preflight<T>(
    connection: &Connection,
    context: &mut StepContext,
    entity_type: EntityType,
    record: &RawRecord,
    prepare: impl FnOnce(&RawRecord) -> Result<CleanOutcome<T>, String>,
) -> MigrationResult<Preflight<T>> {
    let Some(source_id) = record.source_id().filter(|id| *id > 0) else {
        fail_record(
            connection,
            context,
            entity_type,
            None,
            &record.payload,
            format!("record #{} has no legacy id", record.position + 1),
            false,
        )?;
        return Ok(Preflight::Failed);
    };

    let existing_target = ledger::find_item(connection, entity_type, source_id)?
        .filter(|item| item.status == ItemStatus::Completed)
        .and_then(|item| item.target_id);
    if existing_target.is_some() && !context.force {
        return Ok(Preflight::Skipped);
    }

    match prepare(record) {
        Ok(CleanOutcome::Ready(prepared)) => Ok(Preflight::Proceed {
            source_id,
            existing_target,
            prepared,
        }),
        Ok(CleanOutcome::Excluded(reason)) => {
            if existing_target.is_none() {
                ledger::record_item(
                    connection,
                    context.run_id,
                    entity_type,
                    source_id,
                    &record.payload,
                    &ItemOutcome::Skipped { reason },
                )?;
            }
            Ok(Preflight::Skipped)
        }
        Err(message) => {
            fail_record(
                connection,
                context,
                entity_type,
                Some(source_id),
                &record.payload,
                message,
                existing_target.is_some(),
            )?;
            Ok(Preflight::Failed)
        }
    }
}

/// Record a failed item. A ledger item that already points at a completed
/// target is left alone; the failure is only reported on the run.
pub(crate) fn fail_record(
    connection: &Connection,
    context: &mut StepContext,
    entity_type: EntityType,
    source_id: Option<i64>,
    payload: &Value,
    message: String,
    has_completed_target: bool,
) -> MigrationResult<()> {
    tracing::warn!(
        entity = %entity_type,
        source_id = ?source_id,
        error = %message,
        "record failed"
    );
    if let Some(source_id) = source_id.filter(|_| !has_completed_target) {
        ledger::record_item(
            connection,
            context.run_id,
            entity_type,
            source_id,
            payload,
            &ItemOutcome::Failed {
                message: message.clone(),
            },
        )?;
    }
    context.failures.push(RecordFailure {
        entity_type,
        source_id,
        message,
    });
    Ok(())
}

/// Target id of a migrated record, provided its target row still exists.
pub fn resolve_reference(
    connection: &Connection,
    entity_type: EntityType,
    source_id: i64,
) -> MigrationResult<Option<i64>> {
    match ledger::completed_target(connection, entity_type, source_id)? {
        Some(target_id) if target::exists(connection, entity_type, target_id)? => {
            Ok(Some(target_id))
        }
        _ => Ok(None),
    }
}

/// Like [`resolve_reference`] for a required category link.
pub(crate) fn require_category(
    connection: &Connection,
    category_source_id: Option<i64>,
) -> Result<Option<i64>, WriteError> {
    let Some(source_id) = category_source_id else {
        return Ok(None);
    };
    resolve_reference(connection, EntityType::Categories, source_id)?
        .map(Some)
        .ok_or_else(|| {
            WriteError::Rejected(format!("parent category {source_id} not yet migrated"))
        })
}

/// Legacy parent id as written in the raw payload (`parent_id` or `parent`).
pub(crate) fn legacy_parent(record: &RawRecord) -> Option<i64> {
    record
        .payload
        .get("parent_id")
        .and_then(value_as_i64)
        .or_else(|| record.payload.get("parent").and_then(value_as_i64))
}

/// Reorder records so that a parent present in the batch comes before its
/// children. Records keep their relative order otherwise; cycles are left
/// as found and fail on resolution.
pub(crate) fn parent_first_order<'r>(
    records: &'r [RawRecord],
    parent_of: impl Fn(&RawRecord) -> Option<i64>,
) -> Vec<&'r RawRecord> {
    let index_by_id: HashMap<i64, usize> = records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| record.source_id().map(|id| (id, index)))
        .collect();
    let mut emitted = vec![false; records.len()];
    let mut ordered = Vec::with_capacity(records.len());

    for start in 0..records.len() {
        let mut chain = Vec::new();
        let mut on_chain = HashSet::new();
        let mut cursor = Some(start);
        while let Some(index) = cursor {
            if emitted[index] || !on_chain.insert(index) {
                break;
            }
            chain.push(index);
            cursor = parent_of(&records[index]).and_then(|parent| index_by_id.get(&parent).copied());
        }
        for index in chain.into_iter().rev() {
            emitted[index] = true;
            ordered.push(&records[index]);
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn records(values: Vec<Value>) -> Vec<RawRecord> {
        values
            .into_iter()
            .enumerate()
            .map(|(position, payload)| RawRecord::new(position, payload))
            .collect()
    }

    fn ids(ordered: &[&RawRecord]) -> Vec<i64> {
        ordered
            .iter()
            .filter_map(|record| record.source_id())
            .collect()
    }

    #[test]
    fn parents_are_moved_before_children() {
        let input = records(vec![
            json!({"id": 3, "parent": 2}),
            json!({"id": 4}),
            json!({"id": 2, "parent_id": 1}),
            json!({"id": 1}),
        ]);
        assert_eq!(ids(&parent_first_order(&input, legacy_parent)), vec![1, 2, 3, 4]);
    }

    #[test]
    fn cycles_do_not_loop_forever() {
        let input = records(vec![
            json!({"id": 1, "parent": 2}),
            json!({"id": 2, "parent": 1}),
            json!({"id": 5}),
        ]);
        let ordered = parent_first_order(&input, legacy_parent);
        assert_eq!(ordered.len(), 3);
        assert_eq!(ids(&ordered), vec![2, 1, 5]);
    }

    #[test]
    fn deep_chains_are_fully_ordered() {
        let input = records(
            (1..=100)
                .rev()
                .map(|id| {
                    if id == 1 {
                        json!({"id": id})
                    } else {
                        json!({"id": id, "parent": id - 1})
                    }
                })
                .collect(),
        );
        let expected: Vec<i64> = (1..=100).collect();
        assert_eq!(ids(&parent_first_order(&input, legacy_parent)), expected);
    }

    #[test]
    fn step_stats_processed_excludes_skipped() {
        let stats = StepStats {
            success: 4,
            failed: 1,
            skipped: 3,
        };
        assert_eq!(stats.processed(), 5);
        assert_eq!(stats.total(), 8);
    }

    #[test]
    fn expired_deadline_is_a_timeout() {
        let context = StepContext::new(1, false, Some(Instant::now()));
        let err = context
            .check_deadline(EntityType::News)
            .expect_err("deadline passed");
        assert!(matches!(err, MigrationError::Timeout(_)));
    }
}
