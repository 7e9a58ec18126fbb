//! Compensating rollback over the ledger.

use std::collections::HashSet;

use rusqlite::Connection;
use serde::Serialize;

use crate::entity::EntityType;
use crate::error::{MigrationError, MigrationResult};
use crate::ledger::{self, ItemStatus, RunStatus};
use crate::target;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackScope {
    /// One entity type across all runs. Run statuses are untouched.
    Entity(EntityType),
    All,
    /// Everything one run migrated; the run ends as `rolled_back`.
    Run(i64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RollbackOutcome {
    pub deleted: usize,
    pub kept: usize,
}

/// Undo migrated records in reverse dependency order. Within a type, tree
/// rows go deepest first and the rest newest first. With `keep_records` only
/// the ledger is cleared; those rows count as kept.
///
/// A target row that cannot be deleted (typically because a row created in
/// the CMS after migration references it) counts as kept and its ledger item
/// is retained so the rollback can be retried.
pub fn rollback(
    connection: &mut Connection,
    scope: RollbackScope,
    keep_records: bool,
) -> MigrationResult<RollbackOutcome> {
    let mut run = match scope {
        RollbackScope::Run(id) => {
            let run = ledger::require_run(connection, id)?;
            match run.status {
                RunStatus::RolledBack => return Ok(RollbackOutcome::default()),
                RunStatus::Completed | RunStatus::Failed => Some(run),
                RunStatus::Pending | RunStatus::Running => {
                    return Err(MigrationError::InvalidRunState {
                        id,
                        expected: "completed or failed".to_string(),
                        actual: run.status.to_string(),
                    });
                }
            }
        }
        RollbackScope::Entity(_) | RollbackScope::All => None,
    };
    let run_id = run.as_ref().map(|run| run.id);

    let mut outcome = RollbackOutcome::default();
    for entity_type in EntityType::reverse_order() {
        if let RollbackScope::Entity(only) = scope {
            if only != entity_type {
                continue;
            }
        }
        let step = rollback_type(connection, entity_type, run_id, keep_records)?;
        tracing::info!(
            entity = %entity_type,
            deleted = step.deleted,
            kept = step.kept,
            keep_records,
            "rolled back entity type"
        );
        outcome.deleted += step.deleted;
        outcome.kept += step.kept;
    }

    if let Some(run) = run.as_mut() {
        ledger::set_rolled_back(connection, run)?;
        tracing::info!(run_id = run.id, "migration run rolled back");
    }
    Ok(outcome)
}

fn rollback_type(
    connection: &mut Connection,
    entity_type: EntityType,
    run_id: Option<i64>,
    keep_records: bool,
) -> MigrationResult<RollbackOutcome> {
    let mut outcome = RollbackOutcome::default();
    let mut items = ledger::items_for(connection, entity_type, run_id)?;
    if !keep_records && matches!(entity_type, EntityType::Categories | EntityType::MenuItems) {
        let mut depths = Vec::with_capacity(items.len());
        for item in &items {
            let depth = match item.target_id {
                Some(target_id) => tree_depth(connection, entity_type, target_id)?,
                None => 0,
            };
            depths.push(depth);
        }
        let mut ranked: Vec<_> = depths.into_iter().zip(items).collect();
        ranked.sort_by(|(left, _), (right, _)| right.cmp(left));
        items = ranked.into_iter().map(|(_, item)| item).collect();
    }

    for item in items {
        let target_id = match (item.status, item.target_id) {
            (ItemStatus::Completed, Some(target_id)) => target_id,
            _ => {
                ledger::delete_item(connection, item.id)?;
                continue;
            }
        };

        if keep_records {
            ledger::delete_item(connection, item.id)?;
            outcome.kept += 1;
            continue;
        }

        let transaction = connection.transaction()?;
        match target::delete(&transaction, entity_type, target_id) {
            Ok(_) => {
                ledger::delete_item(&transaction, item.id)?;
                transaction.commit()?;
                outcome.deleted += 1;
            }
            Err(err) => {
                drop(transaction);
                tracing::warn!(
                    entity = %entity_type,
                    source_id = item.source_id,
                    target_id,
                    error = %err,
                    "target row could not be deleted; ledger item kept"
                );
                outcome.kept += 1;
            }
        }
    }
    Ok(outcome)
}

/// Number of ancestors above a tree row. A parent loop ends the count.
fn tree_depth(connection: &Connection, entity_type: EntityType, id: i64) -> MigrationResult<usize> {
    let mut seen = HashSet::from([id]);
    let mut cursor = target::tree_parent(connection, entity_type, id)?;
    while let Some(parent) = cursor {
        if !seen.insert(parent) {
            break;
        }
        cursor = target::tree_parent(connection, entity_type, parent)?;
    }
    Ok(seen.len() - 1)
}
