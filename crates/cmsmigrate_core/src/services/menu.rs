//! Menus and menu items.
//!
//! Menu items may name a parent that appears later in the export. Items are
//! therefore reordered parents first, and each item is written together with
//! its parent link and ledger entry in a single transaction.

use std::collections::{HashMap, HashSet};

use rusqlite::Connection;

use super::{
    EntityMigrator, Preflight, StepContext, StepStats, WriteError, fail_record, migrate_records,
    parent_first_order, preflight, resolve_reference,
};
use crate::cleaner::{CleanMenu, CleanMenuItem, CleanOutcome, clean_menu, clean_menu_item};
use crate::entity::EntityType;
use crate::error::MigrationResult;
use crate::ledger::{self, ItemOutcome};
use crate::source::RawRecord;
use crate::target;

pub const CYCLE_MESSAGE: &str = "menu item parent cycle";

pub struct MenuMigrator;

impl EntityMigrator for MenuMigrator {
    type Prepared = CleanMenu;
    type Resolved = CleanMenu;

    fn entity_type(&self) -> EntityType {
        EntityType::Menus
    }

    fn prepare(&self, record: &RawRecord) -> Result<CleanOutcome<CleanMenu>, String> {
        clean_menu(record)
    }

    fn resolve(&self, _connection: &Connection, record: CleanMenu) -> Result<CleanMenu, WriteError> {
        Ok(record)
    }

    fn write(
        &self,
        connection: &Connection,
        record: &CleanMenu,
        existing_target: Option<i64>,
    ) -> Result<i64, WriteError> {
        Ok(target::write_menu(connection, existing_target, record)?)
    }
}

pub fn migrate_menus(
    connection: &mut Connection,
    context: &mut StepContext,
    menus: &[RawRecord],
) -> MigrationResult<StepStats> {
    migrate_records(connection, context, &MenuMigrator, menus)
}

/// Migrate menu items parents first. A failed write leaves nothing behind:
/// an updated item keeps its previous row and parent link.
pub fn migrate_items(
    connection: &mut Connection,
    context: &mut StepContext,
    items: &[RawRecord],
) -> MigrationResult<StepStats> {
    let entity_type = EntityType::MenuItems;
    let parents = legacy_parent_map(items);
    let on_cycle = cycle_members(&parents);
    let ordered = parent_first_order(items, |record| {
        record
            .source_id()
            .and_then(|id| parents.get(&id).copied().flatten())
    });
    context.progress = StepStats::default();

    for record in ordered {
        context.check_deadline(entity_type)?;
        let (source_id, existing_target, item) =
            match preflight(connection, context, entity_type, record, clean_menu_item)? {
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

        if on_cycle.contains(&source_id) {
            fail_record(
                connection,
                context,
                entity_type,
                Some(source_id),
                &record.payload,
                CYCLE_MESSAGE.to_string(),
                existing_target.is_some(),
            )?;
            context.progress.failed += 1;
            continue;
        }

        let transaction = connection.transaction()?;
        let written = resolve_item(&transaction, &item)
            .and_then(|(menu_id, parent_id)| {
                Ok(target::write_menu_item(
                    &transaction,
                    existing_target,
                    &item,
                    menu_id,
                    parent_id,
                )?)
            })
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

/// Target menu id and target parent id for an item.
fn resolve_item(
    connection: &Connection,
    item: &CleanMenuItem,
) -> Result<(i64, Option<i64>), WriteError> {
    let menu_id = match item.menu_source_id {
        Some(menu_source_id) => resolve_reference(connection, EntityType::Menus, menu_source_id)?
            .ok_or_else(|| WriteError::Rejected(format!("menu {menu_source_id} not yet migrated")))?,
        None if !item.menutype.is_empty() => {
            let menu_source_id = ledger::menu_source_by_menutype(connection, &item.menutype)?;
            let resolved = match menu_source_id {
                Some(id) => resolve_reference(connection, EntityType::Menus, id)?,
                None => None,
            };
            resolved.ok_or_else(|| {
                WriteError::Rejected(format!("menu `{}` not yet migrated", item.menutype))
            })?
        }
        None => {
            return Err(WriteError::Rejected(
                "menu item has no menu reference".to_string(),
            ));
        }
    };

    let parent_id = match item.parent_source_id {
        Some(parent_source_id) => Some(
            resolve_reference(connection, EntityType::MenuItems, parent_source_id)?.ok_or_else(
                || {
                    WriteError::Rejected(format!(
                        "parent menu item {parent_source_id} not yet migrated"
                    ))
                },
            )?,
        ),
        None => None,
    };
    Ok((menu_id, parent_id))
}

/// Legacy id to legacy parent id for every item with a readable id. Joomla
/// roots (0 and 1) are no parent.
pub(crate) fn legacy_parent_map(items: &[RawRecord]) -> HashMap<i64, Option<i64>> {
    items
        .iter()
        .filter_map(|record| {
            let id = record.source_id()?;
            let parent = super::legacy_parent(record).filter(|parent| *parent > 1);
            Some((id, parent))
        })
        .collect()
}

/// Ids that are their own ancestor. Each walk stops at a root, at an id
/// outside the map, or at the first id it has already seen.
pub(crate) fn cycle_members(parents: &HashMap<i64, Option<i64>>) -> HashSet<i64> {
    let mut members = HashSet::new();
    for &start in parents.keys() {
        let mut seen = HashSet::new();
        let mut cursor = parents.get(&start).copied().flatten();
        while let Some(id) = cursor {
            if id == start {
                members.insert(start);
                break;
            }
            if !seen.insert(id) {
                break;
            }
            cursor = parents.get(&id).copied().flatten();
        }
    }
    members
}
