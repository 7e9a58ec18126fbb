use rusqlite::Connection;

use super::{
    EntityMigrator, StepContext, StepStats, WriteError, legacy_parent, migrate_records,
    parent_first_order, require_category,
};
use crate::cleaner::{CleanCategory, CleanOutcome, clean_category};
use crate::entity::EntityType;
use crate::error::MigrationResult;
use crate::source::RawRecord;
use crate::target;

pub struct CategoryMigrator;

pub struct ResolvedCategory {
    record: CleanCategory,
    parent_id: Option<i64>,
}

impl EntityMigrator for CategoryMigrator {
    type Prepared = CleanCategory;
    type Resolved = ResolvedCategory;

    fn entity_type(&self) -> EntityType {
        EntityType::Categories
    }

    fn prepare(&self, record: &RawRecord) -> Result<CleanOutcome<CleanCategory>, String> {
        clean_category(record)
    }

    fn resolve(
        &self,
        connection: &Connection,
        record: CleanCategory,
    ) -> Result<ResolvedCategory, WriteError> {
        if record.parent_source_id == Some(record.source_id) {
            return Err(WriteError::Rejected(format!(
                "category {} is its own parent",
                record.source_id
            )));
        }
        let parent_id = require_category(connection, record.parent_source_id)?;
        Ok(ResolvedCategory { record, parent_id })
    }

    fn write(
        &self,
        connection: &Connection,
        resolved: &ResolvedCategory,
        existing_target: Option<i64>,
    ) -> Result<i64, WriteError> {
        Ok(target::write_category(
            connection,
            existing_target,
            &resolved.record,
            resolved.parent_id,
        )?)
    }
}

/// Categories are written parents first so a child never sees its parent
/// as "not yet migrated" merely because of array order.
pub fn migrate(
    connection: &mut Connection,
    context: &mut StepContext,
    records: &[RawRecord],
) -> MigrationResult<StepStats> {
    let ordered = parent_first_order(records, legacy_parent);
    migrate_records(connection, context, &CategoryMigrator, ordered)
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};

    use super::*;
    use crate::ledger::{self, ItemStatus};
    use crate::schema::open_in_memory;

    fn raw(values: Vec<serde_json::Value>) -> Vec<RawRecord> {
        values
            .into_iter()
            .enumerate()
            .map(|(position, payload)| RawRecord::new(position, payload))
            .collect()
    }

    fn parent_of(connection: &Connection, source_id: i64) -> Option<i64> {
        let target = ledger::completed_target(connection, EntityType::Categories, source_id)
            .expect("lookup")
            .expect("migrated");
        connection
            .query_row(
                "SELECT parent_id FROM categories WHERE id = ?1",
                [target],
                |row| row.get(0),
            )
            .expect("row")
    }

    #[test]
    fn child_before_parent_in_input_still_links() {
        let mut connection = open_in_memory().expect("db");
        let run = ledger::create_run(&connection, "cats", Map::new()).expect("run");
        let mut context = StepContext::new(run.id, false, None);
        let records = raw(vec![
            json!({"id": 2, "name": "Sports", "parent": 1}),
            json!({"id": 1, "name": "News"}),
        ]);

        let stats = migrate(&mut connection, &mut context, &records).expect("migrate");
        assert_eq!(stats.success, 2);
        let news = ledger::completed_target(&connection, EntityType::Categories, 1)
            .expect("lookup");
        assert_eq!(parent_of(&connection, 2), news);
    }

    #[test]
    fn missing_parent_fails_with_message() {
        let mut connection = open_in_memory().expect("db");
        let run = ledger::create_run(&connection, "cats", Map::new()).expect("run");
        let mut context = StepContext::new(run.id, false, None);
        let records = raw(vec![json!({"id": 4, "name": "Orphan", "parent_id": 99})]);

        let stats = migrate(&mut connection, &mut context, &records).expect("migrate");
        assert_eq!(stats.failed, 1);
        assert_eq!(context.failures[0].message, "parent category 99 not yet migrated");
        let item = ledger::find_item(&connection, EntityType::Categories, 4)
            .expect("find")
            .expect("item");
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.target_id, None);
        assert_eq!(target::count(&connection, EntityType::Categories).expect("count"), 0);
    }

    #[test]
    fn trashed_category_is_skipped() {
        let mut connection = open_in_memory().expect("db");
        let run = ledger::create_run(&connection, "cats", Map::new()).expect("run");
        let mut context = StepContext::new(run.id, false, None);
        let records = raw(vec![json!({"id": 8, "name": "Old", "published": -2})]);

        let stats = migrate(&mut connection, &mut context, &records).expect("migrate");
        assert_eq!(stats.skipped, 1);
        let item = ledger::find_item(&connection, EntityType::Categories, 8)
            .expect("find")
            .expect("item");
        assert_eq!(item.status, ItemStatus::Skipped);
    }
}
