use rusqlite::Connection;

use super::{EntityMigrator, StepContext, StepStats, WriteError, migrate_records};
use crate::cleaner::{CleanOutcome, CleanPage, clean_page};
use crate::entity::EntityType;
use crate::error::MigrationResult;
use crate::source::RawRecord;
use crate::target;

/// Joomla articles become static pages; they reference nothing.
pub struct PageMigrator;

impl EntityMigrator for PageMigrator {
    type Prepared = CleanPage;
    type Resolved = CleanPage;

    fn entity_type(&self) -> EntityType {
        EntityType::Pages
    }

    fn prepare(&self, record: &RawRecord) -> Result<CleanOutcome<CleanPage>, String> {
        clean_page(record)
    }

    fn resolve(&self, _connection: &Connection, record: CleanPage) -> Result<CleanPage, WriteError> {
        Ok(record)
    }

    fn write(
        &self,
        connection: &Connection,
        record: &CleanPage,
        existing_target: Option<i64>,
    ) -> Result<i64, WriteError> {
        Ok(target::write_page(connection, existing_target, record)?)
    }
}

pub fn migrate(
    connection: &mut Connection,
    context: &mut StepContext,
    records: &[RawRecord],
) -> MigrationResult<StepStats> {
    migrate_records(connection, context, &PageMigrator, records)
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};

    use super::*;
    use crate::ledger;
    use crate::schema::open_in_memory;

    #[test]
    fn page_content_is_sanitized() {
        let mut connection = open_in_memory().expect("db");
        let run = ledger::create_run(&connection, "pages", Map::new()).expect("run");
        let mut context = StepContext::new(run.id, false, None);
        let records = vec![RawRecord::new(
            0,
            json!({"id": 1, "title": "Profil", "introtext": "<script>alert(1)</script><p>Hello</p>"}),
        )];

        migrate(&mut connection, &mut context, &records).expect("migrate");
        let target = ledger::completed_target(&connection, EntityType::Pages, 1)
            .expect("lookup")
            .expect("migrated");
        let content: String = connection
            .query_row("SELECT content FROM pages WHERE id = ?1", [target], |row| {
                row.get(0)
            })
            .expect("row");
        assert_eq!(content, "<p>Hello</p>");
    }

    #[test]
    fn record_without_id_fails_without_ledger_row() {
        let mut connection = open_in_memory().expect("db");
        let run = ledger::create_run(&connection, "pages", Map::new()).expect("run");
        let mut context = StepContext::new(run.id, false, None);
        let records = vec![RawRecord::new(0, json!({"title": "No id"}))];

        let stats = migrate(&mut connection, &mut context, &records).expect("migrate");
        assert_eq!(stats.failed, 1);
        assert_eq!(context.failures[0].source_id, None);
        let rows: i64 = connection
            .query_row("SELECT COUNT(*) FROM migration_items", [], |row| row.get(0))
            .expect("count");
        assert_eq!(rows, 0);
    }
}
