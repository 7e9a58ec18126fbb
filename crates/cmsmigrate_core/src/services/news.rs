use rusqlite::Connection;

use super::{EntityMigrator, StepContext, StepStats, WriteError, migrate_records, require_category};
use crate::cleaner::{CleanNews, CleanOutcome, clean_news};
use crate::entity::EntityType;
use crate::error::MigrationResult;
use crate::source::RawRecord;
use crate::target;

pub struct NewsMigrator;

pub struct ResolvedNews {
    record: CleanNews,
    category_id: Option<i64>,
}

impl EntityMigrator for NewsMigrator {
    type Prepared = CleanNews;
    type Resolved = ResolvedNews;

    fn entity_type(&self) -> EntityType {
        EntityType::News
    }

    fn prepare(&self, record: &RawRecord) -> Result<CleanOutcome<CleanNews>, String> {
        clean_news(record)
    }

    fn resolve(&self, connection: &Connection, record: CleanNews) -> Result<ResolvedNews, WriteError> {
        let category_id = require_category(connection, record.category_source_id)?;
        Ok(ResolvedNews {
            record,
            category_id,
        })
    }

    fn write(
        &self,
        connection: &Connection,
        resolved: &ResolvedNews,
        existing_target: Option<i64>,
    ) -> Result<i64, WriteError> {
        Ok(target::write_news(
            connection,
            existing_target,
            &resolved.record,
            resolved.category_id,
        )?)
    }
}

pub fn migrate(
    connection: &mut Connection,
    context: &mut StepContext,
    records: &[RawRecord],
) -> MigrationResult<StepStats> {
    migrate_records(connection, context, &NewsMigrator, records)
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};

    use super::*;
    use crate::ledger;
    use crate::schema::open_in_memory;
    use crate::services::category;

    #[test]
    fn news_links_to_migrated_category() {
        let mut connection = open_in_memory().expect("db");
        let run = ledger::create_run(&connection, "news", Map::new()).expect("run");
        let mut context = StepContext::new(run.id, false, None);
        category::migrate(
            &mut connection,
            &mut context,
            &[RawRecord::new(0, json!({"id": 12, "title": "Berita"}))],
        )
        .expect("categories");

        let stats = migrate(
            &mut connection,
            &mut context,
            &[
                RawRecord::new(0, json!({"id": 1, "title": "Sidang", "catid": "12", "featured": 1})),
                RawRecord::new(1, json!({"id": 2, "title": "Lain", "catid": 40})),
            ],
        )
        .expect("news");
        assert_eq!(stats.success, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(context.failures[0].message, "parent category 40 not yet migrated");

        let category_target = ledger::completed_target(&connection, EntityType::Categories, 12)
            .expect("lookup");
        let news_target = ledger::completed_target(&connection, EntityType::News, 1)
            .expect("lookup")
            .expect("migrated");
        let (category_id, featured): (Option<i64>, bool) = connection
            .query_row(
                "SELECT category_id, is_featured FROM news WHERE id = ?1",
                [news_target],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("row");
        assert_eq!(category_id, category_target);
        assert!(featured);
    }
}
