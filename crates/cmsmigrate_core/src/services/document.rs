use rusqlite::Connection;

use super::{EntityMigrator, StepContext, StepStats, WriteError, migrate_records, require_category};
use crate::cleaner::{CleanDocument, CleanOutcome, clean_document};
use crate::entity::EntityType;
use crate::error::MigrationResult;
use crate::source::RawRecord;
use crate::target;

/// Download-manager entries. Only the metadata is migrated; files stay
/// where `file_path` points.
pub struct DocumentMigrator;

pub struct ResolvedDocument {
    record: CleanDocument,
    category_id: Option<i64>,
}

impl EntityMigrator for DocumentMigrator {
    type Prepared = CleanDocument;
    type Resolved = ResolvedDocument;

    fn entity_type(&self) -> EntityType {
        EntityType::Documents
    }

    fn prepare(&self, record: &RawRecord) -> Result<CleanOutcome<CleanDocument>, String> {
        clean_document(record)
    }

    fn resolve(
        &self,
        connection: &Connection,
        record: CleanDocument,
    ) -> Result<ResolvedDocument, WriteError> {
        let category_id = require_category(connection, record.category_source_id)?;
        Ok(ResolvedDocument {
            record,
            category_id,
        })
    }

    fn write(
        &self,
        connection: &Connection,
        resolved: &ResolvedDocument,
        existing_target: Option<i64>,
    ) -> Result<i64, WriteError> {
        Ok(target::write_document(
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
    migrate_records(connection, context, &DocumentMigrator, records)
}
