//! Migration runs and the per-record provenance ledger.
//!
//! Ledger items are keyed by `(entity_type, source_id)` across all runs, so a
//! re-run finds records migrated by any earlier run. Re-processing an item
//! moves it to the current run.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::entity::EntityType;
use crate::error::{MigrationError, MigrationResult};
use crate::unix_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Completed, Self::RolledBack)
                | (Self::Failed, Self::RolledBack)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = MigrationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "rolled_back" => Ok(Self::RolledBack),
            other => Err(MigrationError::Malformed(format!("unknown run status `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "skipped" => Self::Skipped,
            _ => Self::Pending,
        }
    }
}

/// Structured error stored on a run: either a record-level failure
/// (`entity_type` + `source_id`) or an orchestration failure (`location`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationRun {
    pub id: i64,
    pub name: String,
    pub status: RunStatus,
    pub total_records: usize,
    pub processed_records: usize,
    pub failed_records: usize,
    pub errors: Vec<RunError>,
    pub metadata: Map<String, Value>,
    pub created_at_unix: i64,
    pub started_at_unix: Option<i64>,
    pub completed_at_unix: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationItem {
    pub id: i64,
    pub run_id: i64,
    pub entity_type: EntityType,
    pub source_id: i64,
    pub source_payload: String,
    pub source_hash: String,
    pub target_type: Option<String>,
    pub target_id: Option<i64>,
    pub status: ItemStatus,
    pub error_message: Option<String>,
}

/// Terminal state to record for one source record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Completed { target_id: i64 },
    Failed { message: String },
    Skipped { reason: String },
}

pub fn payload_hash(payload: &Value) -> String {
    let canonical = payload.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

pub fn create_run(
    connection: &Connection,
    name: &str,
    metadata: Map<String, Value>,
) -> MigrationResult<MigrationRun> {
    let now = unix_timestamp();
    connection.execute(
        "INSERT INTO migration_runs (name, status, metadata_json, created_at_unix)
         VALUES (?1, 'pending', ?2, ?3)",
        params![name, Value::Object(metadata.clone()).to_string(), now],
    )?;
    Ok(MigrationRun {
        id: connection.last_insert_rowid(),
        name: name.to_string(),
        status: RunStatus::Pending,
        total_records: 0,
        processed_records: 0,
        failed_records: 0,
        errors: Vec::new(),
        metadata,
        created_at_unix: now,
        started_at_unix: None,
        completed_at_unix: None,
    })
}

/// The run currently holding the single active-run lease, if any.
pub fn running_run_id(connection: &Connection) -> MigrationResult<Option<i64>> {
    Ok(connection
        .query_row(
            "SELECT id FROM migration_runs WHERE status = 'running' LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?)
}

/// Move the run to a new status, enforcing the lifecycle.
pub fn transition(
    connection: &Connection,
    run: &mut MigrationRun,
    next: RunStatus,
) -> MigrationResult<()> {
    if !run.status.can_transition_to(next) {
        return Err(MigrationError::InvalidRunState {
            id: run.id,
            expected: format!("a status that can move to {next}"),
            actual: run.status.to_string(),
        });
    }
    let now = unix_timestamp();
    let (started_at, completed_at) = match next {
        RunStatus::Running => (Some(now), run.completed_at_unix),
        RunStatus::Completed | RunStatus::Failed => (run.started_at_unix, Some(now)),
        RunStatus::Pending | RunStatus::RolledBack => (run.started_at_unix, run.completed_at_unix),
    };

    let result = connection.execute(
        "UPDATE migration_runs
         SET status = ?2, started_at_unix = ?3, completed_at_unix = ?4
         WHERE id = ?1",
        params![run.id, next.as_str(), started_at, completed_at],
    );
    match result {
        Ok(_) => {
            run.status = next;
            run.started_at_unix = started_at;
            run.completed_at_unix = completed_at;
            Ok(())
        }
        Err(rusqlite::Error::SqliteFailure(code, _))
            if next == RunStatus::Running
                && code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            let holder = running_run_id(connection)?.unwrap_or_default();
            Err(MigrationError::RunInProgress(holder))
        }
        Err(err) => Err(err.into()),
    }
}

/// Persist counters, errors and metadata.
pub fn save_progress(connection: &Connection, run: &MigrationRun) -> MigrationResult<()> {
    connection.execute(
        "UPDATE migration_runs
         SET total_records = ?2, processed_records = ?3, failed_records = ?4,
             errors_json = ?5, metadata_json = ?6
         WHERE id = ?1",
        params![
            run.id,
            to_i64(run.total_records),
            to_i64(run.processed_records),
            to_i64(run.failed_records),
            serde_json::to_string(&run.errors)?,
            Value::Object(run.metadata.clone()).to_string(),
        ],
    )?;
    Ok(())
}

pub fn load_run(connection: &Connection, id: i64) -> MigrationResult<Option<MigrationRun>> {
    let row = connection
        .query_row(
            &format!("{RUN_COLUMNS} WHERE id = ?1"),
            [id],
            RawRun::from_row,
        )
        .optional()?;
    row.map(RawRun::into_run).transpose()
}

pub fn require_run(connection: &Connection, id: i64) -> MigrationResult<MigrationRun> {
    load_run(connection, id)?.ok_or(MigrationError::RunNotFound(id))
}

pub fn list_runs(connection: &Connection) -> MigrationResult<Vec<MigrationRun>> {
    let mut statement = connection.prepare(&format!("{RUN_COLUMNS} ORDER BY id DESC"))?;
    let rows = statement.query_map([], RawRun::from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.into_run()?);
    }
    Ok(out)
}

/// Most recent run that reached `completed`.
pub fn latest_completed_run(connection: &Connection) -> MigrationResult<Option<MigrationRun>> {
    let row = connection
        .query_row(
            &format!("{RUN_COLUMNS} WHERE status = 'completed' ORDER BY id DESC LIMIT 1"),
            [],
            RawRun::from_row,
        )
        .optional()?;
    row.map(RawRun::into_run).transpose()
}

pub fn set_rolled_back(connection: &Connection, run: &mut MigrationRun) -> MigrationResult<()> {
    transition(connection, run, RunStatus::RolledBack)
}

/// Administrative purge. Only runs that are no longer active may be removed;
/// their remaining ledger rows go with them.
pub fn purge_run(connection: &Connection, id: i64) -> MigrationResult<usize> {
    let run = require_run(connection, id)?;
    if !matches!(run.status, RunStatus::Failed | RunStatus::RolledBack) {
        return Err(MigrationError::InvalidRunState {
            id,
            expected: "failed or rolled_back".to_string(),
            actual: run.status.to_string(),
        });
    }
    let items = connection.execute("DELETE FROM migration_items WHERE run_id = ?1", [id])?;
    connection.execute("DELETE FROM migration_runs WHERE id = ?1", [id])?;
    Ok(items)
}

/// Remove a run that never started, e.g. one that lost the lease race.
pub fn discard_pending_run(connection: &Connection, id: i64) -> MigrationResult<()> {
    connection.execute(
        "DELETE FROM migration_runs WHERE id = ?1 AND status = 'pending'",
        [id],
    )?;
    Ok(())
}

/// Mark a run left `running` by a dead process as failed, releasing the lease.
pub fn fail_stale_run(connection: &Connection, id: i64) -> MigrationResult<MigrationRun> {
    let mut run = require_run(connection, id)?;
    if run.status != RunStatus::Running {
        return Err(MigrationError::InvalidRunState {
            id,
            expected: RunStatus::Running.to_string(),
            actual: run.status.to_string(),
        });
    }
    run.errors.push(RunError {
        entity_type: None,
        source_id: None,
        location: Some("fail-stale".to_string()),
        message: "run abandoned while running; marked failed by operator".to_string(),
    });
    save_progress(connection, &run)?;
    transition(connection, &mut run, RunStatus::Failed)?;
    Ok(run)
}

pub fn find_item(
    connection: &Connection,
    entity_type: EntityType,
    source_id: i64,
) -> MigrationResult<Option<MigrationItem>> {
    let row = connection
        .query_row(
            &format!("{ITEM_COLUMNS} WHERE entity_type = ?1 AND source_id = ?2"),
            params![entity_type.as_str(), source_id],
            RawItem::from_row,
        )
        .optional()?;
    row.map(RawItem::into_item).transpose()
}

/// Target id of a completed item, if the source record has been migrated.
pub fn completed_target(
    connection: &Connection,
    entity_type: EntityType,
    source_id: i64,
) -> MigrationResult<Option<i64>> {
    Ok(connection
        .query_row(
            "SELECT target_id FROM migration_items
             WHERE entity_type = ?1 AND source_id = ?2 AND status = 'completed'",
            params![entity_type.as_str(), source_id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Source id of a migrated menu whose legacy `menutype` matches.
pub fn menu_source_by_menutype(
    connection: &Connection,
    menutype: &str,
) -> MigrationResult<Option<i64>> {
    Ok(connection
        .query_row(
            "SELECT source_id FROM migration_items
             WHERE entity_type = 'menus' AND status = 'completed'
               AND json_extract(source_payload, '$.menutype') = ?1
             ORDER BY id ASC LIMIT 1",
            [menutype],
            |row| row.get(0),
        )
        .optional()?)
}

/// Insert or re-parent the ledger item for `(entity_type, source_id)`.
pub fn record_item(
    connection: &Connection,
    run_id: i64,
    entity_type: EntityType,
    source_id: i64,
    payload: &Value,
    outcome: &ItemOutcome,
) -> MigrationResult<()> {
    let (status, target_type, target_id, error_message) = match outcome {
        ItemOutcome::Completed { target_id } => (
            ItemStatus::Completed,
            Some(entity_type.target_type()),
            Some(*target_id),
            None,
        ),
        ItemOutcome::Failed { message } => (ItemStatus::Failed, None, None, Some(message.as_str())),
        ItemOutcome::Skipped { reason } => (ItemStatus::Skipped, None, None, Some(reason.as_str())),
    };
    connection.execute(
        "INSERT INTO migration_items (
            run_id, entity_type, source_id, source_payload, source_hash,
            target_type, target_id, status, error_message, updated_at_unix
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(entity_type, source_id) DO UPDATE SET
            run_id = excluded.run_id,
            source_payload = excluded.source_payload,
            source_hash = excluded.source_hash,
            target_type = excluded.target_type,
            target_id = excluded.target_id,
            status = excluded.status,
            error_message = excluded.error_message,
            updated_at_unix = excluded.updated_at_unix",
        params![
            run_id,
            entity_type.as_str(),
            source_id,
            payload.to_string(),
            payload_hash(payload),
            target_type,
            target_id,
            status.as_str(),
            error_message,
            unix_timestamp(),
        ],
    )?;
    Ok(())
}

/// Ledger items of one entity type, newest first, optionally limited to a run.
pub fn items_for(
    connection: &Connection,
    entity_type: EntityType,
    run_id: Option<i64>,
) -> MigrationResult<Vec<MigrationItem>> {
    let mut statement = connection.prepare(&format!(
        "{ITEM_COLUMNS} WHERE entity_type = ?1 AND (?2 IS NULL OR run_id = ?2) ORDER BY id DESC"
    ))?;
    let rows = statement.query_map(params![entity_type.as_str(), run_id], RawItem::from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.into_item()?);
    }
    Ok(out)
}

pub fn delete_item(connection: &Connection, id: i64) -> MigrationResult<()> {
    connection.execute("DELETE FROM migration_items WHERE id = ?1", [id])?;
    Ok(())
}

/// Item counts per entity type with the given status, optionally for one run.
pub fn count_by_type(
    connection: &Connection,
    status: ItemStatus,
    run_id: Option<i64>,
) -> MigrationResult<BTreeMap<EntityType, usize>> {
    let mut statement = connection.prepare(
        "SELECT entity_type, COUNT(*) FROM migration_items
         WHERE status = ?1 AND (?2 IS NULL OR run_id = ?2)
         GROUP BY entity_type",
    )?;
    let rows = statement.query_map(params![status.as_str(), run_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut out = BTreeMap::new();
    for row in rows {
        let (entity_type, count) = row?;
        out.insert(entity_type.parse()?, usize::try_from(count).unwrap_or_default());
    }
    Ok(out)
}

const RUN_COLUMNS: &str = "SELECT id, name, status, total_records, processed_records, failed_records,
        errors_json, metadata_json, created_at_unix, started_at_unix, completed_at_unix
 FROM migration_runs";

const ITEM_COLUMNS: &str = "SELECT id, run_id, entity_type, source_id, source_payload, source_hash,
        target_type, target_id, status, error_message
 FROM migration_items";

struct RawRun {
    id: i64,
    name: String,
    status: String,
    total_records: i64,
    processed_records: i64,
    failed_records: i64,
    errors_json: String,
    metadata_json: String,
    created_at_unix: i64,
    started_at_unix: Option<i64>,
    completed_at_unix: Option<i64>,
}

impl RawRun {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            status: row.get(2)?,
            total_records: row.get(3)?,
            processed_records: row.get(4)?,
            failed_records: row.get(5)?,
            errors_json: row.get(6)?,
            metadata_json: row.get(7)?,
            created_at_unix: row.get(8)?,
            started_at_unix: row.get(9)?,
            completed_at_unix: row.get(10)?,
        })
    }

    fn into_run(self) -> MigrationResult<MigrationRun> {
        let metadata = match serde_json::from_str::<Value>(&self.metadata_json)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(MigrationRun {
            id: self.id,
            name: self.name,
            status: self.status.parse()?,
            total_records: usize::try_from(self.total_records).unwrap_or_default(),
            processed_records: usize::try_from(self.processed_records).unwrap_or_default(),
            failed_records: usize::try_from(self.failed_records).unwrap_or_default(),
            errors: serde_json::from_str(&self.errors_json)?,
            metadata,
            created_at_unix: self.created_at_unix,
            started_at_unix: self.started_at_unix,
            completed_at_unix: self.completed_at_unix,
        })
    }
}

struct RawItem {
    id: i64,
    run_id: i64,
    entity_type: String,
    source_id: i64,
    source_payload: String,
    source_hash: String,
    target_type: Option<String>,
    target_id: Option<i64>,
    status: String,
    error_message: Option<String>,
}

impl RawItem {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            entity_type: row.get(2)?,
            source_id: row.get(3)?,
            source_payload: row.get(4)?,
            source_hash: row.get(5)?,
            target_type: row.get(6)?,
            target_id: row.get(7)?,
            status: row.get(8)?,
            error_message: row.get(9)?,
        })
    }

    fn into_item(self) -> MigrationResult<MigrationItem> {
        Ok(MigrationItem {
            id: self.id,
            run_id: self.run_id,
            entity_type: self.entity_type.parse()?,
            source_id: self.source_id,
            source_payload: self.source_payload,
            source_hash: self.source_hash,
            target_type: self.target_type,
            target_id: self.target_id,
            status: ItemStatus::parse(&self.status),
            error_message: self.error_message,
        })
    }
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::open_in_memory;

    #[test]
    fn run_lifecycle_is_monotonic() {
        let connection = open_in_memory().expect("db");
        let mut run = create_run(&connection, "test", Map::new()).expect("create");
        assert_eq!(run.status, RunStatus::Pending);

        transition(&connection, &mut run, RunStatus::Running).expect("start");
        assert!(run.started_at_unix.is_some());
        assert!(run.completed_at_unix.is_none());

        let err = transition(&connection, &mut run, RunStatus::Pending).expect_err("backwards");
        assert!(matches!(err, MigrationError::InvalidRunState { .. }));

        transition(&connection, &mut run, RunStatus::Completed).expect("complete");
        assert!(run.completed_at_unix.is_some());
        set_rolled_back(&connection, &mut run).expect("rollback");

        let stored = require_run(&connection, run.id).expect("load");
        assert_eq!(stored.status, RunStatus::RolledBack);
        assert_eq!(stored.completed_at_unix, run.completed_at_unix);
    }

    #[test]
    fn second_running_run_is_refused() {
        let connection = open_in_memory().expect("db");
        let mut first = create_run(&connection, "first", Map::new()).expect("first");
        transition(&connection, &mut first, RunStatus::Running).expect("start first");

        let mut second = create_run(&connection, "second", Map::new()).expect("second");
        let err = transition(&connection, &mut second, RunStatus::Running).expect_err("lease");
        match err {
            MigrationError::RunInProgress(holder) => assert_eq!(holder, first.id),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn progress_round_trips_errors_and_metadata() {
        let connection = open_in_memory().expect("db");
        let mut run = create_run(&connection, "progress", Map::new()).expect("create");
        run.total_records = 3;
        run.processed_records = 2;
        run.failed_records = 1;
        run.errors.push(RunError {
            entity_type: Some(EntityType::News),
            source_id: Some(4),
            location: None,
            message: "parent category 9 not yet migrated".to_string(),
        });
        run.metadata.insert("force".to_string(), json!(true));
        save_progress(&connection, &run).expect("save");

        let stored = require_run(&connection, run.id).expect("load");
        assert_eq!(stored.total_records, 3);
        assert_eq!(stored.errors, run.errors);
        assert_eq!(stored.metadata.get("force"), Some(&json!(true)));
    }

    #[test]
    fn record_item_is_unique_per_entity_and_source() {
        let connection = open_in_memory().expect("db");
        let first = create_run(&connection, "first", Map::new()).expect("first");
        let second = create_run(&connection, "second", Map::new()).expect("second");
        let payload = json!({"id": 5, "name": "News"});

        record_item(
            &connection,
            first.id,
            EntityType::Categories,
            5,
            &payload,
            &ItemOutcome::Failed {
                message: "boom".to_string(),
            },
        )
        .expect("failed item");
        connection
            .execute(
                "INSERT INTO categories (name, slug, created_at_unix, updated_at_unix) VALUES ('News', 'news', 0, 0)",
                [],
            )
            .expect("target row");
        let target_id = connection.last_insert_rowid();
        record_item(
            &connection,
            second.id,
            EntityType::Categories,
            5,
            &payload,
            &ItemOutcome::Completed { target_id },
        )
        .expect("completed item");

        let item = find_item(&connection, EntityType::Categories, 5)
            .expect("find")
            .expect("item");
        assert_eq!(item.run_id, second.id);
        assert_eq!(item.status, ItemStatus::Completed);
        assert_eq!(item.target_id, Some(target_id));
        assert_eq!(item.error_message, None);
        assert_eq!(item.source_hash, payload_hash(&payload));
        assert_eq!(
            completed_target(&connection, EntityType::Categories, 5).expect("target"),
            Some(target_id)
        );
        assert_eq!(
            count_by_type(&connection, ItemStatus::Completed, Some(first.id))
                .expect("count")
                .len(),
            0
        );
    }

    #[test]
    fn purge_requires_inactive_run() {
        let connection = open_in_memory().expect("db");
        let mut run = create_run(&connection, "purge", Map::new()).expect("create");
        assert!(purge_run(&connection, run.id).is_err());
        transition(&connection, &mut run, RunStatus::Running).expect("start");
        transition(&connection, &mut run, RunStatus::Failed).expect("fail");
        purge_run(&connection, run.id).expect("purge");
        assert!(load_run(&connection, run.id).expect("load").is_none());
    }

    #[test]
    fn stale_running_run_can_be_failed() {
        let connection = open_in_memory().expect("db");
        let mut run = create_run(&connection, "stale", Map::new()).expect("create");
        assert!(fail_stale_run(&connection, run.id).is_err());
        transition(&connection, &mut run, RunStatus::Running).expect("start");

        let failed = fail_stale_run(&connection, run.id).expect("fail stale");
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.errors.len(), 1);
        assert_eq!(running_run_id(&connection).expect("lease"), None);
    }

    #[test]
    fn menutype_lookup_reads_payload() {
        let connection = open_in_memory().expect("db");
        let run = create_run(&connection, "menus", Map::new()).expect("create");
        connection
            .execute(
                "INSERT INTO menus (name, slug, created_at_unix, updated_at_unix) VALUES ('Main', 'main', 0, 0)",
                [],
            )
            .expect("menu row");
        let target_id = connection.last_insert_rowid();
        record_item(
            &connection,
            run.id,
            EntityType::Menus,
            3,
            &json!({"id": 3, "menutype": "mainmenu"}),
            &ItemOutcome::Completed { target_id },
        )
        .expect("record");
        assert_eq!(
            menu_source_by_menutype(&connection, "mainmenu").expect("lookup"),
            Some(3)
        );
        assert_eq!(menu_source_by_menutype(&connection, "footer").expect("lookup"), None);
    }
}
