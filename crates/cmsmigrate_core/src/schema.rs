use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use crate::runtime::ResolvedPaths;
use crate::unix_timestamp;

struct SchemaMigration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[SchemaMigration] = &[
    SchemaMigration {
        version: 1,
        name: "content",
        sql: include_str!("migrations/v001_content.sql"),
    },
    SchemaMigration {
        version: 2,
        name: "ledger",
        sql: include_str!("migrations/v002_ledger.sql"),
    },
    SchemaMigration {
        version: 3,
        name: "single_active_run",
        sql: include_str!("migrations/v003_single_active_run.sql"),
    },
];

/// Report returned after applying schema migrations.
#[derive(Debug, Clone)]
pub struct SchemaReport {
    pub applied: Vec<AppliedSchemaMigration>,
    pub current_version: u32,
}

#[derive(Debug, Clone)]
pub struct AppliedSchemaMigration {
    pub version: u32,
    pub name: String,
}

/// Open the database at `paths.db_path`, creating parent directories, and
/// bring its schema up to date.
pub fn open_database(paths: &ResolvedPaths) -> Result<Connection> {
    ensure_db_parent(&paths.db_path)?;
    let connection = open_connection(&paths.db_path)?;
    migrate_connection(&connection)?;
    Ok(connection)
}

/// Run all pending schema migrations against the database at `paths.db_path`.
pub fn run_schema_migrations(paths: &ResolvedPaths) -> Result<SchemaReport> {
    ensure_db_parent(&paths.db_path)?;
    let connection = open_connection(&paths.db_path)?;
    migrate_connection(&connection)
}

/// Apply pending migrations to an already-open connection.
pub fn migrate_connection(connection: &Connection) -> Result<SchemaReport> {
    ensure_schema_migrations_table(connection)?;

    let current = current_version(connection)?;
    let mut applied = Vec::new();

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        apply_migration(connection, migration).with_context(|| {
            format!(
                "failed to apply schema migration v{:03}_{}",
                migration.version, migration.name
            )
        })?;
        tracing::debug!(version = migration.version, name = migration.name, "applied schema migration");
        applied.push(AppliedSchemaMigration {
            version: migration.version,
            name: migration.name.to_string(),
        });
    }

    Ok(SchemaReport {
        applied,
        current_version: current_version(connection)?,
    })
}

/// Number of schema migrations that have not been applied yet.
pub fn pending_schema_count(paths: &ResolvedPaths) -> Result<usize> {
    if !paths.db_path.exists() {
        return Ok(MIGRATIONS.len());
    }
    let connection = open_connection(&paths.db_path)?;
    ensure_schema_migrations_table(&connection)?;
    let current = current_version(&connection)?;
    Ok(MIGRATIONS.iter().filter(|m| m.version > current).count())
}

pub fn current_version(connection: &Connection) -> Result<u32> {
    let version: i64 = connection
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .context("failed to read current schema version")?;
    u32::try_from(version).context("schema version does not fit into u32")
}

/// In-memory database with the full schema, for tests and dry runs.
pub fn open_in_memory() -> Result<Connection> {
    let connection = Connection::open_in_memory().context("failed to open in-memory database")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys pragma")?;
    migrate_connection(&connection)?;
    Ok(connection)
}

fn ensure_schema_migrations_table(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at_unix INTEGER NOT NULL
            );",
        )
        .context("failed to create schema_migrations table")
}

fn apply_migration(connection: &Connection, migration: &SchemaMigration) -> Result<()> {
    connection
        .execute_batch("SAVEPOINT schema_apply")
        .context("failed to create savepoint")?;

    let result = (|| -> Result<()> {
        connection
            .execute_batch(migration.sql)
            .with_context(|| format!("SQL execution failed for v{:03}", migration.version))?;
        connection
            .execute(
                "INSERT INTO schema_migrations (version, name, applied_at_unix) VALUES (?1, ?2, ?3)",
                params![i64::from(migration.version), migration.name, unix_timestamp()],
            )
            .context("failed to record schema migration")?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            connection
                .execute_batch("RELEASE SAVEPOINT schema_apply")
                .context("failed to release savepoint")?;
            Ok(())
        }
        Err(err) => {
            let _ = connection.execute_batch("ROLLBACK TO SAVEPOINT schema_apply");
            let _ = connection.execute_batch("RELEASE SAVEPOINT schema_apply");
            Err(err)
        }
    }
}

fn open_connection(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    connection
        .busy_timeout(Duration::from_secs(5))
        .context("failed to set sqlite busy timeout")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys pragma")?;
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL journal mode")?;
    Ok(connection)
}

fn ensure_db_parent(db_path: &Path) -> Result<()> {
    let parent = db_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("db path has no parent: {}", db_path.display()))?;
    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create database parent directory {}",
            parent.display()
        )
    })
}
