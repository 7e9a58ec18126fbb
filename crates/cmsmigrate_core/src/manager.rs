//! Run orchestration: owns the run lifecycle and drives the entity steps in
//! dependency order. Also hosts the write-free dry-run preview.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::cleaner::{self, CleanOutcome, CleanRecord};
use crate::entity::EntityType;
use crate::error::{MigrationError, MigrationResult};
use crate::ledger::{self, ItemStatus, MigrationRun, RunError, RunStatus};
use crate::services::menu::{self, CYCLE_MESSAGE, cycle_members, legacy_parent_map};
use crate::services::{
    RecordFailure, StepContext, StepStats, category, document, legacy_parent, news, page,
    parent_first_order, resolve_reference,
};
use crate::source::{LegacyExport, RawRecord};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub name: String,
    pub force: bool,
    /// Checked between records; passing it fails the run with a timeout.
    pub deadline: Option<Instant>,
    /// Where the export came from, kept in run metadata.
    pub source_label: Option<String>,
}

impl RunOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            force: false,
            deadline: None,
            source_label: None,
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Execute one migration run over an export document.
///
/// Record-level failures are collected on the run, which still completes.
/// An orchestration failure (unreadable input, lost database, deadline)
/// marks the run failed and is returned. Finalizing a failed run is best
/// effort: the original error is what the caller gets back.
pub fn run_migration(
    connection: &mut Connection,
    source_json: &str,
    options: &RunOptions,
) -> MigrationResult<MigrationRun> {
    if let Some(active) = ledger::running_run_id(connection)? {
        return Err(MigrationError::RunInProgress(active));
    }

    let mut metadata = Map::new();
    metadata.insert("force".to_string(), Value::Bool(options.force));
    if let Some(label) = &options.source_label {
        metadata.insert("source".to_string(), Value::String(label.clone()));
    }
    let mut run = ledger::create_run(connection, &options.name, metadata)?;
    if let Err(err) = ledger::transition(connection, &mut run, RunStatus::Running) {
        ledger::discard_pending_run(connection, run.id)?;
        return Err(err);
    }
    tracing::info!(run_id = run.id, name = %run.name, force = options.force, "migration run started");

    let mut context = StepContext::new(run.id, options.force, options.deadline);
    let mut progress = RunProgress::default();
    match execute(connection, &mut run, &mut context, &mut progress, source_json) {
        Ok(()) => {
            ledger::save_progress(connection, &run)?;
            ledger::transition(connection, &mut run, RunStatus::Completed)?;
            tracing::info!(
                run_id = run.id,
                total = run.total_records,
                processed = run.processed_records,
                failed = run.failed_records,
                "migration run completed"
            );
            Ok(run)
        }
        Err(err) => {
            let stage = progress.stage_label();
            tracing::error!(run_id = run.id, stage, error = %err, "migration run failed");
            let partial = std::mem::take(&mut context.progress);
            let interrupted = partial.total() > 0 || !context.failures.is_empty();
            if let Some(entity_type) = progress.stage.filter(|_| interrupted) {
                progress.absorb(&mut run, &mut context, entity_type, partial);
            }
            run.errors.push(RunError {
                entity_type: None,
                source_id: None,
                location: Some(stage.to_string()),
                message: err.to_string(),
            });
            finish_failed(connection, &mut run);
            Err(err)
        }
    }
}

/// Step bookkeeping kept outside [`execute`] so a failed run still reports
/// the steps it got through.
#[derive(Debug, Default)]
struct RunProgress {
    /// Step in flight; `None` while the export is being parsed.
    stage: Option<EntityType>,
    skipped: usize,
    steps: Map<String, Value>,
}

impl RunProgress {
    fn stage_label(&self) -> &'static str {
        self.stage.map_or("parse", EntityType::as_str)
    }

    /// Fold one step's counts and drained failures into the run.
    fn absorb(
        &mut self,
        run: &mut MigrationRun,
        context: &mut StepContext,
        entity_type: EntityType,
        stats: StepStats,
    ) {
        run.processed_records += stats.processed();
        run.failed_records += stats.failed;
        self.skipped += stats.skipped;
        run.errors.extend(context.failures.drain(..).map(|failure| RunError {
            entity_type: Some(failure.entity_type),
            source_id: failure.source_id,
            location: None,
            message: failure.message,
        }));
        self.steps.insert(entity_type.as_str().to_string(), json!(stats));
        run.metadata.insert("steps".to_string(), Value::Object(self.steps.clone()));
        run.metadata.insert("skipped_records".to_string(), json!(self.skipped));
    }
}

fn execute(
    connection: &mut Connection,
    run: &mut MigrationRun,
    context: &mut StepContext,
    progress: &mut RunProgress,
    source_json: &str,
) -> MigrationResult<()> {
    let export = LegacyExport::parse(source_json)?;
    run.total_records = export.total_records();
    ledger::save_progress(connection, run)?;

    for entity_type in EntityType::FORWARD_ORDER {
        progress.stage = Some(entity_type);
        let records = export.records(entity_type);
        let stats = match entity_type {
            EntityType::Categories => category::migrate(connection, context, records)?,
            EntityType::Pages => page::migrate(connection, context, records)?,
            EntityType::News => news::migrate(connection, context, records)?,
            EntityType::Menus => menu::migrate_menus(connection, context, records)?,
            EntityType::MenuItems => menu::migrate_items(connection, context, records)?,
            EntityType::Documents => document::migrate(connection, context, records)?,
        };
        progress.absorb(run, context, entity_type, stats);
        ledger::save_progress(connection, run)?;
    }
    Ok(())
}

/// Persist what a failed run did and release its lease. Errors here are
/// logged; the caller reports the error that stopped the run.
fn finish_failed(connection: &Connection, run: &mut MigrationRun) {
    if let Err(err) = ledger::save_progress(connection, run) {
        tracing::error!(run_id = run.id, error = %err, "could not save progress of failed run");
    }
    if let Err(err) = ledger::transition(connection, run, RunStatus::Failed) {
        tracing::error!(run_id = run.id, error = %err, "could not mark run as failed");
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreviewCounts {
    pub would_create: usize,
    pub would_update: usize,
    pub would_skip: usize,
    pub would_fail: usize,
    /// Already migrated, but the source record has changed since.
    pub changed_since_migration: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DryRunReport {
    pub force: bool,
    pub total_records: usize,
    pub entities: BTreeMap<EntityType, PreviewCounts>,
    pub failures: Vec<RecordFailure>,
}

impl DryRunReport {
    pub fn totals(&self) -> PreviewCounts {
        self.entities
            .values()
            .fold(PreviewCounts::default(), |mut acc, counts| {
                acc.would_create += counts.would_create;
                acc.would_update += counts.would_update;
                acc.would_skip += counts.would_skip;
                acc.would_fail += counts.would_fail;
                acc.changed_since_migration += counts.changed_since_migration;
                acc
            })
    }
}

/// Report what a run would do without writing to the ledger or the target
/// tables. References are simulated against the ledger plus the records the
/// preview has already accepted.
pub fn preview(connection: &Connection, source_json: &str, force: bool) -> MigrationResult<DryRunReport> {
    let export = LegacyExport::parse(source_json)?;
    let mut simulation = Simulation {
        connection,
        force,
        available: HashMap::new(),
        menutypes: HashSet::new(),
        report: DryRunReport {
            force,
            total_records: export.total_records(),
            entities: BTreeMap::new(),
            failures: Vec::new(),
        },
    };

    for entity_type in EntityType::FORWARD_ORDER {
        let records = export.records(entity_type);
        simulation.report.entities.insert(entity_type, PreviewCounts::default());
        match entity_type {
            EntityType::Categories => {
                for record in parent_first_order(records, legacy_parent) {
                    simulation.visit(entity_type, record)?;
                }
            }
            EntityType::MenuItems => simulation.visit_menu_items(records)?,
            _ => {
                for record in records {
                    simulation.visit(entity_type, record)?;
                }
            }
        }
    }
    Ok(simulation.report)
}

enum Verdict {
    Create,
    Update,
    Skip,
    Fail(String),
}

struct Simulation<'c> {
    connection: &'c Connection,
    force: bool,
    available: HashMap<EntityType, HashSet<i64>>,
    menutypes: HashSet<String>,
    report: DryRunReport,
}

impl Simulation<'_> {
    fn visit(&mut self, entity_type: EntityType, record: &RawRecord) -> MigrationResult<()> {
        let verdict = self.judge(entity_type, record, None)?;
        self.apply(entity_type, record, verdict);
        Ok(())
    }

    fn visit_menu_items(&mut self, records: &[RawRecord]) -> MigrationResult<()> {
        let entity_type = EntityType::MenuItems;
        let parents = legacy_parent_map(records);
        let on_cycle = cycle_members(&parents);
        let ordered = parent_first_order(records, |record| {
            record
                .source_id()
                .and_then(|id| parents.get(&id).copied().flatten())
        });
        for record in ordered {
            let verdict = self.judge(entity_type, record, Some(&on_cycle))?;
            self.apply(entity_type, record, verdict);
        }
        Ok(())
    }

    fn judge(
        &mut self,
        entity_type: EntityType,
        record: &RawRecord,
        on_cycle: Option<&HashSet<i64>>,
    ) -> MigrationResult<Verdict> {
        let Some(source_id) = record.source_id().filter(|id| *id > 0) else {
            return Ok(Verdict::Fail(format!(
                "record #{} has no legacy id",
                record.position + 1
            )));
        };

        let existing = ledger::find_item(self.connection, entity_type, source_id)?
            .filter(|item| item.status == ItemStatus::Completed);
        if let Some(item) = &existing {
            if item.source_hash != ledger::payload_hash(&record.payload) {
                self.counts(entity_type).changed_since_migration += 1;
            }
            self.mark_available(entity_type, source_id);
            if !self.force {
                return Ok(Verdict::Skip);
            }
        }

        let cleaned = match cleaner::clean(record, entity_type) {
            Ok(CleanOutcome::Ready(cleaned)) => cleaned,
            Ok(CleanOutcome::Excluded(_)) => return Ok(Verdict::Skip),
            Err(message) => return Ok(Verdict::Fail(message)),
        };
        if let Some(message) = self.unresolved(&cleaned, on_cycle)? {
            return Ok(Verdict::Fail(message));
        }
        Ok(if existing.is_some() {
            Verdict::Update
        } else {
            Verdict::Create
        })
    }

    fn unresolved(
        &mut self,
        cleaned: &CleanRecord,
        on_cycle: Option<&HashSet<i64>>,
    ) -> MigrationResult<Option<String>> {
        let category = |source_id: i64| format!("parent category {source_id} not yet migrated");
        Ok(match cleaned {
            CleanRecord::Category(record) => match record.parent_source_id {
                Some(parent) if parent == record.source_id => {
                    Some(format!("category {parent} is its own parent"))
                }
                Some(parent) if !self.resolvable(EntityType::Categories, parent)? => {
                    Some(category(parent))
                }
                _ => None,
            },
            CleanRecord::News(record) => match record.category_source_id {
                Some(id) if !self.resolvable(EntityType::Categories, id)? => Some(category(id)),
                _ => None,
            },
            CleanRecord::Document(record) => match record.category_source_id {
                Some(id) if !self.resolvable(EntityType::Categories, id)? => Some(category(id)),
                _ => None,
            },
            CleanRecord::Menu(record) => {
                self.menutypes.insert(record.menutype.clone());
                None
            }
            CleanRecord::MenuItem(record) => {
                if on_cycle.is_some_and(|members| members.contains(&record.source_id)) {
                    Some(CYCLE_MESSAGE.to_string())
                } else if !self.menu_resolvable(record.menu_source_id, &record.menutype)? {
                    Some(match record.menu_source_id {
                        Some(id) => format!("menu {id} not yet migrated"),
                        None if !record.menutype.is_empty() => {
                            format!("menu `{}` not yet migrated", record.menutype)
                        }
                        None => "menu item has no menu reference".to_string(),
                    })
                } else {
                    match record.parent_source_id {
                        Some(parent) if !self.resolvable(EntityType::MenuItems, parent)? =>
                        {
                            Some(format!("parent menu item {parent} not yet migrated"))
                        }
                        _ => None,
                    }
                }
            }
            CleanRecord::Page(_) => None,
        })
    }

    fn menu_resolvable(&mut self, menu_source_id: Option<i64>, menutype: &str) -> MigrationResult<bool> {
        if let Some(id) = menu_source_id {
            return self.resolvable(EntityType::Menus, id);
        }
        if menutype.is_empty() {
            return Ok(false);
        }
        if self.menutypes.contains(menutype) {
            return Ok(true);
        }
        match ledger::menu_source_by_menutype(self.connection, menutype)? {
            Some(id) => Ok(resolve_reference(self.connection, EntityType::Menus, id)?.is_some()),
            None => Ok(false),
        }
    }

    fn resolvable(&mut self, entity_type: EntityType, source_id: i64) -> MigrationResult<bool> {
        if self
            .available
            .get(&entity_type)
            .is_some_and(|ids| ids.contains(&source_id))
        {
            return Ok(true);
        }
        Ok(resolve_reference(self.connection, entity_type, source_id)?.is_some())
    }

    fn apply(&mut self, entity_type: EntityType, record: &RawRecord, verdict: Verdict) {
        let source_id = record.source_id();
        match verdict {
            Verdict::Create => {
                self.counts(entity_type).would_create += 1;
                if let Some(id) = source_id {
                    self.mark_available(entity_type, id);
                }
            }
            Verdict::Update => {
                self.counts(entity_type).would_update += 1;
                if let Some(id) = source_id {
                    self.mark_available(entity_type, id);
                }
            }
            Verdict::Skip => self.counts(entity_type).would_skip += 1,
            Verdict::Fail(message) => {
                self.counts(entity_type).would_fail += 1;
                self.report.failures.push(RecordFailure {
                    entity_type,
                    source_id,
                    message,
                });
            }
        }
    }

    fn counts(&mut self, entity_type: EntityType) -> &mut PreviewCounts {
        self.report.entities.entry(entity_type).or_default()
    }

    fn mark_available(&mut self, entity_type: EntityType, source_id: i64) {
        self.available.entry(entity_type).or_default().insert(source_id);
    }
}
