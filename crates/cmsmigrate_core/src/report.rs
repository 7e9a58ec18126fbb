//! Post-migration integrity report for one run.

use std::collections::{BTreeMap, HashSet};

use rusqlite::Connection;
use serde::Serialize;

use crate::entity::EntityType;
use crate::error::MigrationResult;
use crate::ledger::{self, ItemStatus, MigrationRun};
use crate::target;

/// Score thresholds consumed by callers; the report itself never enforces them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub pass: f64,
    pub warn: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            pass: 95.0,
            warn: 80.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    PassWithWarnings,
    Fail,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::PassWithWarnings => "pass_with_warnings",
            Self::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    MissingTarget,
    MissingReference,
    ParentCycle,
    DuplicateSlug,
    EmptyDisplayField,
    EmptyMenu,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub entity_type: EntityType,
    pub source_id: i64,
    pub target_id: i64,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecordCount {
    pub expected: usize,
    pub actual: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub migration: MigrationRun,
    pub record_counts: BTreeMap<EntityType, RecordCount>,
    pub integrity_score: f64,
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
}

impl Report {
    pub fn total_expected(&self) -> usize {
        self.record_counts.values().map(|count| count.expected).sum()
    }

    pub fn total_actual(&self) -> usize {
        self.record_counts.values().map(|count| count.actual).sum()
    }

    pub fn verdict(&self, thresholds: Thresholds) -> Verdict {
        if self.integrity_score >= thresholds.pass {
            Verdict::Pass
        } else if self.integrity_score >= thresholds.warn {
            Verdict::PassWithWarnings
        } else {
            Verdict::Fail
        }
    }

    /// Whether a caller should treat the run as acceptable: at or above the
    /// pass threshold, or above the warn threshold with no hard issues.
    pub fn passes(&self, thresholds: Thresholds) -> bool {
        self.integrity_score >= thresholds.pass
            || (self.integrity_score >= thresholds.warn && self.errors.is_empty())
    }
}

/// `round((total - issues) / total * 100, 2)`, 100 for an empty run and never
/// below 0.
pub fn integrity_score(total: usize, issues: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let healthy = total.saturating_sub(issues) as f64;
    let score = healthy / total as f64 * 100.0;
    (score * 100.0).round() / 100.0
}

pub fn generate_report(connection: &Connection, run_id: i64) -> MigrationResult<Report> {
    let migration = ledger::require_run(connection, run_id)?;
    let mut record_counts = BTreeMap::new();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for entity_type in EntityType::FORWARD_ORDER {
        let items: Vec<_> = ledger::items_for(connection, entity_type, Some(run_id))?
            .into_iter()
            .filter(|item| item.status == ItemStatus::Completed)
            .filter_map(|item| item.target_id.map(|target_id| (item.source_id, target_id)))
            .collect();

        let mut count = RecordCount {
            expected: items.len(),
            actual: 0,
        };

        // Oldest first so findings read in migration order.
        for &(source_id, target_id) in items.iter().rev() {
            let finding = |kind, message: String| Finding {
                kind,
                entity_type,
                source_id,
                target_id,
                message,
            };

            let Some((display, slug)) = target::display_fields(connection, entity_type, target_id)?
            else {
                errors.push(finding(
                    FindingKind::MissingTarget,
                    format!("{} {target_id} no longer exists", entity_type.target_type()),
                ));
                continue;
            };
            count.actual += 1;

            for (referenced_type, referenced_id) in target::references(connection, entity_type, target_id)? {
                if !target::exists(connection, referenced_type, referenced_id)? {
                    errors.push(finding(
                        FindingKind::MissingReference,
                        format!(
                            "references missing {} {referenced_id}",
                            referenced_type.target_type()
                        ),
                    ));
                }
            }

            if is_own_ancestor(connection, entity_type, target_id)? {
                errors.push(finding(
                    FindingKind::ParentCycle,
                    format!("{} is its own ancestor", entity_type.target_type()),
                ));
            }

            if display.trim().is_empty() {
                warnings.push(finding(
                    FindingKind::EmptyDisplayField,
                    format!("{} has an empty display name", entity_type.target_type()),
                ));
            }

            if entity_type == EntityType::Menus && target::menu_item_count(connection, target_id)? == 0 {
                warnings.push(finding(FindingKind::EmptyMenu, "menu has no items".to_string()));
            }

            // Counted over the whole table: rows created in the CMS collide too.
            if let Some(slug) = slug {
                if target::slug_count(connection, entity_type, &slug)? > 1 {
                    warnings.push(finding(
                        FindingKind::DuplicateSlug,
                        format!(
                            "slug `{slug}` is used by more than one {}",
                            entity_type.target_type()
                        ),
                    ));
                }
            }
        }

        record_counts.insert(entity_type, count);
    }

    let total: usize = record_counts.values().map(|count: &RecordCount| count.expected).sum();
    let integrity_score = integrity_score(total, errors.len());
    tracing::info!(
        run_id,
        total,
        issues = errors.len(),
        warnings = warnings.len(),
        integrity_score,
        "integrity report generated"
    );

    Ok(Report {
        migration,
        record_counts,
        integrity_score,
        errors,
        warnings,
    })
}

/// Walk parent links from a category or menu item; true if the walk comes
/// back to it. A loop above the row that does not include it ends the walk.
fn is_own_ancestor(
    connection: &Connection,
    entity_type: EntityType,
    id: i64,
) -> MigrationResult<bool> {
    let mut seen = HashSet::new();
    let mut cursor = target::tree_parent(connection, entity_type, id)?;
    while let Some(parent) = cursor {
        if parent == id {
            return Ok(true);
        }
        if !seen.insert(parent) {
            return Ok(false);
        }
        cursor = target::tree_parent(connection, entity_type, parent)?;
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{RunOptions, run_migration};
    use crate::schema::open_in_memory;

    #[test]
    fn score_rounds_to_two_places() {
        assert_eq!(integrity_score(10, 1), 90.0);
        assert_eq!(integrity_score(3, 1), 66.67);
        assert_eq!(integrity_score(0, 0), 100.0);
        assert_eq!(integrity_score(2, 5), 0.0);
    }

    #[test]
    fn verdict_follows_thresholds() {
        let connection = open_in_memory().expect("db");
        let run = ledger::create_run(&connection, "empty", serde_json::Map::new()).expect("run");
        let mut report = generate_report(&connection, run.id).expect("report");
        let thresholds = Thresholds::default();
        assert_eq!(report.verdict(thresholds), Verdict::Pass);

        report.integrity_score = 85.0;
        assert_eq!(report.verdict(thresholds), Verdict::PassWithWarnings);
        assert!(report.passes(thresholds));

        report.errors.push(Finding {
            kind: FindingKind::MissingTarget,
            entity_type: EntityType::News,
            source_id: 1,
            target_id: 1,
            message: "gone".to_string(),
        });
        assert!(!report.passes(thresholds));

        report.integrity_score = 50.0;
        assert_eq!(report.verdict(thresholds), Verdict::Fail);
    }

    #[test]
    fn warnings_do_not_lower_the_score() {
        let mut connection = open_in_memory().expect("db");
        let export = r#"{
            "menus": [{"id": 1, "menutype": "mainmenu", "title": "Main"},
                      {"id": 2, "menutype": "footer", "title": "Footer"}],
            "menu_items": [{"id": 10, "title": "Home", "menu_id": 1}]
        }"#;
        let run = run_migration(&mut connection, export, &RunOptions::new("menus")).expect("run");
        connection
            .execute("UPDATE menu_items SET title = ''", [])
            .expect("blank title");

        let report = generate_report(&connection, run.id).expect("report");
        assert_eq!(report.integrity_score, 100.0);
        let kinds: Vec<FindingKind> = report.warnings.iter().map(|finding| finding.kind).collect();
        assert!(kinds.contains(&FindingKind::EmptyMenu));
        assert!(kinds.contains(&FindingKind::EmptyDisplayField));
    }

    #[test]
    fn menu_item_cycle_is_an_issue() {
        let mut connection = open_in_memory().expect("db");
        let export = r#"{
            "menus": [{"id": 1, "menutype": "mainmenu", "title": "Main"}],
            "menu_items": [{"id": 10, "title": "A", "menu_id": 1},
                           {"id": 11, "title": "B", "menu_id": 1, "parent_id": 10}]
        }"#;
        let run = run_migration(&mut connection, export, &RunOptions::new("menus")).expect("run");
        let a = ledger::completed_target(&connection, EntityType::MenuItems, 10)
            .expect("lookup")
            .expect("a");
        let b = ledger::completed_target(&connection, EntityType::MenuItems, 11)
            .expect("lookup")
            .expect("b");
        connection
            .execute("UPDATE menu_items SET parent_id = ?2 WHERE id = ?1", [a, b])
            .expect("introduce cycle");

        let report = generate_report(&connection, run.id).expect("report");
        let cycles = report
            .errors
            .iter()
            .filter(|finding| finding.kind == FindingKind::ParentCycle)
            .count();
        assert_eq!(cycles, 2);
        assert_eq!(report.integrity_score, 0.0);
    }

    #[test]
    fn duplicate_slugs_are_warned() {
        let mut connection = open_in_memory().expect("db");
        let export = r#"{"articles": [{"id": 1, "title": "Profil"}, {"id": 2, "title": "Visi"}]}"#;
        let run = run_migration(&mut connection, export, &RunOptions::new("pages")).expect("run");
        connection
            .execute("UPDATE pages SET slug = 'profil'", [])
            .expect("collide slugs");

        let report = generate_report(&connection, run.id).expect("report");
        assert!(report.errors.is_empty());
        assert_eq!(
            report
                .warnings
                .iter()
                .filter(|finding| finding.kind == FindingKind::DuplicateSlug)
                .count(),
            2
        );
    }

    #[test]
    fn long_category_cycle_is_found() {
        let mut connection = open_in_memory().expect("db");
        let categories: Vec<String> = (1..=70)
            .map(|id| {
                if id == 1 {
                    format!(r#"{{"id": {id}, "name": "Level {id}"}}"#)
                } else {
                    format!(r#"{{"id": {id}, "name": "Level {id}", "parent": {}}}"#, id - 1)
                }
            })
            .collect();
        let export = format!(r#"{{"categories": [{}]}}"#, categories.join(","));
        let run = run_migration(&mut connection, &export, &RunOptions::new("deep")).expect("run");
        assert_eq!(run.failed_records, 0);

        let root = ledger::completed_target(&connection, EntityType::Categories, 1)
            .expect("lookup")
            .expect("root");
        let leaf = ledger::completed_target(&connection, EntityType::Categories, 70)
            .expect("lookup")
            .expect("leaf");
        connection
            .execute("UPDATE categories SET parent_id = ?2 WHERE id = ?1", [root, leaf])
            .expect("close the loop");

        let report = generate_report(&connection, run.id).expect("report");
        let cycles = report
            .errors
            .iter()
            .filter(|finding| finding.kind == FindingKind::ParentCycle)
            .count();
        assert_eq!(cycles, 70);
    }

    #[test]
    fn slug_taken_by_a_cms_row_is_warned() {
        let mut connection = open_in_memory().expect("db");
        let export = r#"{"articles": [{"id": 1, "title": "Profil"}]}"#;
        let run = run_migration(&mut connection, export, &RunOptions::new("pages")).expect("run");
        connection
            .execute(
                "INSERT INTO pages (title, slug, created_at_unix, updated_at_unix)
                 VALUES ('Profil Baru', 'profil', 0, 0)",
                [],
            )
            .expect("editor page");

        let report = generate_report(&connection, run.id).expect("report");
        let duplicates: Vec<&Finding> = report
            .warnings
            .iter()
            .filter(|finding| finding.kind == FindingKind::DuplicateSlug)
            .collect();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].source_id, 1);
        assert_eq!(report.integrity_score, 100.0);
    }
}
