use cmsmigrate_core::EntityType;
use cmsmigrate_core::ledger::{self, ItemStatus, RunStatus};
use cmsmigrate_core::manager::{RunOptions, preview, run_migration};
use cmsmigrate_core::report::{FindingKind, Thresholds, Verdict, generate_report};
use cmsmigrate_core::rollback::{RollbackScope, rollback};
use cmsmigrate_core::runtime::{PathOverrides, ResolutionContext, init_layout, resolve_paths};
use cmsmigrate_core::schema::{open_database, open_in_memory};
use cmsmigrate_core::target;
use rusqlite::Connection;
use tempfile::tempdir;

const CATEGORIES: &str = r#"{"categories":[{"id":1,"name":"News"},{"id":2,"name":"Sports","parent":1}]}"#;

fn target_of(connection: &Connection, entity_type: EntityType, source_id: i64) -> i64 {
    ledger::completed_target(connection, entity_type, source_id)
        .expect("ledger lookup")
        .unwrap_or_else(|| panic!("{entity_type} {source_id} was not migrated"))
}

fn category_parent(connection: &Connection, id: i64) -> Option<i64> {
    connection
        .query_row("SELECT parent_id FROM categories WHERE id = ?1", [id], |row| row.get(0))
        .expect("category row")
}

fn table_snapshot(connection: &Connection, sql: &str) -> Vec<(i64, String)> {
    let mut statement = connection.prepare(sql).expect("prepare");
    statement
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("rows")
}

#[test]
fn sample_categories_link_parent_and_validate_clean() {
    let mut connection = open_in_memory().expect("db");
    let run = run_migration(&mut connection, CATEGORIES, &RunOptions::new("sample")).expect("run");

    let news = target_of(&connection, EntityType::Categories, 1);
    let sports = target_of(&connection, EntityType::Categories, 2);
    assert_eq!(category_parent(&connection, sports), Some(news));
    assert_eq!(category_parent(&connection, news), None);

    let completed = ledger::count_by_type(&connection, ItemStatus::Completed, Some(run.id))
        .expect("counts");
    assert_eq!(completed.get(&EntityType::Categories), Some(&2));

    let report = generate_report(&connection, run.id).expect("report");
    assert!(report.errors.is_empty());
    assert_eq!(report.integrity_score, 100.0);
    assert_eq!(report.verdict(Thresholds::default()), Verdict::Pass);
}

#[test]
fn child_listed_before_parent_still_resolves() {
    let mut connection = open_in_memory().expect("db");
    let export = r#"{"categories": [
        {"id": 12, "name": "Putusan", "parent_id": 11},
        {"id": 11, "name": "Perkara", "parent_id": 10},
        {"id": 10, "name": "Informasi"}
    ]}"#;
    let run = run_migration(&mut connection, export, &RunOptions::new("ordering")).expect("run");
    assert_eq!(run.failed_records, 0);

    for (child, parent) in [(12, 11), (11, 10)] {
        let child_target = target_of(&connection, EntityType::Categories, child);
        let parent_target = target_of(&connection, EntityType::Categories, parent);
        assert_eq!(category_parent(&connection, child_target), Some(parent_target));
    }
}

#[test]
fn rerun_is_idempotent() {
    let mut connection = open_in_memory().expect("db");
    let export = r#"{
        "categories": [{"id": 1, "name": "Berita"}],
        "articles": [{"id": 3, "title": "Profil", "introtext": "<p>Pengadilan</p>"}],
        "news": [{"id": 4, "title": "Sidang", "catid": 1}]
    }"#;
    run_migration(&mut connection, export, &RunOptions::new("first")).expect("first");
    let pages = "SELECT id, title || '|' || slug || '|' || content FROM pages ORDER BY id";
    let news = "SELECT id, title || '|' || slug || '|' || IFNULL(category_id, '') FROM news ORDER BY id";
    let before = (table_snapshot(&connection, pages), table_snapshot(&connection, news));

    let second = run_migration(&mut connection, export, &RunOptions::new("second")).expect("second");
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.processed_records, 0);
    assert_eq!(
        (table_snapshot(&connection, pages), table_snapshot(&connection, news)),
        before
    );
}

#[test]
fn force_updates_rows_in_place() {
    let mut connection = open_in_memory().expect("db");
    run_migration(&mut connection, CATEGORIES, &RunOptions::new("first")).expect("first");
    let sports = target_of(&connection, EntityType::Categories, 2);

    let renamed = r#"{"categories":[{"id":1,"name":"News"},{"id":2,"name":"Olahraga","parent":1}]}"#;
    let forced = run_migration(&mut connection, renamed, &RunOptions::new("forced").force(true))
        .expect("forced");
    assert_eq!(forced.processed_records, 2);
    assert_eq!(target::count(&connection, EntityType::Categories).expect("count"), 2);
    assert_eq!(target_of(&connection, EntityType::Categories, 2), sports);

    let name: String = connection
        .query_row("SELECT name FROM categories WHERE id = ?1", [sports], |row| row.get(0))
        .expect("name");
    assert_eq!(name, "Olahraga");
}

#[test]
fn menu_child_before_parent_still_resolves() {
    let mut connection = open_in_memory().expect("db");
    let export = r#"{
        "menus": [{"id": 1, "menutype": "mainmenu", "title": "Main Menu"}],
        "menu_items": [
            {"id": 6, "title": "Visi Misi", "menutype": "mainmenu", "parent_id": 5},
            {"id": 5, "title": "Tentang", "menutype": "mainmenu"}
        ]
    }"#;
    let run = run_migration(&mut connection, export, &RunOptions::new("menus")).expect("run");
    assert_eq!(run.failed_records, 0);

    let child = target_of(&connection, EntityType::MenuItems, 6);
    let parent = target_of(&connection, EntityType::MenuItems, 5);
    let parent_of = |id| target::tree_parent(&connection, EntityType::MenuItems, id).expect("parent");
    assert_eq!(parent_of(child), Some(parent));
    assert_eq!(parent_of(parent), None);
}

#[test]
fn rollback_delete_mode_removes_categories_and_ledger() {
    let mut connection = open_in_memory().expect("db");
    run_migration(&mut connection, CATEGORIES, &RunOptions::new("first")).expect("run");
    let migrated = [
        target_of(&connection, EntityType::Categories, 1),
        target_of(&connection, EntityType::Categories, 2),
    ];

    let outcome = rollback(
        &mut connection,
        RollbackScope::Entity(EntityType::Categories),
        false,
    )
    .expect("rollback");
    assert_eq!(outcome.deleted, 2);
    assert_eq!(outcome.kept, 0);
    for id in migrated {
        assert!(!target::exists(&connection, EntityType::Categories, id).expect("exists"));
    }
    assert!(ledger::items_for(&connection, EntityType::Categories, None).expect("items").is_empty());
}

#[test]
fn rollback_keep_mode_clears_ledger_only() {
    let mut connection = open_in_memory().expect("db");
    run_migration(&mut connection, CATEGORIES, &RunOptions::new("first")).expect("run");
    let migrated = [
        target_of(&connection, EntityType::Categories, 1),
        target_of(&connection, EntityType::Categories, 2),
    ];

    let outcome = rollback(
        &mut connection,
        RollbackScope::Entity(EntityType::Categories),
        true,
    )
    .expect("rollback");
    assert_eq!(outcome.deleted, 0);
    assert_eq!(outcome.kept, 2);
    for id in migrated {
        assert!(target::exists(&connection, EntityType::Categories, id).expect("exists"));
    }
    assert!(ledger::items_for(&connection, EntityType::Categories, None).expect("items").is_empty());
}

#[test]
fn one_missing_target_in_ten_scores_ninety() {
    let mut connection = open_in_memory().expect("db");
    let articles: Vec<String> = (1..=10)
        .map(|id| format!(r#"{{"id": {id}, "title": "Halaman {id}"}}"#))
        .collect();
    let export = format!(r#"{{"articles": [{}]}}"#, articles.join(","));
    let run = run_migration(&mut connection, &export, &RunOptions::new("pages")).expect("run");

    let gone = target_of(&connection, EntityType::Pages, 7);
    target::delete(&connection, EntityType::Pages, gone).expect("delete");

    let report = generate_report(&connection, run.id).expect("report");
    assert_eq!(report.total_expected(), 10);
    assert_eq!(report.total_actual(), 9);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].kind, FindingKind::MissingTarget);
    assert_eq!(report.errors[0].source_id, 7);
    assert_eq!(report.integrity_score, 90.0);
    assert_eq!(report.verdict(Thresholds::default()), Verdict::PassWithWarnings);
    assert!(!report.passes(Thresholds::default()));
}

#[test]
fn script_tags_are_stripped_from_content() {
    let mut connection = open_in_memory().expect("db");
    let export = r#"{"news": [{"id": 9, "title": "Pengumuman",
        "introtext": "<script>alert(1)</script><p>Hello</p>"}]}"#;
    run_migration(&mut connection, export, &RunOptions::new("news")).expect("run");

    let id = target_of(&connection, EntityType::News, 9);
    let content: String = connection
        .query_row("SELECT content FROM news WHERE id = ?1", [id], |row| row.get(0))
        .expect("content");
    assert_eq!(content, "<p>Hello</p>");
}

#[test]
fn dry_run_matches_real_run_and_writes_nothing() {
    let mut connection = open_in_memory().expect("db");
    let report = preview(&connection, CATEGORIES, false).expect("preview");
    assert_eq!(report.totals().would_create, 2);
    assert!(ledger::list_runs(&connection).expect("runs").is_empty());
    assert_eq!(target::count(&connection, EntityType::Categories).expect("count"), 0);

    let run = run_migration(&mut connection, CATEGORIES, &RunOptions::new("real")).expect("run");
    assert_eq!(run.processed_records, report.totals().would_create);
}

#[test]
fn file_database_persists_runs_across_connections() {
    let dir = tempdir().expect("tempdir");
    let context = ResolutionContext {
        cwd: dir.path().to_path_buf(),
        executable_dir: None,
    };
    let overrides = PathOverrides {
        project_root: Some(dir.path().to_path_buf()),
        ..PathOverrides::default()
    };
    let paths = resolve_paths(&context, &overrides).expect("paths");
    init_layout(&paths, false).expect("init");

    let run_id = {
        let mut connection = open_database(&paths).expect("open");
        run_migration(&mut connection, CATEGORIES, &RunOptions::new("persisted"))
            .expect("run")
            .id
    };

    let connection = open_database(&paths).expect("reopen");
    let run = ledger::require_run(&connection, run_id).expect("stored run");
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.processed_records, 2);
    assert_eq!(
        ledger::latest_completed_run(&connection).expect("latest").map(|run| run.id),
        Some(run_id)
    );
    assert_eq!(ledger::running_run_id(&connection).expect("lease"), None);
}
