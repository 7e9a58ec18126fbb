//! Target CMS tables: the writes the migration performs and the lookups it
//! needs. Rows are plain SQL; the CMS owns them once written.

use rusqlite::{Connection, OptionalExtension, params};

use crate::cleaner::{CleanCategory, CleanDocument, CleanMenu, CleanMenuItem, CleanNews, CleanPage};
use crate::entity::EntityType;
use crate::unix_timestamp;

pub fn exists(connection: &Connection, entity_type: EntityType, id: i64) -> rusqlite::Result<bool> {
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)",
        entity_type.table()
    );
    connection.query_row(&sql, [id], |row| row.get::<_, i64>(0).map(|v| v == 1))
}

pub fn count(connection: &Connection, entity_type: EntityType) -> rusqlite::Result<usize> {
    let sql = format!("SELECT COUNT(*) FROM {}", entity_type.table());
    connection
        .query_row(&sql, [], |row| row.get::<_, i64>(0))
        .map(|count| usize::try_from(count).unwrap_or_default())
}

/// Returns `base` if no other row of the type uses it, otherwise suffixes the
/// legacy id (and a counter if that is taken as well).
pub fn unique_slug(
    connection: &Connection,
    entity_type: EntityType,
    base: &str,
    source_id: i64,
    own_id: Option<i64>,
) -> rusqlite::Result<String> {
    if entity_type == EntityType::MenuItems {
        return Ok(base.to_string());
    }
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE slug = ?1 AND id IS NOT ?2)",
        entity_type.table()
    );
    let taken = |slug: &str| -> rusqlite::Result<bool> {
        connection.query_row(&sql, params![slug, own_id], |row| {
            row.get::<_, i64>(0).map(|v| v == 1)
        })
    };

    if !taken(base)? {
        return Ok(base.to_string());
    }
    let with_id = format!("{base}-{source_id}");
    if !taken(&with_id)? {
        return Ok(with_id);
    }
    let mut counter = 2u32;
    loop {
        let candidate = format!("{with_id}-{counter}");
        if !taken(&candidate)? {
            return Ok(candidate);
        }
        counter += 1;
    }
}

/// Update `existing` in place when it still exists, otherwise insert.
fn resolve_existing(
    connection: &Connection,
    entity_type: EntityType,
    existing: Option<i64>,
) -> rusqlite::Result<Option<i64>> {
    match existing {
        Some(id) if exists(connection, entity_type, id)? => Ok(Some(id)),
        _ => Ok(None),
    }
}

pub fn write_category(
    connection: &Connection,
    existing: Option<i64>,
    record: &CleanCategory,
    parent_id: Option<i64>,
) -> rusqlite::Result<i64> {
    let existing = resolve_existing(connection, EntityType::Categories, existing)?;
    let slug = unique_slug(
        connection,
        EntityType::Categories,
        &record.slug,
        record.source_id,
        existing,
    )?;
    let now = unix_timestamp();
    match existing {
        Some(id) => {
            connection.execute(
                "UPDATE categories
                 SET name = ?2, slug = ?3, description = ?4, parent_id = ?5, is_active = ?6, updated_at_unix = ?7
                 WHERE id = ?1",
                params![id, record.name, slug, record.description, parent_id, record.is_active, now],
            )?;
            Ok(id)
        }
        None => {
            connection.execute(
                "INSERT INTO categories (name, slug, description, parent_id, is_active, created_at_unix, updated_at_unix)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![record.name, slug, record.description, parent_id, record.is_active, now],
            )?;
            Ok(connection.last_insert_rowid())
        }
    }
}

pub fn write_page(
    connection: &Connection,
    existing: Option<i64>,
    record: &CleanPage,
) -> rusqlite::Result<i64> {
    let existing = resolve_existing(connection, EntityType::Pages, existing)?;
    let slug = unique_slug(
        connection,
        EntityType::Pages,
        &record.slug,
        record.source_id,
        existing,
    )?;
    let now = unix_timestamp();
    match existing {
        Some(id) => {
            connection.execute(
                "UPDATE pages
                 SET title = ?2, slug = ?3, content = ?4, excerpt = ?5, template = ?6,
                     meta_description = ?7, meta_keywords = ?8, is_published = ?9,
                     published_at = ?10, view_count = ?11, updated_at_unix = ?12
                 WHERE id = ?1",
                params![
                    id,
                    record.title,
                    slug,
                    record.content,
                    record.excerpt,
                    record.template,
                    record.meta_description,
                    record.meta_keywords,
                    record.is_published,
                    record.published_at,
                    record.view_count,
                    now
                ],
            )?;
            Ok(id)
        }
        None => {
            connection.execute(
                "INSERT INTO pages (
                    title, slug, content, excerpt, template, meta_description, meta_keywords,
                    is_published, published_at, view_count, created_at_unix, updated_at_unix
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    record.title,
                    slug,
                    record.content,
                    record.excerpt,
                    record.template,
                    record.meta_description,
                    record.meta_keywords,
                    record.is_published,
                    record.published_at,
                    record.view_count,
                    now
                ],
            )?;
            Ok(connection.last_insert_rowid())
        }
    }
}

pub fn write_news(
    connection: &Connection,
    existing: Option<i64>,
    record: &CleanNews,
    category_id: Option<i64>,
) -> rusqlite::Result<i64> {
    let existing = resolve_existing(connection, EntityType::News, existing)?;
    let slug = unique_slug(
        connection,
        EntityType::News,
        &record.slug,
        record.source_id,
        existing,
    )?;
    let now = unix_timestamp();
    match existing {
        Some(id) => {
            connection.execute(
                "UPDATE news
                 SET title = ?2, slug = ?3, content = ?4, excerpt = ?5, category_id = ?6,
                     is_published = ?7, is_featured = ?8, published_at = ?9, view_count = ?10,
                     updated_at_unix = ?11
                 WHERE id = ?1",
                params![
                    id,
                    record.title,
                    slug,
                    record.content,
                    record.excerpt,
                    category_id,
                    record.is_published,
                    record.is_featured,
                    record.published_at,
                    record.view_count,
                    now
                ],
            )?;
            Ok(id)
        }
        None => {
            connection.execute(
                "INSERT INTO news (
                    title, slug, content, excerpt, category_id, is_published, is_featured,
                    published_at, view_count, created_at_unix, updated_at_unix
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    record.title,
                    slug,
                    record.content,
                    record.excerpt,
                    category_id,
                    record.is_published,
                    record.is_featured,
                    record.published_at,
                    record.view_count,
                    now
                ],
            )?;
            Ok(connection.last_insert_rowid())
        }
    }
}

pub fn write_menu(
    connection: &Connection,
    existing: Option<i64>,
    record: &CleanMenu,
) -> rusqlite::Result<i64> {
    let existing = resolve_existing(connection, EntityType::Menus, existing)?;
    let slug = unique_slug(
        connection,
        EntityType::Menus,
        &record.slug,
        record.source_id,
        existing,
    )?;
    let now = unix_timestamp();
    match existing {
        Some(id) => {
            connection.execute(
                "UPDATE menus
                 SET name = ?2, slug = ?3, location = ?4, description = ?5, updated_at_unix = ?6
                 WHERE id = ?1",
                params![id, record.name, slug, record.location, record.description, now],
            )?;
            Ok(id)
        }
        None => {
            connection.execute(
                "INSERT INTO menus (name, slug, location, description, created_at_unix, updated_at_unix)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![record.name, slug, record.location, record.description, now],
            )?;
            Ok(connection.last_insert_rowid())
        }
    }
}

pub fn write_menu_item(
    connection: &Connection,
    existing: Option<i64>,
    record: &CleanMenuItem,
    menu_id: i64,
    parent_id: Option<i64>,
) -> rusqlite::Result<i64> {
    let existing = resolve_existing(connection, EntityType::MenuItems, existing)?;
    let now = unix_timestamp();
    match existing {
        Some(id) => {
            connection.execute(
                "UPDATE menu_items
                 SET menu_id = ?2, parent_id = ?3, title = ?4, url = ?5, item_type = ?6,
                     target = ?7, sort_order = ?8, is_active = ?9, updated_at_unix = ?10
                 WHERE id = ?1",
                params![
                    id,
                    menu_id,
                    parent_id,
                    record.title,
                    record.url,
                    record.item_type,
                    record.target,
                    record.sort_order,
                    record.is_active,
                    now
                ],
            )?;
            Ok(id)
        }
        None => {
            connection.execute(
                "INSERT INTO menu_items (
                    menu_id, parent_id, title, url, item_type, target, sort_order, is_active,
                    created_at_unix, updated_at_unix
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    menu_id,
                    parent_id,
                    record.title,
                    record.url,
                    record.item_type,
                    record.target,
                    record.sort_order,
                    record.is_active,
                    now
                ],
            )?;
            Ok(connection.last_insert_rowid())
        }
    }
}

pub fn write_document(
    connection: &Connection,
    existing: Option<i64>,
    record: &CleanDocument,
    category_id: Option<i64>,
) -> rusqlite::Result<i64> {
    let existing = resolve_existing(connection, EntityType::Documents, existing)?;
    let slug = unique_slug(
        connection,
        EntityType::Documents,
        &record.slug,
        record.source_id,
        existing,
    )?;
    let now = unix_timestamp();
    match existing {
        Some(id) => {
            connection.execute(
                "UPDATE documents
                 SET title = ?2, slug = ?3, description = ?4, file_path = ?5, file_name = ?6,
                     mime_type = ?7, file_size = ?8, category_id = ?9, is_published = ?10,
                     download_count = ?11, published_at = ?12, updated_at_unix = ?13
                 WHERE id = ?1",
                params![
                    id,
                    record.title,
                    slug,
                    record.description,
                    record.file_path,
                    record.file_name,
                    record.mime_type,
                    record.file_size,
                    category_id,
                    record.is_published,
                    record.download_count,
                    record.published_at,
                    now
                ],
            )?;
            Ok(id)
        }
        None => {
            connection.execute(
                "INSERT INTO documents (
                    title, slug, description, file_path, file_name, mime_type, file_size,
                    category_id, is_published, download_count, published_at,
                    created_at_unix, updated_at_unix
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
                params![
                    record.title,
                    slug,
                    record.description,
                    record.file_path,
                    record.file_name,
                    record.mime_type,
                    record.file_size,
                    category_id,
                    record.is_published,
                    record.download_count,
                    record.published_at,
                    now
                ],
            )?;
            Ok(connection.last_insert_rowid())
        }
    }
}

/// Deletes one target row; returns the number of rows removed (0 if it was
/// already gone).
pub fn delete(connection: &Connection, entity_type: EntityType, id: i64) -> rusqlite::Result<usize> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", entity_type.table());
    connection.execute(&sql, [id])
}

/// Display field (title/name) and slug of a row, if it exists.
pub fn display_fields(
    connection: &Connection,
    entity_type: EntityType,
    id: i64,
) -> rusqlite::Result<Option<(String, Option<String>)>> {
    let sql = match entity_type {
        EntityType::Categories => "SELECT name, slug FROM categories WHERE id = ?1",
        EntityType::Pages => "SELECT title, slug FROM pages WHERE id = ?1",
        EntityType::News => "SELECT title, slug FROM news WHERE id = ?1",
        EntityType::Menus => "SELECT name, slug FROM menus WHERE id = ?1",
        EntityType::MenuItems => "SELECT title, NULL FROM menu_items WHERE id = ?1",
        EntityType::Documents => "SELECT title, slug FROM documents WHERE id = ?1",
    };
    connection
        .query_row(sql, [id], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()
}

/// The foreign references a row holds: `(referenced type, referenced id)`.
pub fn references(
    connection: &Connection,
    entity_type: EntityType,
    id: i64,
) -> rusqlite::Result<Vec<(EntityType, i64)>> {
    let row: Option<(Option<i64>, Option<i64>)> = match entity_type {
        EntityType::Categories => connection
            .query_row("SELECT parent_id, NULL FROM categories WHERE id = ?1", [id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?,
        EntityType::News => connection
            .query_row("SELECT category_id, NULL FROM news WHERE id = ?1", [id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?,
        EntityType::Documents => connection
            .query_row("SELECT category_id, NULL FROM documents WHERE id = ?1", [id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?,
        EntityType::MenuItems => connection
            .query_row("SELECT menu_id, parent_id FROM menu_items WHERE id = ?1", [id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?,
        EntityType::Pages | EntityType::Menus => None,
    };
    let Some((first, second)) = row else {
        return Ok(Vec::new());
    };

    let mut out = Vec::new();
    match entity_type {
        EntityType::Categories | EntityType::News | EntityType::Documents => {
            if let Some(category_id) = first {
                out.push((EntityType::Categories, category_id));
            }
        }
        EntityType::MenuItems => {
            if let Some(menu_id) = first {
                out.push((EntityType::Menus, menu_id));
            }
            if let Some(parent_id) = second {
                out.push((EntityType::MenuItems, parent_id));
            }
        }
        EntityType::Pages | EntityType::Menus => {}
    }
    Ok(out)
}

/// Parent row of a category or menu item; `None` for the other types, for a
/// root row, and for a missing row.
pub fn tree_parent(
    connection: &Connection,
    entity_type: EntityType,
    id: i64,
) -> rusqlite::Result<Option<i64>> {
    let sql = match entity_type {
        EntityType::Categories => "SELECT parent_id FROM categories WHERE id = ?1",
        EntityType::MenuItems => "SELECT parent_id FROM menu_items WHERE id = ?1",
        _ => return Ok(None),
    };
    connection
        .query_row(sql, [id], |row| row.get::<_, Option<i64>>(0))
        .optional()
        .map(Option::flatten)
}

/// Rows of the type carrying `slug`, whoever wrote them.
pub fn slug_count(
    connection: &Connection,
    entity_type: EntityType,
    slug: &str,
) -> rusqlite::Result<usize> {
    if entity_type == EntityType::MenuItems {
        return Ok(0);
    }
    let sql = format!("SELECT COUNT(*) FROM {} WHERE slug = ?1", entity_type.table());
    connection
        .query_row(&sql, [slug], |row| row.get::<_, i64>(0))
        .map(|count| usize::try_from(count).unwrap_or_default())
}

pub fn menu_item_count(connection: &Connection, menu_id: i64) -> rusqlite::Result<usize> {
    connection
        .query_row(
            "SELECT COUNT(*) FROM menu_items WHERE menu_id = ?1",
            [menu_id],
            |row| row.get::<_, i64>(0),
        )
        .map(|count| usize::try_from(count).unwrap_or_default())
}
