//! Normalizes raw legacy records into fully defaulted, typed shapes.
//!
//! Every function here is pure: the same record always cleans to the same
//! value, which is what makes re-runs comparable.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::entity::EntityType;
use crate::sanitize::{sanitize_html, strip_tags};
use crate::source::{
    LegacyArticle, LegacyCategory, LegacyDocument, LegacyMenu, LegacyMenuItem, RawRecord,
};

pub const EXCERPT_MAX_CHARS: usize = 300;

static JOOMLA_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\{/?(?:loadposition|loadmodule|loadmoduleid|mospagebreak|module|modulepos|rokbox|jumi|sigplus|gallery|phocadownload|phocagallery|jcomments|emailcloak)\b[^}]*\}",
    )
    .expect("joomla token pattern")
});

static READMORE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<hr\b[^>]*\bid\s*=\s*["']?system-readmore["']?[^>]*>"#)
        .expect("readmore pattern")
});

static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("blank line pattern"));

/// Joomla publication state (`state` on content, `published` elsewhere).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publication {
    Published,
    Unpublished,
    Archived,
    Trashed,
}

impl Publication {
    pub fn from_flags(state: Option<i64>, published: Option<i64>) -> Self {
        match state.or(published) {
            None | Some(1) => Self::Published,
            Some(2) => Self::Archived,
            Some(-2) => Self::Trashed,
            Some(_) => Self::Unpublished,
        }
    }

    pub fn is_published(self) -> bool {
        self == Self::Published
    }
}

/// Result of cleaning a record that was readable.
#[derive(Debug, Clone, PartialEq)]
pub enum CleanOutcome<T> {
    Ready(T),
    /// Excluded by business rule, e.g. a trashed legacy record.
    Excluded(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanCategory {
    pub source_id: i64,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub parent_source_id: Option<i64>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanPage {
    pub source_id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: String,
    pub template: String,
    pub meta_description: String,
    pub meta_keywords: String,
    pub is_published: bool,
    pub published_at: Option<String>,
    pub view_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanNews {
    pub source_id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: String,
    pub category_source_id: Option<i64>,
    pub is_published: bool,
    pub is_featured: bool,
    pub published_at: Option<String>,
    pub view_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanMenu {
    pub source_id: i64,
    pub name: String,
    pub slug: String,
    pub menutype: String,
    pub location: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanMenuItem {
    pub source_id: i64,
    pub menu_source_id: Option<i64>,
    pub menutype: String,
    pub title: String,
    pub url: String,
    pub item_type: String,
    pub target: String,
    pub sort_order: i64,
    pub is_active: bool,
    pub parent_source_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanDocument {
    pub source_id: i64,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub file_path: String,
    pub file_name: String,
    pub mime_type: String,
    pub file_size: i64,
    pub category_source_id: Option<i64>,
    pub is_published: bool,
    pub download_count: i64,
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CleanRecord {
    Category(CleanCategory),
    Page(CleanPage),
    News(CleanNews),
    Menu(CleanMenu),
    MenuItem(CleanMenuItem),
    Document(CleanDocument),
}

impl CleanRecord {
    pub fn source_id(&self) -> i64 {
        match self {
            Self::Category(record) => record.source_id,
            Self::Page(record) => record.source_id,
            Self::News(record) => record.source_id,
            Self::Menu(record) => record.source_id,
            Self::MenuItem(record) => record.source_id,
            Self::Document(record) => record.source_id,
        }
    }
}

/// Clean one raw record as the given entity type. `Err` carries the
/// record-level rejection message.
pub fn clean(record: &RawRecord, entity_type: EntityType) -> Result<CleanOutcome<CleanRecord>, String> {
    fn lift<T>(
        outcome: Result<CleanOutcome<T>, String>,
        wrap: fn(T) -> CleanRecord,
    ) -> Result<CleanOutcome<CleanRecord>, String> {
        outcome.map(|outcome| match outcome {
            CleanOutcome::Ready(value) => CleanOutcome::Ready(wrap(value)),
            CleanOutcome::Excluded(reason) => CleanOutcome::Excluded(reason),
        })
    }

    match entity_type {
        EntityType::Categories => lift(clean_category(record), CleanRecord::Category),
        EntityType::Pages => lift(clean_page(record), CleanRecord::Page),
        EntityType::News => lift(clean_news(record), CleanRecord::News),
        EntityType::Menus => lift(clean_menu(record), CleanRecord::Menu),
        EntityType::MenuItems => lift(clean_menu_item(record), CleanRecord::MenuItem),
        EntityType::Documents => lift(clean_document(record), CleanRecord::Document),
    }
}

pub fn clean_category(record: &RawRecord) -> Result<CleanOutcome<CleanCategory>, String> {
    let legacy: LegacyCategory = record.decode()?;
    let source_id = require_id(legacy.id)?;
    let publication = Publication::from_flags(legacy.published, legacy.state);
    if publication == Publication::Trashed {
        return Ok(trashed(EntityType::Categories, source_id));
    }
    let name = require_text(first_text(&[&legacy.title, &legacy.name]), "name")?;

    Ok(CleanOutcome::Ready(CleanCategory {
        source_id,
        slug: derive_slug(legacy.alias.as_deref(), &name, "category", source_id),
        description: clean_rich_text(legacy.description.as_deref().unwrap_or_default()),
        parent_source_id: positive(legacy.parent_id.or(legacy.parent)),
        is_active: publication.is_published(),
        name,
    }))
}

pub fn clean_page(record: &RawRecord) -> Result<CleanOutcome<CleanPage>, String> {
    let legacy: LegacyArticle = record.decode()?;
    let source_id = require_id(legacy.id)?;
    let publication = Publication::from_flags(legacy.state, legacy.published);
    if publication == Publication::Trashed {
        return Ok(trashed(EntityType::Pages, source_id));
    }
    let title = require_text(first_text(&[&legacy.title]), "title")?;
    let (content, excerpt) = article_body(&legacy);

    Ok(CleanOutcome::Ready(CleanPage {
        source_id,
        slug: derive_slug(legacy.alias.as_deref(), &title, "page", source_id),
        content,
        excerpt,
        template: non_empty_or(
            clean_text(legacy.template.as_deref().unwrap_or_default()),
            "default",
        ),
        meta_description: clean_text(legacy.metadesc.as_deref().unwrap_or_default()),
        meta_keywords: clean_text(legacy.metakey.as_deref().unwrap_or_default()),
        is_published: publication.is_published(),
        published_at: clean_date(legacy.publish_up.as_deref())
            .or_else(|| clean_date(legacy.created.as_deref())),
        view_count: legacy.hits.unwrap_or(0).max(0),
        title,
    }))
}

pub fn clean_news(record: &RawRecord) -> Result<CleanOutcome<CleanNews>, String> {
    let legacy: LegacyArticle = record.decode()?;
    let source_id = require_id(legacy.id)?;
    let publication = Publication::from_flags(legacy.state, legacy.published);
    if publication == Publication::Trashed {
        return Ok(trashed(EntityType::News, source_id));
    }
    let title = require_text(first_text(&[&legacy.title]), "title")?;
    let (content, excerpt) = article_body(&legacy);

    Ok(CleanOutcome::Ready(CleanNews {
        source_id,
        slug: derive_slug(legacy.alias.as_deref(), &title, "news", source_id),
        content,
        excerpt,
        category_source_id: positive(legacy.catid.or(legacy.category_id)),
        is_published: publication.is_published(),
        is_featured: legacy.featured.unwrap_or(0) == 1,
        published_at: clean_date(legacy.publish_up.as_deref())
            .or_else(|| clean_date(legacy.created.as_deref())),
        view_count: legacy.hits.unwrap_or(0).max(0),
        title,
    }))
}

pub fn clean_menu(record: &RawRecord) -> Result<CleanOutcome<CleanMenu>, String> {
    let legacy: LegacyMenu = record.decode()?;
    let source_id = require_id(legacy.id)?;
    let name = require_text(
        first_text(&[&legacy.title, &legacy.name, &legacy.menutype]),
        "title",
    )?;
    let menutype = non_empty_or(
        clean_text(legacy.menutype.as_deref().unwrap_or_default()),
        &slugify(&name),
    );

    Ok(CleanOutcome::Ready(CleanMenu {
        source_id,
        slug: derive_slug(Some(menutype.as_str()), &name, "menu", source_id),
        location: non_empty_or(
            clean_text(legacy.location.as_deref().unwrap_or_default()),
            &menutype,
        ),
        description: clean_text(legacy.description.as_deref().unwrap_or_default()),
        menutype,
        name,
    }))
}

pub fn clean_menu_item(record: &RawRecord) -> Result<CleanOutcome<CleanMenuItem>, String> {
    let legacy: LegacyMenuItem = record.decode()?;
    let source_id = require_id(legacy.id)?;
    let publication = Publication::from_flags(legacy.published, None);
    if publication == Publication::Trashed {
        return Ok(trashed(EntityType::MenuItems, source_id));
    }
    let title = require_text(first_text(&[&legacy.title, &legacy.name]), "title")?;

    Ok(CleanOutcome::Ready(CleanMenuItem {
        source_id,
        menu_source_id: positive(legacy.menu_id),
        menutype: clean_text(legacy.menutype.as_deref().unwrap_or_default()),
        title,
        url: clean_text(legacy.link.as_deref().or(legacy.url.as_deref()).unwrap_or_default()),
        item_type: non_empty_or(
            clean_text(legacy.item_type.as_deref().unwrap_or_default()).to_ascii_lowercase(),
            "url",
        ),
        target: if legacy.browser_nav_camel.or(legacy.browser_nav).unwrap_or(0) == 1 {
            "_blank".to_string()
        } else {
            "_self".to_string()
        },
        sort_order: legacy.ordering.unwrap_or(0),
        is_active: publication.is_published(),
        // Joomla's menu tree hangs every top-level item off root item 1.
        parent_source_id: legacy.parent_id.or(legacy.parent).filter(|id| *id > 1),
    }))
}

pub fn clean_document(record: &RawRecord) -> Result<CleanOutcome<CleanDocument>, String> {
    let legacy: LegacyDocument = record.decode()?;
    let source_id = require_id(legacy.id)?;
    let publication = Publication::from_flags(legacy.published, legacy.state);
    if publication == Publication::Trashed {
        return Ok(trashed(EntityType::Documents, source_id));
    }
    let file_path = first_text(&[&legacy.url, &legacy.file_path, &legacy.path]);
    let file_name = non_empty_or(
        first_text(&[&legacy.filename, &legacy.file_name]),
        file_path.rsplit(['/', '\\']).next().unwrap_or_default(),
    );
    let title = require_text(
        first_text(&[&legacy.title, &legacy.name, &Some(file_name.clone())]),
        "title",
    )?;
    let mime_type = match legacy.mime.as_deref().or(legacy.mime_type.as_deref()).map(clean_text) {
        Some(mime) if !mime.is_empty() => mime.to_ascii_lowercase(),
        _ => mime_guess::from_path(&file_name)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string(),
    };

    Ok(CleanOutcome::Ready(CleanDocument {
        source_id,
        slug: derive_slug(legacy.alias.as_deref(), &title, "document", source_id),
        description: clean_rich_text(legacy.description.as_deref().unwrap_or_default()),
        file_path,
        file_name,
        mime_type,
        file_size: legacy
            .size
            .or(legacy.filesize)
            .or(legacy.file_size)
            .unwrap_or(0)
            .max(0),
        category_source_id: positive(legacy.catid.or(legacy.category_id)),
        is_published: publication.is_published(),
        download_count: legacy.hits.or(legacy.downloads).unwrap_or(0).max(0),
        published_at: clean_date(legacy.created.as_deref()),
        title,
    }))
}

/// Single-line text: repaired encoding, no control characters, collapsed whitespace.
pub fn clean_text(value: &str) -> String {
    let repaired = repair_double_encoding(&fix_mojibake(value));
    let replaced = repaired.replace("&nbsp;", " ");
    let mut out = String::with_capacity(replaced.len());
    let mut pending_space = false;
    for ch in replaced.chars() {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if ch.is_control() {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(ch);
    }
    out
}

/// Rich text: legacy tokens removed, then passed through the HTML allow-list.
pub fn clean_rich_text(value: &str) -> String {
    let repaired = repair_double_encoding(&fix_mojibake(value)).replace("\r\n", "\n");
    let without_controls: String = repaired
        .chars()
        .filter(|ch| !ch.is_control() || matches!(ch, '\n' | '\t'))
        .map(|ch| if ch == '\r' { '\n' } else { ch })
        .collect();
    let without_tokens = JOOMLA_TOKEN.replace_all(&without_controls, "");
    let without_readmore = READMORE_MARKER.replace_all(&without_tokens, "");
    let sanitized = sanitize_html(&without_readmore);
    BLANK_LINES.replace_all(&sanitized, "\n\n").trim().to_string()
}

/// URL slug: diacritics folded, lower-cased, non-alphanumerics collapsed to `-`.
pub fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_dash = false;
    for ch in value.nfkd().filter(|ch| !is_combining_mark(*ch)) {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

fn derive_slug(alias: Option<&str>, title: &str, kind: &str, source_id: i64) -> String {
    let from_alias = alias.map(slugify).unwrap_or_default();
    if !from_alias.is_empty() {
        return from_alias;
    }
    let from_title = slugify(title);
    if !from_title.is_empty() {
        return from_title;
    }
    format!("{kind}-{source_id}")
}

fn article_body(legacy: &LegacyArticle) -> (String, String) {
    let intro = legacy.introtext.as_deref().unwrap_or_default();
    let full = legacy.fulltext.as_deref().unwrap_or_default();
    let raw_content = match legacy.content.as_deref() {
        Some(content) if !content.trim().is_empty() => content.to_string(),
        _ if full.trim().is_empty() => intro.to_string(),
        _ => format!("{intro}\n{full}"),
    };
    let content = clean_rich_text(&raw_content);

    let excerpt_source = match legacy.excerpt.as_deref() {
        Some(excerpt) if !excerpt.trim().is_empty() => excerpt.to_string(),
        _ if !intro.trim().is_empty() => intro.to_string(),
        _ => raw_content,
    };
    let excerpt = truncate_words(
        &clean_text(&strip_tags(&clean_rich_text(&excerpt_source))),
        EXCERPT_MAX_CHARS,
    );
    (content, excerpt)
}

fn truncate_words(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let cut: String = value.chars().take(max_chars).collect();
    match cut.rfind(' ') {
        Some(space) if space > 0 => cut[..space].to_string(),
        _ => cut,
    }
}

fn clean_date(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() || trimmed.starts_with("0000-00-00") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Undo UTF-8 that was decoded as Latin-1 and re-encoded (`Ã©` for `é`).
fn fix_mojibake(value: &str) -> String {
    if !value.contains(['Ã', 'Â']) || value.chars().any(|ch| u32::from(ch) > 0xFF) {
        return value.to_string();
    }
    let bytes: Vec<u8> = value.chars().map(|ch| u32::from(ch) as u8).collect();
    String::from_utf8(bytes).unwrap_or_else(|_| value.to_string())
}

fn repair_double_encoding(value: &str) -> String {
    let mut current = value.to_string();
    while current.contains("&amp;amp;") || current.contains("&amp;nbsp;") {
        current = current
            .replace("&amp;amp;", "&amp;")
            .replace("&amp;nbsp;", "&nbsp;");
    }
    current
}

fn first_text(candidates: &[&Option<String>]) -> String {
    candidates
        .iter()
        .filter_map(|candidate| candidate.as_deref())
        .map(clean_text)
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

fn require_text(value: String, field: &str) -> Result<String, String> {
    if value.is_empty() {
        Err(format!("missing required field `{field}`"))
    } else {
        Ok(value)
    }
}

fn require_id(id: Option<i64>) -> Result<i64, String> {
    id.filter(|id| *id > 0)
        .ok_or_else(|| "missing legacy id".to_string())
}

fn positive(id: Option<i64>) -> Option<i64> {
    id.filter(|id| *id > 0)
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

fn trashed<T>(entity_type: EntityType, source_id: i64) -> CleanOutcome<T> {
    CleanOutcome::Excluded(format!(
        "{} {source_id} is trashed in the legacy site",
        entity_type.target_type()
    ))
}
