//! Legacy (Joomla) export model.
//!
//! The export is one JSON document whose top-level keys each hold an array of
//! loosely typed objects. Every field on the record structs is optional and
//! tolerant of the usual export noise (numbers as strings, `null` for empty);
//! defaulting happens later in [`crate::cleaner`].

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::entity::EntityType;
use crate::error::{MigrationError, MigrationResult};

/// One element of a legacy array, kept verbatim for the ledger's audit copy.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub position: usize,
    pub payload: Value,
}

impl RawRecord {
    pub fn new(position: usize, payload: Value) -> Self {
        Self { position, payload }
    }

    /// Legacy numeric id, accepting `12` and `"12"`.
    pub fn source_id(&self) -> Option<i64> {
        self.payload.get("id").and_then(value_as_i64)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, String> {
        if !self.payload.is_object() {
            return Err(format!(
                "record #{} is not a JSON object",
                self.position + 1
            ));
        }
        serde_json::from_value(self.payload.clone())
            .map_err(|err| format!("record #{} could not be decoded: {err}", self.position + 1))
    }
}

/// Read export text from a file path, or take the argument itself as inline
/// JSON when it starts with `{`. Returns the text and a label for the run
/// metadata.
pub fn read_export(path_or_inline: &str) -> MigrationResult<(String, String)> {
    let trimmed = path_or_inline.trim_start();
    if trimmed.starts_with('{') {
        return Ok((trimmed.to_string(), "inline".to_string()));
    }
    let path = Path::new(path_or_inline);
    let text = fs::read_to_string(path)?;
    Ok((text, path.display().to_string()))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyExport {
    pub categories: Vec<RawRecord>,
    pub articles: Vec<RawRecord>,
    pub news: Vec<RawRecord>,
    pub menus: Vec<RawRecord>,
    pub menu_items: Vec<RawRecord>,
    pub documents: Vec<RawRecord>,
}

impl LegacyExport {
    /// Parse an export document. A non-object top level or a non-array entity
    /// key is structurally unreadable and fails the whole run.
    pub fn parse(text: &str) -> MigrationResult<Self> {
        let root: Value = serde_json::from_str(text)
            .map_err(|err| MigrationError::Malformed(format!("invalid JSON: {err}")))?;
        Self::from_value(root)
    }

    pub fn from_value(root: Value) -> MigrationResult<Self> {
        let Value::Object(mut map) = root else {
            return Err(MigrationError::Malformed(
                "top-level value must be a JSON object".to_string(),
            ));
        };
        let mut take = |key: &str| -> MigrationResult<Vec<RawRecord>> {
            match map.remove(key) {
                None | Some(Value::Null) => Ok(Vec::new()),
                Some(Value::Array(items)) => Ok(items
                    .into_iter()
                    .enumerate()
                    .map(|(position, payload)| RawRecord::new(position, payload))
                    .collect()),
                Some(other) => Err(MigrationError::Malformed(format!(
                    "`{key}` must be an array, found {}",
                    json_kind(&other)
                ))),
            }
        };
        Ok(Self {
            categories: take("categories")?,
            articles: take("articles")?,
            news: take("news")?,
            menus: take("menus")?,
            menu_items: take("menu_items")?,
            documents: take("documents")?,
        })
    }

    pub fn records(&self, entity_type: EntityType) -> &[RawRecord] {
        match entity_type {
            EntityType::Categories => &self.categories,
            EntityType::Pages => &self.articles,
            EntityType::News => &self.news,
            EntityType::Menus => &self.menus,
            EntityType::MenuItems => &self.menu_items,
            EntityType::Documents => &self.documents,
        }
    }

    pub fn total_records(&self) -> usize {
        EntityType::FORWARD_ORDER
            .iter()
            .map(|entity_type| self.records(*entity_type).len())
            .sum()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LegacyCategory {
    #[serde(deserialize_with = "lenient_i64")]
    pub id: Option<i64>,
    #[serde(deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub alias: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    pub parent_id: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub parent: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub published: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub state: Option<i64>,
}

/// Joomla `#__content` row. Used for both `articles` and `news`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LegacyArticle {
    #[serde(deserialize_with = "lenient_i64")]
    pub id: Option<i64>,
    #[serde(deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub alias: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub introtext: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub fulltext: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub content: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub excerpt: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    pub catid: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub category_id: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub state: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub published: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub featured: Option<i64>,
    #[serde(deserialize_with = "lenient_string")]
    pub metadesc: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub metakey: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub template: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub created: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub publish_up: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    pub hits: Option<i64>,
}

/// Joomla `#__menu_types` row.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LegacyMenu {
    #[serde(deserialize_with = "lenient_i64")]
    pub id: Option<i64>,
    #[serde(deserialize_with = "lenient_string")]
    pub menutype: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub location: Option<String>,
}

/// Joomla `#__menu` row.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LegacyMenuItem {
    #[serde(deserialize_with = "lenient_i64")]
    pub id: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub menu_id: Option<i64>,
    #[serde(deserialize_with = "lenient_string")]
    pub menutype: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub link: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub url: Option<String>,
    #[serde(rename = "type", deserialize_with = "lenient_string")]
    pub item_type: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    pub parent_id: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub parent: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub ordering: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub published: Option<i64>,
    #[serde(rename = "browserNav", deserialize_with = "lenient_i64")]
    pub browser_nav_camel: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub browser_nav: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LegacyDocument {
    #[serde(deserialize_with = "lenient_i64")]
    pub id: Option<i64>,
    #[serde(deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub alias: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub description: Option<String>,
    // Exports disagree on key names and some carry several of them, so each
    // spelling is its own field and the cleaner picks the first present.
    #[serde(deserialize_with = "lenient_string")]
    pub url: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub file_path: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub path: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub filename: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub file_name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub mime: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub mime_type: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    pub size: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub filesize: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub file_size: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub catid: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub category_id: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub published: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub state: Option<i64>,
    #[serde(deserialize_with = "lenient_string")]
    pub created: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    pub hits: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub downloads: Option<i64>,
}

pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        Value::Bool(flag) => Some(i64::from(*flag)),
        _ => None,
    }
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_as_i64(&value))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
