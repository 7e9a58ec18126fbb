use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MigrationError;

/// Legacy entity kinds tracked by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Categories,
    Pages,
    News,
    Menus,
    MenuItems,
    Documents,
}

impl EntityType {
    /// Dependency order: referenced entities are migrated before their referrers.
    pub const FORWARD_ORDER: [EntityType; 6] = [
        Self::Categories,
        Self::Pages,
        Self::News,
        Self::Menus,
        Self::MenuItems,
        Self::Documents,
    ];

    pub fn reverse_order() -> impl Iterator<Item = EntityType> {
        Self::FORWARD_ORDER.into_iter().rev()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Categories => "categories",
            Self::Pages => "pages",
            Self::News => "news",
            Self::Menus => "menus",
            Self::MenuItems => "menu_items",
            Self::Documents => "documents",
        }
    }

    /// Target table; identical to the ledger key for every kind.
    pub fn table(self) -> &'static str {
        self.as_str()
    }

    /// Singular name of the target entity, stored as `target_type`.
    pub fn target_type(self) -> &'static str {
        match self {
            Self::Categories => "category",
            Self::Pages => "page",
            Self::News => "news",
            Self::Menus => "menu",
            Self::MenuItems => "menu_item",
            Self::Documents => "document",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = MigrationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "categories" | "category" => Ok(Self::Categories),
            "pages" | "page" | "articles" | "content" => Ok(Self::Pages),
            "news" => Ok(Self::News),
            "menus" | "menu" => Ok(Self::Menus),
            "menu_items" | "menu_item" | "menuitems" => Ok(Self::MenuItems),
            "documents" | "document" => Ok(Self::Documents),
            _ => Err(MigrationError::UnknownEntityType(value.to_string())),
        }
    }
}
