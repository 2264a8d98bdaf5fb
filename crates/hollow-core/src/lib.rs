//! Core domain model and provenance types for the Hollow Pages mirror.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

pub const CRATE_NAME: &str = "hollow-core";

/// Opaque key/value bag persisted alongside each post.
pub type Metadata = Map<String, JsonValue>;

pub const META_EXTERNAL_ID: &str = "external_id";
pub const META_IMPORT_SOURCE: &str = "import_source";
pub const META_IMPORTED_AT: &str = "imported_at";
pub const META_SYNC_RUN_ID: &str = "sync_run_id";
pub const META_ORIGINAL_WORD_COUNT: &str = "original_word_count";
pub const META_SOURCE_CATEGORIES: &str = "source_categories";
pub const META_ORIGINAL_PUBLISHED_AT: &str = "original_published_at";
pub const META_LAST_UPDATED_AT: &str = "last_updated_at";

/// One item of the external feed, as fetched. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRecord {
    pub external_id: u64,
    pub title_markup: String,
    pub body_markup: String,
    pub excerpt_markup: Option<String>,
    /// Publication timestamp exactly as the feed reported it.
    pub published_raw: String,
    pub slug: String,
    pub category_ids: Vec<u64>,
}

/// Feed element that could not be decoded into an [`ExternalRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedItem {
    pub position: usize,
    pub external_id: Option<u64>,
    pub title: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedItem {
    Record(ExternalRecord),
    Rejected(RejectedItem),
}

impl FeedItem {
    pub fn label(&self) -> String {
        match self {
            FeedItem::Record(record) => record.title_markup.clone(),
            FeedItem::Rejected(item) => item
                .title
                .clone()
                .or_else(|| item.external_id.map(|id| format!("#{id}")))
                .unwrap_or_else(|| format!("item {}", item.position)),
        }
    }
}

/// One page of the external listing, in feed order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPage {
    pub page: u32,
    pub items: Vec<FeedItem>,
}

impl FeedPage {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCategory {
    pub id: u64,
    pub name: String,
}

/// Canonical persisted post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPost {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub author_id: Uuid,
    pub published_at: DateTime<Utc>,
    pub reading_time_minutes: u32,
    pub theme_category: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a first-time insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPost {
    pub slug: String,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub author_id: Uuid,
    pub published_at: DateTime<Utc>,
    pub reading_time_minutes: u32,
    pub theme_category: String,
    pub metadata: Metadata,
}

/// Mutable fields written on re-sync. `metadata` is the already merged bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostUpdate {
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub reading_time_minutes: u32,
    pub theme_category: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAuthor {
    pub email: String,
    pub display_name: String,
    pub credential_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRef {
    pub id: Uuid,
    pub email: String,
    /// True when this call created the author.
    pub created: bool,
}

/// Provenance pointer written into a post's metadata bag on every sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportProvenance {
    pub external_id: u64,
    pub import_source: String,
    pub imported_at: DateTime<Utc>,
    pub sync_run_id: Uuid,
    pub original_word_count: usize,
    pub source_categories: Vec<String>,
    pub original_published_at: String,
}

impl ImportProvenance {
    /// Metadata bag for a post seen for the first time.
    pub fn seed_metadata(&self) -> Metadata {
        let mut bag = Metadata::new();
        bag.insert(META_EXTERNAL_ID.into(), JsonValue::from(self.external_id));
        bag.insert(
            META_IMPORT_SOURCE.into(),
            JsonValue::from(self.import_source.clone()),
        );
        bag.insert(
            META_IMPORTED_AT.into(),
            JsonValue::from(self.imported_at.to_rfc3339()),
        );
        bag.insert(
            META_SYNC_RUN_ID.into(),
            JsonValue::from(self.sync_run_id.to_string()),
        );
        bag.insert(
            META_ORIGINAL_WORD_COUNT.into(),
            JsonValue::from(self.original_word_count),
        );
        bag.insert(
            META_SOURCE_CATEGORIES.into(),
            JsonValue::from(self.source_categories.clone()),
        );
        bag.insert(
            META_ORIGINAL_PUBLISHED_AT.into(),
            JsonValue::from(self.original_published_at.clone()),
        );
        bag
    }

    /// Patch applied to an existing post. `imported_at` keeps its first-import value.
    pub fn update_metadata(&self, updated_at: DateTime<Utc>) -> Metadata {
        let mut bag = self.seed_metadata();
        bag.remove(META_IMPORTED_AT);
        bag.insert(
            META_LAST_UPDATED_AT.into(),
            JsonValue::from(updated_at.to_rfc3339()),
        );
        bag
    }
}

/// Shallow merge: keys in `patch` overwrite, every other key in `existing` survives.
pub fn merge_metadata(existing: &Metadata, patch: &Metadata) -> Metadata {
    let mut merged = existing.clone();
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
