//! Insert-or-update of a prepared record against the local post store, keyed by slug.

use chrono::{DateTime, Utc};
use hollow_core::{ImportProvenance, NewPost, PostUpdate, META_EXTERNAL_ID};
use hollow_storage::{PostStore, StorageError};
use thiserror::Error;
use uuid::Uuid;

use crate::categories::ResolvedCategories;
use crate::transform::PreparedRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created,
    Updated,
}

#[derive(Debug, Error)]
#[error("persisting `{slug}` failed: {source}")]
pub struct PersistenceError {
    pub slug: String,
    #[source]
    pub source: StorageError,
}

/// Per-run values every reconciled record is stamped with.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub import_source: String,
    pub author_id: Uuid,
}

pub async fn reconcile(
    store: &dyn PostStore,
    record: &PreparedRecord,
    categories: &ResolvedCategories,
    run: &RunContext,
) -> Result<ReconcileOutcome, PersistenceError> {
    let fail = |source: StorageError| PersistenceError {
        slug: record.slug.clone(),
        source,
    };

    let provenance = ImportProvenance {
        external_id: record.external_id,
        import_source: run.import_source.clone(),
        imported_at: run.started_at,
        sync_run_id: run.run_id,
        original_word_count: record.word_count,
        source_categories: categories.names.clone(),
        original_published_at: record.published_raw.clone(),
    };

    match store.find_by_slug(&record.slug).await.map_err(fail)? {
        None => {
            store
                .insert(NewPost {
                    slug: record.slug.clone(),
                    title: record.title.clone(),
                    content: record.content.clone(),
                    excerpt: record.excerpt.clone(),
                    author_id: run.author_id,
                    published_at: record.published_at,
                    reading_time_minutes: record.reading_time_minutes,
                    theme_category: categories.theme.clone(),
                    metadata: provenance.seed_metadata(),
                })
                .await
                .map_err(fail)?;
            Ok(ReconcileOutcome::Created)
        }
        Some(existing) => {
            // Two feed slugs can normalize to the same key; never let one story replace another.
            let owner = existing
                .metadata
                .get(META_EXTERNAL_ID)
                .and_then(|v| v.as_u64());
            if owner.is_some_and(|id| id != record.external_id) {
                return Err(fail(StorageError::Conflict {
                    slug: record.slug.clone(),
                }));
            }

            // Only the patch goes to the store, which merges it into the current row.
            let patch = provenance.update_metadata(Utc::now());
            store
                .update(
                    existing.id,
                    PostUpdate {
                        title: record.title.clone(),
                        content: record.content.clone(),
                        excerpt: record.excerpt.clone(),
                        reading_time_minutes: record.reading_time_minutes,
                        theme_category: categories.theme.clone(),
                        metadata: patch,
                    },
                )
                .await
                .map_err(fail)?;
            Ok(ReconcileOutcome::Updated)
        }
    }
}
