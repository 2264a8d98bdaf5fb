//! The four storage operations the sync pipeline consumes, plus an in-memory store.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use hollow_core::{merge_metadata, AuthorRef, CanonicalPost, NewAuthor, NewPost, PostUpdate};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("slug `{slug}` is already taken")]
    Conflict { slug: String },
    #[error("post {id} not found")]
    NotFound { id: Uuid },
    #[error("write rejected for `{key}`: {reason}")]
    Rejected { key: String, reason: String },
}

/// Storage collaborator injected into the sync pipeline.
///
/// `update` shallow-merges `metadata` into whatever the row currently holds, so
/// implementations never drop a key that the caller did not mention.
#[async_trait]
pub trait PostStore: Send + Sync {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<CanonicalPost>, StorageError>;

    async fn insert(&self, post: NewPost) -> Result<CanonicalPost, StorageError>;

    async fn update(&self, id: Uuid, update: PostUpdate) -> Result<CanonicalPost, StorageError>;

    async fn get_or_create_author(&self, author: NewAuthor) -> Result<AuthorRef, StorageError>;
}

/// Author row as the in-memory store keeps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAuthor {
    pub id: Uuid,
    pub display_name: String,
    pub credential_hash: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    posts: BTreeMap<String, CanonicalPost>,
    authors: BTreeMap<String, StoredAuthor>,
    rejected_slugs: BTreeSet<String>,
    author_failure: Option<String>,
}

/// Process-local store used by dry runs and tests. Writes for selected slugs can be
/// rejected to exercise per-record failure handling.
#[derive(Debug, Default)]
pub struct MemoryPostStore {
    state: Mutex<MemoryState>,
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every insert/update targeting `slug` fails with [`StorageError::Rejected`].
    pub async fn reject_writes_for(&self, slug: impl Into<String>) {
        self.state.lock().await.rejected_slugs.insert(slug.into());
    }

    /// `get_or_create_author` fails with the given reason.
    pub async fn fail_author_provisioning(&self, reason: impl Into<String>) {
        self.state.lock().await.author_failure = Some(reason.into());
    }

    pub async fn posts(&self) -> Vec<CanonicalPost> {
        self.state.lock().await.posts.values().cloned().collect()
    }

    pub async fn post(&self, slug: &str) -> Option<CanonicalPost> {
        self.state.lock().await.posts.get(slug).cloned()
    }

    pub async fn author(&self, email: &str) -> Option<StoredAuthor> {
        self.state.lock().await.authors.get(email).cloned()
    }

    /// Out-of-band edit of a post's metadata, as an admin tool would do between runs.
    pub async fn set_metadata_key(
        &self,
        slug: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        let post = state
            .posts
            .get_mut(slug)
            .ok_or(StorageError::NotFound { id: Uuid::nil() })?;
        post.metadata.insert(key.to_string(), value);
        Ok(())
    }
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<CanonicalPost>, StorageError> {
        Ok(self.state.lock().await.posts.get(slug).cloned())
    }

    async fn insert(&self, post: NewPost) -> Result<CanonicalPost, StorageError> {
        let mut state = self.state.lock().await;
        if state.rejected_slugs.contains(&post.slug) {
            return Err(StorageError::Rejected {
                key: post.slug,
                reason: "insert refused by store".into(),
            });
        }
        if state.posts.contains_key(&post.slug) {
            return Err(StorageError::Conflict { slug: post.slug });
        }

        let now = Utc::now();
        let stored = CanonicalPost {
            id: Uuid::new_v4(),
            slug: post.slug.clone(),
            title: post.title,
            content: post.content,
            excerpt: post.excerpt,
            author_id: post.author_id,
            published_at: post.published_at,
            reading_time_minutes: post.reading_time_minutes,
            theme_category: post.theme_category,
            metadata: post.metadata,
            created_at: now,
            updated_at: now,
        };
        state.posts.insert(post.slug, stored.clone());
        Ok(stored)
    }

    async fn update(&self, id: Uuid, update: PostUpdate) -> Result<CanonicalPost, StorageError> {
        let mut state = self.state.lock().await;
        let slug = state
            .posts
            .values()
            .find(|p| p.id == id)
            .map(|p| p.slug.clone())
            .ok_or(StorageError::NotFound { id })?;
        if state.rejected_slugs.contains(&slug) {
            return Err(StorageError::Rejected {
                key: slug,
                reason: "update refused by store".into(),
            });
        }

        let post = state
            .posts
            .get_mut(&slug)
            .ok_or(StorageError::NotFound { id })?;
        post.title = update.title;
        post.content = update.content;
        post.excerpt = update.excerpt;
        post.reading_time_minutes = update.reading_time_minutes;
        post.theme_category = update.theme_category;
        post.metadata = merge_metadata(&post.metadata, &update.metadata);
        post.updated_at = Utc::now();
        Ok(post.clone())
    }

    async fn get_or_create_author(&self, author: NewAuthor) -> Result<AuthorRef, StorageError> {
        let mut state = self.state.lock().await;
        if let Some(reason) = &state.author_failure {
            return Err(StorageError::Rejected {
                key: author.email,
                reason: reason.clone(),
            });
        }
        if let Some(existing) = state.authors.get(&author.email) {
            return Ok(AuthorRef {
                id: existing.id,
                email: author.email,
                created: false,
            });
        }

        let id = Uuid::new_v4();
        state.authors.insert(
            author.email.clone(),
            StoredAuthor {
                id,
                display_name: author.display_name,
                credential_hash: author.credential_hash,
            },
        );
        Ok(AuthorRef {
            id,
            email: author.email,
            created: true,
        })
    }
}
