//! Postgres-backed [`PostStore`].

use async_trait::async_trait;
use hollow_core::{AuthorRef, CanonicalPost, Metadata, NewAuthor, NewPost, PostUpdate};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::posts::{PostStore, StorageError};

const POST_COLUMNS: &str = "id, slug, title, content, excerpt, author_id, published_at, \
    reading_time_minutes, theme_category, metadata, created_at, updated_at";

/// Store over a pool constructed once by the caller and shared for the whole run.
#[derive(Debug, Clone)]
pub struct PgPostStore {
    pool: PgPool,
}

impl PgPostStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|err| StorageError::Database(err.into()))?;
        info!("schema migrations applied");
        Ok(())
    }
}

fn post_from_row(row: &PgRow) -> Result<CanonicalPost, sqlx::Error> {
    let reading_time: i32 = row.try_get("reading_time_minutes")?;
    let Json(metadata): Json<JsonValue> = row.try_get("metadata")?;
    let metadata = match metadata {
        JsonValue::Object(map) => map,
        _ => Metadata::new(),
    };
    Ok(CanonicalPost {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        excerpt: row.try_get("excerpt")?,
        author_id: row.try_get("author_id")?,
        published_at: row.try_get("published_at")?,
        reading_time_minutes: reading_time.max(0) as u32,
        theme_category: row.try_get("theme_category")?,
        metadata,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl PostStore for PgPostStore {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<CanonicalPost>, StorageError> {
        let row = sqlx::query(&format!("SELECT {POST_COLUMNS} FROM posts WHERE slug = $1"))
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(post_from_row).transpose()?)
    }

    async fn insert(&self, post: NewPost) -> Result<CanonicalPost, StorageError> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO posts (
                id, slug, title, content, excerpt, author_id, published_at,
                reading_time_minutes, theme_category, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&post.slug)
        .bind(&post.title)
        .bind(&post.content)
        .bind(&post.excerpt)
        .bind(post.author_id)
        .bind(post.published_at)
        .bind(post.reading_time_minutes as i32)
        .bind(&post.theme_category)
        .bind(Json(JsonValue::Object(post.metadata.clone())))
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(post_from_row(&row)?),
            Err(err) if is_unique_violation(&err) => Err(StorageError::Conflict { slug: post.slug }),
            Err(err) => Err(err.into()),
        }
    }

    async fn update(&self, id: Uuid, update: PostUpdate) -> Result<CanonicalPost, StorageError> {
        // `||` on jsonb is a shallow merge, so keys written by other processes survive.
        let row = sqlx::query(&format!(
            r#"
            UPDATE posts
               SET title = $2,
                   content = $3,
                   excerpt = $4,
                   reading_time_minutes = $5,
                   theme_category = $6,
                   metadata = metadata || $7,
                   updated_at = now()
             WHERE id = $1
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&update.title)
        .bind(&update.content)
        .bind(&update.excerpt)
        .bind(update.reading_time_minutes as i32)
        .bind(&update.theme_category)
        .bind(Json(JsonValue::Object(update.metadata)))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(post_from_row(&row)?),
            None => Err(StorageError::NotFound { id }),
        }
    }

    async fn get_or_create_author(&self, author: NewAuthor) -> Result<AuthorRef, StorageError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO authors (id, email, display_name, credential_hash, role)
            VALUES ($1, $2, $3, $4, 'system')
            ON CONFLICT (email) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&author.email)
        .bind(&author.display_name)
        .bind(&author.credential_hash)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(AuthorRef {
                id: row.try_get("id")?,
                email: author.email,
                created: true,
            });
        }

        let row = sqlx::query("SELECT id FROM authors WHERE email = $1")
            .bind(&author.email)
            .fetch_one(&self.pool)
            .await?;
        Ok(AuthorRef {
            id: row.try_get("id")?,
            email: author.email,
            created: false,
        })
    }
}
