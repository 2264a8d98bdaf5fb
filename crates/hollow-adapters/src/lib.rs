//! External feed contracts + the WordPress REST and fixture-backed sources.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hollow_core::{ExternalCategory, ExternalRecord, FeedItem, FeedPage, RejectedItem};
use hollow_storage::{FetchError, HttpFetcher, PageArchive, PageCapture};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "hollow-adapters";

/// Fields requested from the posts listing; nothing else is needed downstream.
pub const POST_FIELDS: &str = "id,date,title,content,excerpt,slug,categories";

/// WordPress answers a page past the end with this error code instead of an empty list.
const INVALID_PAGE_CODE: &str = "rest_post_invalid_page_number";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl FetchContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
        }
    }
}

/// Read-only view of the external content source: "fetch page N" and "fetch category list".
#[async_trait]
pub trait ContentSource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch_page(
        &self,
        ctx: &FetchContext,
        page: u32,
        per_page: u32,
    ) -> Result<FeedPage, FetchError>;

    async fn fetch_categories(
        &self,
        ctx: &FetchContext,
        per_page: u32,
    ) -> Result<Vec<ExternalCategory>, FetchError>;
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WpRendered {
    #[serde(default)]
    rendered: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WpPost {
    id: u64,
    #[serde(default)]
    date: String,
    title: WpRendered,
    content: WpRendered,
    #[serde(default)]
    excerpt: Option<WpRendered>,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    categories: Vec<u64>,
}

impl From<WpPost> for ExternalRecord {
    fn from(post: WpPost) -> Self {
        let excerpt_markup = post
            .excerpt
            .map(|e| e.rendered)
            .filter(|e| !e.trim().is_empty());
        ExternalRecord {
            external_id: post.id,
            title_markup: post.title.rendered,
            body_markup: post.content.rendered,
            excerpt_markup,
            published_raw: post.date,
            slug: post.slug,
            category_ids: post.categories,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct WpCategory {
    id: u64,
    #[serde(default)]
    name: String,
}

fn salvage_rejected(position: usize, value: &JsonValue, reason: String) -> RejectedItem {
    let external_id = value.get("id").and_then(JsonValue::as_u64);
    let title = value
        .get("title")
        .and_then(|t| t.get("rendered").or(Some(t)))
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .filter(|t| !t.trim().is_empty());
    RejectedItem {
        position,
        external_id,
        title,
        reason,
    }
}

/// Decode listing elements one by one; an undecodable element becomes a [`RejectedItem`]
/// instead of failing its neighbours.
pub fn decode_items(values: Vec<JsonValue>) -> Vec<FeedItem> {
    values
        .into_iter()
        .enumerate()
        .map(
            |(position, value)| match serde_json::from_value::<WpPost>(value.clone()) {
                Ok(post) => FeedItem::Record(post.into()),
                Err(err) => FeedItem::Rejected(salvage_rejected(position, &value, err.to_string())),
            },
        )
        .collect()
}

pub fn decode_feed_page(page: u32, url: &str, body: &[u8]) -> Result<FeedPage, FetchError> {
    let values: Vec<JsonValue> = serde_json::from_slice(body).map_err(|e| FetchError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    Ok(FeedPage {
        page,
        items: decode_items(values),
    })
}

pub fn decode_categories(url: &str, body: &[u8]) -> Result<Vec<ExternalCategory>, FetchError> {
    let rows: Vec<WpCategory> = serde_json::from_slice(body).map_err(|e| FetchError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    Ok(rows
        .into_iter()
        .map(|c| ExternalCategory {
            id: c.id,
            name: c.name,
        })
        .collect())
}

fn is_past_last_page(err: &FetchError) -> bool {
    matches!(err, FetchError::HttpStatus { status: 400, body, .. } if body.contains(INVALID_PAGE_CODE))
}

/// Source over a WordPress REST API root such as `https://site.example/wp-json/wp/v2`.
#[derive(Debug)]
pub struct WordPressSource {
    http: HttpFetcher,
    base_url: String,
    archive: Option<PageArchive>,
}

impl WordPressSource {
    pub fn new(http: HttpFetcher, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            archive: None,
        }
    }

    pub fn with_archive(mut self, archive: PageArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn posts_url(&self, page: u32, per_page: u32) -> String {
        format!(
            "{}/posts?page={page}&per_page={per_page}&_fields={POST_FIELDS}",
            self.base_url
        )
    }

    pub fn categories_url(&self, per_page: u32) -> String {
        format!("{}/categories?per_page={per_page}&_fields=id,name", self.base_url)
    }

    async fn archive_body(&self, ctx: &FetchContext, page: Option<u32>, url: &str, body: &[u8]) {
        let Some(archive) = &self.archive else {
            return;
        };
        let capture = PageCapture {
            run_id: ctx.run_id,
            source_id: self.source_id(),
            page,
            url,
            body,
        };
        if let Err(err) = archive.store_page(capture).await {
            warn!(error = %err, ?page, url, "failed to archive raw feed page");
        }
    }
}

#[async_trait]
impl ContentSource for WordPressSource {
    fn source_id(&self) -> &str {
        "wordpress"
    }

    async fn fetch_page(
        &self,
        ctx: &FetchContext,
        page: u32,
        per_page: u32,
    ) -> Result<FeedPage, FetchError> {
        let url = self.posts_url(page, per_page);
        let response = match self.http.fetch_bytes(ctx.run_id, self.source_id(), &url).await {
            Ok(response) => response,
            Err(err) if page > 1 && is_past_last_page(&err) => {
                debug!(page, "feed reports page past the end");
                return Ok(FeedPage {
                    page,
                    items: Vec::new(),
                });
            }
            Err(err) => return Err(err),
        };
        self.archive_body(ctx, Some(page), &response.final_url, &response.body)
            .await;
        decode_feed_page(page, &response.final_url, &response.body)
    }

    async fn fetch_categories(
        &self,
        ctx: &FetchContext,
        per_page: u32,
    ) -> Result<Vec<ExternalCategory>, FetchError> {
        let url = self.categories_url(per_page);
        let response = self
            .http
            .fetch_bytes(ctx.run_id, self.source_id(), &url)
            .await?;
        self.archive_body(ctx, None, &response.final_url, &response.body)
            .await;
        decode_categories(&response.final_url, &response.body)
    }
}

/// Captured feed snapshot: raw listing elements plus the category taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedFixture {
    pub fixture_id: String,
    pub source_id: String,
    pub captured_from_url: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub categories: Vec<ExternalCategory>,
    #[serde(default)]
    pub posts: Vec<JsonValue>,
    #[serde(default)]
    pub notes: Option<String>,
}

pub fn load_feed_fixture(path: impl AsRef<Path>) -> Result<FeedFixture> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Offline source replaying a [`FeedFixture`] with the same pagination rules as the live feed.
#[derive(Debug)]
pub struct FixtureSource {
    fixture: FeedFixture,
    category_failure: Option<String>,
    page_failure: Option<u32>,
    page_fetches: AtomicUsize,
    category_fetches: AtomicUsize,
}

impl FixtureSource {
    pub fn new(fixture: FeedFixture) -> Self {
        Self {
            fixture,
            category_failure: None,
            page_failure: None,
            page_fetches: AtomicUsize::new(0),
            category_fetches: AtomicUsize::new(0),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load_feed_fixture(path)?))
    }

    /// Minimal in-memory fixture, mostly for tests.
    pub fn from_posts(posts: Vec<JsonValue>, categories: Vec<ExternalCategory>) -> Self {
        Self::new(FeedFixture {
            fixture_id: "inline".into(),
            source_id: "fixture".into(),
            captured_from_url: "memory://fixture".into(),
            fetched_at: Utc::now(),
            categories,
            posts,
            notes: None,
        })
    }

    /// The category listing fails with the given reason.
    pub fn with_category_failure(mut self, reason: impl Into<String>) -> Self {
        self.category_failure = Some(reason.into());
        self
    }

    /// Fetching `page` fails as a transport error would.
    pub fn with_page_failure(mut self, page: u32) -> Self {
        self.page_failure = Some(page);
        self
    }

    pub fn fixture(&self) -> &FeedFixture {
        &self.fixture
    }

    pub fn page_fetches(&self) -> usize {
        self.page_fetches.load(Ordering::SeqCst)
    }

    pub fn category_fetches(&self) -> usize {
        self.category_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentSource for FixtureSource {
    fn source_id(&self) -> &str {
        &self.fixture.source_id
    }

    async fn fetch_page(
        &self,
        _ctx: &FetchContext,
        page: u32,
        per_page: u32,
    ) -> Result<FeedPage, FetchError> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        if self.page_failure == Some(page) {
            return Err(FetchError::Unavailable(format!(
                "fixture page {page} unavailable"
            )));
        }

        let per_page = per_page.max(1) as usize;
        let start = (page.max(1) as usize - 1) * per_page;
        let values = self
            .fixture
            .posts
            .iter()
            .skip(start)
            .take(per_page)
            .cloned()
            .collect::<Vec<_>>();
        Ok(FeedPage {
            page,
            items: decode_items(values),
        })
    }

    async fn fetch_categories(
        &self,
        _ctx: &FetchContext,
        per_page: u32,
    ) -> Result<Vec<ExternalCategory>, FetchError> {
        self.category_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.category_failure {
            return Err(FetchError::Unavailable(reason.clone()));
        }
        Ok(self
            .fixture
            .categories
            .iter()
            .take(per_page.max(1) as usize)
            .cloned()
            .collect())
    }
}
