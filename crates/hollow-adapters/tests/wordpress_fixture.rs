use std::path::{Path, PathBuf};

use hollow_adapters::{load_feed_fixture, ContentSource, FetchContext, FixtureSource};
use hollow_core::FeedItem;
use uuid::Uuid;

fn sample_bundle() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/wordpress/sample/bundle.json")
}

#[test]
fn sample_bundle_parses() {
    let fixture = load_feed_fixture(sample_bundle()).expect("fixture");
    assert_eq!(fixture.source_id, "wordpress");
    assert_eq!(fixture.posts.len(), 3);
    assert_eq!(fixture.categories.len(), 3);
}

#[tokio::test]
async fn sample_bundle_replays_as_records() {
    let source = FixtureSource::from_path(sample_bundle()).expect("fixture");
    let ctx = FetchContext::new(Uuid::new_v4());

    let page = source.fetch_page(&ctx, 1, 10).await.expect("page");
    let slugs = page
        .items
        .iter()
        .map(|item| match item {
            FeedItem::Record(record) => record.slug.clone(),
            FeedItem::Rejected(item) => panic!("unexpected rejection: {}", item.reason),
        })
        .collect::<Vec<_>>();
    assert_eq!(
        slugs,
        vec!["the-lanterns-keeper", "below-the-orchard", "signal-and-noise"]
    );

    let categories = source.fetch_categories(&ctx, 100).await.expect("categories");
    assert!(categories.iter().any(|c| c.name == "Cosmic Horror"));
}
