//! Markup → canonical text rule chain, plus the per-record preparation built on it.
//!
//! Stage order is load-bearing: emphasis, list and quote markers must be written
//! before [`strip_tags`] removes every remaining tag, and entities are decoded only
//! after tags are gone so that `&lt;b&gt;` survives as literal text.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use hollow_core::ExternalRecord;
use regex::{Captures, Regex};
use thiserror::Error;

pub const EXCERPT_MARKER: &str = "...";
pub const DEFAULT_EXCERPT_CHARS: usize = 200;
pub const DEFAULT_WORDS_PER_MINUTE: usize = 200;

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern compiles")
}

static WP_BLOCK_COMMENT: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)<!--\s*/?wp:.*?-->"));
static PAIRED_SHORTCODE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?is)\[(?:caption|embed|audio|video)\b[^\]]*\].*?\[/(?:caption|embed|audio|video)\]")
});
static LONE_SHORTCODE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\[/?(?:caption|gallery|embed|audio|video|playlist)\b[^\]]*\]"));
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?is)<h([1-6])(?:\s[^>]*)?>(.*?)</h[1-6]\s*>"));
static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?is)<(?:em|i)(?:\s[^>]*)?>(.*?)</(?:em|i)\s*>"));
static STRONG: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?is)<(?:strong|b)(?:\s[^>]*)?>(.*?)</(?:strong|b)\s*>"));
static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| re(r"(?is)\s*<li(?:\s[^>]*)?>(.*?)</li\s*>"));
static LIST_CONTAINER: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)</?(?:ul|ol)(?:\s[^>]*)?>"));
static BLOCKQUOTE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?is)<blockquote(?:\s[^>]*)?>(.*?)</blockquote\s*>"));
static INNER_BREAK: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)<br\s*/?>|</?p(?:\s[^>]*)?>"));
static HTML_COMMENT: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)<!--.*?-->"));
static TAG: LazyLock<Regex> = LazyLock::new(|| re(r"</?[A-Za-z!][^>]*>"));
static DANGLING_TAG: LazyLock<Regex> = LazyLock::new(|| re(r"</?[A-Za-z][^<>]*$"));
static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    re(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z][A-Za-z0-9]{1,31});")
});
static HORIZONTAL_SPACE: LazyLock<Regex> = LazyLock::new(|| re(r"[ \t\f\x{A0}]+"));
static EXTRA_NEWLINES: LazyLock<Regex> = LazyLock::new(|| re(r"\n{3,}"));

/// Numeric references the feed emits for typographic punctuation.
const COMMON_NUMERIC_ENTITIES: &[(u32, char)] = &[
    (8211, '\u{2013}'),
    (8212, '\u{2014}'),
    (8216, '\u{2018}'),
    (8217, '\u{2019}'),
    (8220, '\u{201C}'),
    (8221, '\u{201D}'),
    (8230, '\u{2026}'),
];

/// One named, pure rewrite rule.
#[derive(Clone, Copy)]
pub struct Stage {
    pub name: &'static str,
    pub apply: fn(&str) -> String,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Stage").field(&self.name).finish()
    }
}

pub const TRANSFORM_STAGES: &[Stage] = &[
    Stage {
        name: "strip_platform_blocks",
        apply: strip_platform_blocks,
    },
    Stage {
        name: "headings",
        apply: headings,
    },
    Stage {
        name: "emphasis",
        apply: emphasis,
    },
    Stage {
        name: "list_items",
        apply: list_items,
    },
    Stage {
        name: "blockquotes",
        apply: blockquotes,
    },
    Stage {
        name: "paragraph_breaks",
        apply: paragraph_breaks,
    },
    Stage {
        name: "strip_tags",
        apply: strip_tags,
    },
    Stage {
        name: "decode_entities",
        apply: decode_entities,
    },
    Stage {
        name: "normalize_whitespace",
        apply: normalize_whitespace,
    },
];

/// Run markup through every stage in order.
pub fn transform(markup: &str) -> String {
    TRANSFORM_STAGES
        .iter()
        .fold(markup.to_string(), |text, stage| (stage.apply)(&text))
}

pub fn strip_platform_blocks(text: &str) -> String {
    let text = WP_BLOCK_COMMENT.replace_all(text, "");
    let text = PAIRED_SHORTCODE.replace_all(&text, "");
    LONE_SHORTCODE.replace_all(&text, "").into_owned()
}

pub fn headings(text: &str) -> String {
    HEADING
        .replace_all(text, |caps: &Captures| {
            let level = caps[1].parse::<usize>().unwrap_or(1);
            let inner = caps[2].trim();
            if inner.is_empty() {
                "\n\n".to_string()
            } else {
                format!("\n\n{} {}\n\n", "#".repeat(level), inner)
            }
        })
        .into_owned()
}

fn wrap_nonempty(caps: &Captures, delimiter: &str) -> String {
    let inner = &caps[1];
    if inner.trim().is_empty() {
        inner.to_string()
    } else {
        format!("{delimiter}{inner}{delimiter}")
    }
}

pub fn emphasis(text: &str) -> String {
    let text = EMPHASIS.replace_all(text, |caps: &Captures| wrap_nonempty(caps, "_"));
    STRONG
        .replace_all(&text, |caps: &Captures| wrap_nonempty(caps, "**"))
        .into_owned()
}

pub fn list_items(text: &str) -> String {
    let text = LIST_ITEM.replace_all(text, |caps: &Captures| {
        let inner = INNER_BREAK.replace_all(&caps[1], " ");
        format!("\n- {}", inner.trim())
    });
    LIST_CONTAINER.replace_all(&text, "\n\n").into_owned()
}

pub fn blockquotes(text: &str) -> String {
    BLOCKQUOTE
        .replace_all(text, |caps: &Captures| {
            let inner = INNER_BREAK.replace_all(&caps[1], "\n");
            let quoted = inner
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| format!("> {line}"))
                .collect::<Vec<_>>();
            if quoted.is_empty() {
                "\n\n".to_string()
            } else {
                format!("\n\n{}\n\n", quoted.join("\n"))
            }
        })
        .into_owned()
}

pub fn paragraph_breaks(text: &str) -> String {
    INNER_BREAK.replace_all(text, "\n\n").into_owned()
}

/// Remove comments, every remaining tag, and a trailing tag that never closed.
pub fn strip_tags(text: &str) -> String {
    let text = HTML_COMMENT.replace_all(text, "");
    let text = TAG.replace_all(&text, "");
    DANGLING_TAG.replace_all(&text, "").into_owned()
}

fn decode_entity(body: &str) -> Option<String> {
    let named = match body {
        "nbsp" => Some(' '),
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => None,
    };
    if let Some(ch) = named {
        return Some(ch.to_string());
    }

    let digits = body.strip_prefix('#')?;
    let code = match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<u32>().ok()?,
    };
    if let Some((_, ch)) = COMMON_NUMERIC_ENTITIES.iter().find(|(n, _)| *n == code) {
        return Some(ch.to_string());
    }
    char::from_u32(code)
        .filter(|ch| *ch != '\0')
        .map(|ch| ch.to_string())
}

/// Single pass, so `&amp;lt;` becomes `&lt;` rather than `<`. Unknown entities stay verbatim.
pub fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &Captures| {
            decode_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

pub fn normalize_whitespace(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = HORIZONTAL_SPACE.replace_all(&text, " ");
    let lines = text.lines().map(str::trim).collect::<Vec<_>>().join("\n");
    EXTRA_NEWLINES
        .replace_all(&lines, "\n\n")
        .trim()
        .to_string()
}

pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Minutes to read, rounded up and never below one.
pub fn reading_time_minutes(word_count: usize, words_per_minute: usize) -> u32 {
    let minutes = word_count.div_ceil(words_per_minute.max(1));
    minutes.max(1).min(u32::MAX as usize) as u32
}

/// Cut at a fixed character offset and append [`EXCERPT_MARKER`] when anything was dropped.
pub fn truncate_excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => format!("{}{EXCERPT_MARKER}", text[..cut].trim_end()),
    }
}

/// Excerpt from the source excerpt when it has text, otherwise from the canonical body.
pub fn derive_excerpt(excerpt_markup: Option<&str>, canonical_body: &str, max_chars: usize) -> String {
    let from_source = excerpt_markup
        .map(transform)
        .filter(|text| !text.is_empty());
    match from_source {
        Some(text) => truncate_excerpt(&text, max_chars),
        None => truncate_excerpt(canonical_body, max_chars),
    }
}

/// Stable URL key for a record; falls back to the external id when the feed slug is unusable.
pub fn canonical_slug(feed_slug: &str, external_id: u64) -> String {
    let mapped = feed_slug
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>();
    let slug = mapped
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        format!("story-{external_id}")
    } else {
        slug
    }
}

/// Accepts RFC 3339 as well as the zone-less `YYYY-MM-DDTHH:MM:SS` the feed emits (read as UTC).
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSettings {
    pub excerpt_chars: usize,
    pub words_per_minute: usize,
}

impl Default for TextSettings {
    fn default() -> Self {
        Self {
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
            words_per_minute: DEFAULT_WORDS_PER_MINUTE,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("record {external_id} has no title once markup is removed")]
    EmptyTitle { external_id: u64 },
    #[error("record {external_id} has an unreadable publication timestamp `{value}`")]
    InvalidTimestamp { external_id: u64, value: String },
}

/// Everything the reconciler needs from one external record.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRecord {
    pub external_id: u64,
    pub slug: String,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub word_count: usize,
    pub reading_time_minutes: u32,
    pub published_at: DateTime<Utc>,
    pub published_raw: String,
    pub category_ids: Vec<u64>,
}

pub fn prepare_record(
    record: &ExternalRecord,
    settings: &TextSettings,
) -> Result<PreparedRecord, TransformError> {
    let title = transform(&record.title_markup);
    if title.is_empty() {
        return Err(TransformError::EmptyTitle {
            external_id: record.external_id,
        });
    }
    let published_at =
        parse_published(&record.published_raw).ok_or_else(|| TransformError::InvalidTimestamp {
            external_id: record.external_id,
            value: record.published_raw.clone(),
        })?;

    let content = transform(&record.body_markup);
    let excerpt = derive_excerpt(
        record.excerpt_markup.as_deref(),
        &content,
        settings.excerpt_chars,
    );
    let word_count = count_words(&content);

    Ok(PreparedRecord {
        external_id: record.external_id,
        slug: canonical_slug(&record.slug, record.external_id),
        title,
        content,
        excerpt,
        word_count,
        reading_time_minutes: reading_time_minutes(word_count, settings.words_per_minute),
        published_at,
        published_raw: record.published_raw.clone(),
        category_ids: record.category_ids.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, body: &str, date: &str) -> ExternalRecord {
        ExternalRecord {
            external_id: 77,
            title_markup: title.into(),
            body_markup: body.into(),
            excerpt_markup: None,
            published_raw: date.into(),
            slug: "the-well".into(),
            category_ids: vec![3],
        }
    }

    #[test]
    fn stages_run_in_documented_order() {
        let names = TRANSFORM_STAGES.iter().map(|s| s.name).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "strip_platform_blocks",
                "headings",
                "emphasis",
                "list_items",
                "blockquotes",
                "paragraph_breaks",
                "strip_tags",
                "decode_entities",
                "normalize_whitespace",
            ]
        );
    }

    #[test]
    fn platform_blocks_and_shortcodes_are_removed() {
        let input = "<!-- wp:paragraph -->A[caption id=\"1\"]<img/> cap[/caption]B[gallery ids=\"1,2\"]C<!-- /wp:paragraph -->";
        assert_eq!(strip_platform_blocks(input), "ABC");
    }

    #[test]
    fn headings_become_hash_runs() {
        assert_eq!(headings("<h3 class=\"x\">Dread</h3>"), "\n\n### Dread\n\n");
        assert_eq!(transform("<h1>One</h1>text"), "# One\n\ntext");
    }

    #[test]
    fn emphasis_and_strong_use_markdown_delimiters() {
        assert_eq!(emphasis("<em>quiet</em> <b>loud</b>"), "_quiet_ **loud**");
        assert_eq!(emphasis("<i>a</i><strong>b</strong>"), "_a_**b**");
    }

    #[test]
    fn emphasis_ignores_lookalike_tags() {
        let input = "<img src=\"x\"><br><blockquote>q</blockquote>";
        assert_eq!(emphasis(input), input);
    }

    #[test]
    fn list_items_become_bullets() {
        let out = transform("<ul>\n<li>apples</li>\n<li><p>names</p></li>\n</ul>");
        assert_eq!(out, "- apples\n- names");
    }

    #[test]
    fn blockquotes_prefix_each_line() {
        let out = transform("<blockquote><p>Do not dig.</p><p>Not after frost.</p></blockquote>");
        assert_eq!(out, "> Do not dig.\n> Not after frost.");
    }

    #[test]
    fn paragraphs_and_breaks_become_blank_lines() {
        assert_eq!(transform("<p>one</p><p>two<br/>three</p>"), "one\n\ntwo\n\nthree");
    }

    #[test]
    fn remaining_tags_are_stripped() {
        assert_eq!(strip_tags("<div><span>x</span></div><!-- note -->"), "x");
    }

    #[test]
    fn malformed_markup_degrades_instead_of_failing() {
        assert_eq!(transform("<p>open <em>never closed"), "open never closed");
        assert_eq!(transform("tail <img src=\"x\""), "tail");
        assert_eq!(transform("</p></em>orphans</li>"), "orphans");
    }

    #[test]
    fn entities_decode_in_one_pass() {
        assert_eq!(
            decode_entities("&lt;b&gt; &amp;lt; &quot;q&quot; &#39;a&apos;"),
            "<b> &lt; \"q\" 'a'"
        );
        assert_eq!(
            decode_entities("&#8211;&#8212;&#8216;&#8217;&#8220;&#8221;&#8230;"),
            "\u{2013}\u{2014}\u{2018}\u{2019}\u{201C}\u{201D}\u{2026}"
        );
        assert_eq!(decode_entities("&#169; &#x41; &bogus;"), "\u{A9} A &bogus;");
    }

    #[test]
    fn encoded_tags_survive_as_text() {
        assert_eq!(transform("&lt;em&gt;literal&lt;/em&gt;"), "<em>literal</em>");
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(
            normalize_whitespace("  a \t  b \r\n\n\n\n  c  \n"),
            "a b\n\nc"
        );
        assert_eq!(transform("plain&nbsp;&nbsp;text"), "plain text");
    }

    #[test]
    fn excerpt_is_bounded() {
        let long = "word ".repeat(100);
        let excerpt = truncate_excerpt(long.trim(), 20);
        assert!(excerpt.ends_with(EXCERPT_MARKER));
        assert!(excerpt.chars().count() <= 20 + EXCERPT_MARKER.len());
        assert_eq!(truncate_excerpt("short", 20), "short");
    }

    #[test]
    fn excerpt_truncation_respects_char_boundaries() {
        let text = "\u{2014}".repeat(30);
        let excerpt = truncate_excerpt(&text, 10);
        assert_eq!(excerpt.chars().count(), 10 + EXCERPT_MARKER.len());
    }

    #[test]
    fn excerpt_prefers_source_excerpt_and_falls_back_to_body() {
        assert_eq!(derive_excerpt(Some("<p>Hook.</p>"), "Body text", 50), "Hook.");
        assert_eq!(derive_excerpt(Some("<p> </p>"), "Body text", 50), "Body text");
        assert_eq!(derive_excerpt(None, "Body text", 4), "Body...");
    }

    #[test]
    fn reading_time_rounds_up_with_floor() {
        assert_eq!(reading_time_minutes(0, 200), 1);
        assert_eq!(reading_time_minutes(1, 200), 1);
        assert_eq!(reading_time_minutes(200, 200), 1);
        assert_eq!(reading_time_minutes(201, 200), 2);
        assert_eq!(reading_time_minutes(50, 0), 50);
    }

    #[test]
    fn slugs_are_normalized_and_stable() {
        assert_eq!(canonical_slug("The-Well--Below ", 1), "the-well-below");
        assert_eq!(canonical_slug("the-well", 1), canonical_slug("the-well", 1));
        assert_eq!(canonical_slug("  ", 9), "story-9");
    }

    #[test]
    fn published_timestamps_accept_feed_formats() {
        let naive = parse_published("2019-10-31T23:59:00").expect("naive");
        assert_eq!(naive.to_rfc3339(), "2019-10-31T23:59:00+00:00");
        let offset = parse_published("2019-10-31T23:59:00+02:00").expect("offset");
        assert_eq!(offset.to_rfc3339(), "2019-10-31T21:59:00+00:00");
        assert!(parse_published("last tuesday").is_none());
        assert!(parse_published("").is_none());
    }

    #[test]
    fn prepare_record_builds_all_fields() {
        let prepared = prepare_record(
            &record(
                "The Well&#8217;s Voice",
                "<p>It <em>called</em> up.</p>",
                "2020-01-01T00:00:00",
            ),
            &TextSettings::default(),
        )
        .expect("prepared");
        assert_eq!(prepared.title, "The Well\u{2019}s Voice");
        assert_eq!(prepared.content, "It _called_ up.");
        assert_eq!(prepared.excerpt, "It _called_ up.");
        assert_eq!(prepared.word_count, 3);
        assert_eq!(prepared.reading_time_minutes, 1);
        assert_eq!(prepared.slug, "the-well");
    }

    #[test]
    fn prepare_record_rejects_bad_timestamps_and_empty_titles() {
        let settings = TextSettings::default();
        assert_eq!(
            prepare_record(&record("T", "b", "soon"), &settings).unwrap_err(),
            TransformError::InvalidTimestamp {
                external_id: 77,
                value: "soon".into()
            }
        );
        assert_eq!(
            prepare_record(&record("<p></p>", "b", "2020-01-01T00:00:00"), &settings).unwrap_err(),
            TransformError::EmptyTitle { external_id: 77 }
        );
    }
}
