// Weekly report digest and rendering

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use minijinja::{context, Environment};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::feed::{Category, DateRange, Enrichment, FeedRecord};

/// Reports kept per user; older ones are deleted on save
pub const REPORTS_KEPT_PER_USER: usize = 10;

const MAX_HIGHLIGHTS: usize = 5;
const MAX_TAGS: usize = 10;

// ============================================================================
// Week window
// ============================================================================

/// Seven days starting at `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekWindow {
    pub start: DateTime<Utc>,
}

impl WeekWindow {
    pub fn starting(start: DateTime<Utc>) -> Self {
        Self { start }
    }

    /// The last complete ISO week before `now`: Monday 00:00 UTC to the next Monday
    pub fn previous_iso_week(now: DateTime<Utc>) -> Self {
        let days_into_week = i64::from(now.weekday().num_days_from_monday());
        let this_monday = (now.date_naive() - Duration::days(days_into_week))
            .and_time(NaiveTime::MIN)
            .and_utc();
        Self {
            start: this_monday - Duration::weeks(1),
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::weeks(1)
    }

    pub fn range(&self) -> DateRange {
        DateRange::new(self.start, self.end())
    }

    /// Label used in dedupe keys: the start date for midnight-aligned
    /// windows, the full timestamp otherwise
    pub fn label(&self) -> String {
        if self.start.time() == NaiveTime::MIN {
            self.start.date_naive().to_string()
        } else {
            self.start.to_rfc3339()
        }
    }
}

// ============================================================================
// Digest
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct CategoryCount {
    pub category: Category,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Highlight {
    pub feed_id: Uuid,
    pub title: String,
    pub url: Option<String>,
    pub summary: String,
    pub category: Category,
}

/// Structured summary of one user's week
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Digest {
    pub week_start: DateTime<Utc>,
    pub week_end: DateTime<Utc>,
    pub total_items: usize,
    pub by_category: Vec<CategoryCount>,
    pub highlights: Vec<Highlight>,
    pub top_tags: Vec<TagCount>,
    /// Every feed id included, for linking the report to its items
    pub feed_ids: Vec<Uuid>,
}

impl Digest {
    /// Aggregate the records inside `window`; records outside it are ignored
    pub fn build(window: WeekWindow, records: &[FeedRecord]) -> Self {
        let range = window.range();
        let mut items: Vec<&FeedRecord> = records
            .iter()
            .filter(|r| range.contains(r.created_at))
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let by_category = Category::ALL
            .iter()
            .map(|&category| CategoryCount {
                category,
                count: items.iter().filter(|r| r.category == category).count(),
            })
            .filter(|c| c.count > 0)
            .collect();

        let mut highlights: Vec<&&FeedRecord> = items
            .iter()
            .filter(|r| r.enrichment == Enrichment::Enriched)
            .collect();
        highlights.truncate(MAX_HIGHLIGHTS);
        let highlights = highlights
            .into_iter()
            .map(|r| Highlight {
                feed_id: r.id,
                title: r.title.clone(),
                url: r.url.clone(),
                summary: r.summary.clone(),
                category: r.category,
            })
            .collect();

        let mut tag_counts: HashMap<String, usize> = HashMap::new();
        for tag in items.iter().flat_map(|r| r.tags.iter()) {
            let tag = tag.trim().to_lowercase();
            if !tag.is_empty() {
                *tag_counts.entry(tag).or_default() += 1;
            }
        }
        let mut top_tags: Vec<TagCount> = tag_counts
            .into_iter()
            .map(|(tag, count)| TagCount { tag, count })
            .collect();
        top_tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
        top_tags.truncate(MAX_TAGS);

        Self {
            week_start: window.start,
            week_end: window.end(),
            total_items: items.len(),
            by_category,
            highlights,
            top_tags,
            feed_ids: items.iter().map(|r| r.id).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_items == 0
    }
}

// ============================================================================
// Rendering
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedReport {
    pub subject: String,
    pub markdown: String,
    pub html: String,
}

impl RenderedReport {
    /// Render the digest, with an optional written narrative of the week
    /// placed ahead of the statistics.
    pub fn render(digest: &Digest, narrative: Option<&str>) -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        // Autoescape follows the template name, so only the .html body is escaped
        env.add_template("weekly.md", MARKDOWN_TEMPLATE)?;
        env.add_template("weekly.html", HTML_TEMPLATE)?;

        let period = format!(
            "{} to {}",
            digest.week_start.format("%Y-%m-%d"),
            (digest.week_end - Duration::days(1)).format("%Y-%m-%d")
        );
        let narrative = narrative.map(str::trim).filter(|n| !n.is_empty());
        let paragraphs: Vec<&str> = narrative
            .map(|n| n.split("\n\n").map(str::trim).filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        let categories: Vec<(String, usize)> = digest
            .by_category
            .iter()
            .map(|c| (c.category.to_string(), c.count))
            .collect();
        let tags: Vec<String> = digest
            .top_tags
            .iter()
            .map(|t| format!("#{} ({})", t.tag, t.count))
            .collect();

        let ctx = context! {
            period => period,
            total_items => digest.total_items,
            narrative => narrative,
            paragraphs => paragraphs,
            categories => categories,
            highlights => digest.highlights,
            tags => tags,
        };

        Ok(Self {
            subject: format!("Your NeoFeed week: {period}"),
            markdown: env.get_template("weekly.md")?.render(&ctx)?,
            html: env.get_template("weekly.html")?.render(&ctx)?,
        })
    }
}

const MARKDOWN_TEMPLATE: &str = r#"# NeoFeed Weekly Report

**{{ period }}** · {{ total_items }} items captured
{% if narrative %}

## This week

{{ narrative }}
{% endif %}
{% if categories %}

## By category

{% for name, count in categories %}
- {{ name }}: {{ count }}
{% endfor %}
{% endif %}
{% if highlights %}

## Highlights
{% for h in highlights %}

### {{ loop.index }}. {{ "[" ~ h.title ~ "](" ~ h.url ~ ")" if h.url else h.title }}

{{ h.summary }}
{% endfor %}
{% endif %}
{% if tags %}

## Top tags

{{ tags|join(", ") }}
{% endif %}
"#;

const HTML_TEMPLATE: &str = r#"<h1>NeoFeed Weekly Report</h1>
<p><strong>{{ period }}</strong> · {{ total_items }} items captured</p>
{% if paragraphs %}
<h2>This week</h2>
{% for p in paragraphs %}
<p>{{ p }}</p>
{% endfor %}
{% endif %}
{% if categories %}
<h2>By category</h2>
<ul>
{% for name, count in categories %}
<li>{{ name }}: {{ count }}</li>
{% endfor %}
</ul>
{% endif %}
{% if highlights %}
<h2>Highlights</h2>
{% for h in highlights %}
{% if h.url %}
<h3>{{ loop.index }}. <a href="{{ h.url }}">{{ h.title }}</a></h3>
{% else %}
<h3>{{ loop.index }}. {{ h.title }}</h3>
{% endif %}
<p>{{ h.summary }}</p>
{% endfor %}
{% endif %}
{% if tags %}
<h2>Top tags</h2>
<p>{{ tags|join(", ") }}</p>
{% endif %}
"#;

// ============================================================================
// Stored report
// ============================================================================

/// A generated report, unique per (user_id, week_start)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct WeeklyReport {
    pub id: Uuid,
    pub user_id: Uuid,
    pub week_start: DateTime<Utc>,
    pub week_end: DateTime<Utc>,
    pub digest: Digest,
    pub subject: String,
    pub markdown: String,
    pub html: String,
    pub created_at: DateTime<Utc>,
}

impl WeeklyReport {
    pub fn new(user_id: Uuid, digest: Digest, rendered: RenderedReport) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            week_start: digest.week_start,
            week_end: digest.week_end,
            digest,
            subject: rendered.subject,
            markdown: rendered.markdown,
            html: rendered.html,
            created_at: Utc::now(),
        }
    }

    pub fn rendered(&self) -> RenderedReport {
        RenderedReport {
            subject: self.subject.clone(),
            markdown: self.markdown.clone(),
            html: self.html.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedSource;
    use chrono::TimeZone;

    fn record(created_at: DateTime<Utc>, category: Category, tags: &[&str]) -> FeedRecord {
        FeedRecord {
            id: Uuid::now_v7(),
            user_id: Uuid::nil(),
            url: Some("https://a.example/x".into()),
            fingerprint: created_at.to_rfc3339(),
            title: format!("Item at {created_at}"),
            content_raw: "body".into(),
            summary: "summary".into(),
            takeaways: vec![],
            category,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            reading_time_minutes: Some(1),
            enrichment: Enrichment::Enriched,
            source: FeedSource::Capture,
            subscription_id: None,
            created_at,
        }
    }

    #[test]
    fn test_previous_iso_week() {
        // Wednesday
        let now = Utc.with_ymd_and_hms(2025, 3, 12, 15, 30, 0).unwrap();
        let window = WeekWindow::previous_iso_week(now);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap());
        assert_eq!(window.end(), Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap());
        assert_eq!(window.label(), "2025-03-03");

        // Monday midnight still reports the week before
        let monday = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        assert_eq!(WeekWindow::previous_iso_week(monday).start, window.start);
    }

    #[test]
    fn test_digest_includes_only_in_window_items() {
        let window = WeekWindow::starting(Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap());
        let inside_a = record(window.start, Category::Tech, &["rust", "async"]);
        let inside_b = record(
            window.start + Duration::days(3),
            Category::Tech,
            &["Rust"],
        );
        let inside_c = record(window.start + Duration::days(6), Category::Art, &[]);
        let before = record(window.start - Duration::seconds(1), Category::Life, &["old"]);
        let after = record(window.end(), Category::Idea, &["new"]);

        let all = vec![
            before.clone(),
            inside_a.clone(),
            inside_b.clone(),
            after.clone(),
            inside_c.clone(),
        ];
        let digest = Digest::build(window, &all);

        assert_eq!(digest.total_items, 3);
        assert_eq!(digest.feed_ids, vec![inside_c.id, inside_b.id, inside_a.id]);
        assert!(!digest.feed_ids.contains(&before.id));
        assert!(!digest.feed_ids.contains(&after.id));
        assert_eq!(
            digest.by_category,
            vec![
                CategoryCount {
                    category: Category::Tech,
                    count: 2
                },
                CategoryCount {
                    category: Category::Art,
                    count: 1
                },
            ]
        );
        assert_eq!(
            digest.top_tags[0],
            TagCount {
                tag: "rust".into(),
                count: 2
            }
        );
        assert!(!digest.top_tags.iter().any(|t| t.tag == "old" || t.tag == "new"));
    }

    #[test]
    fn test_highlights_skip_raw_records() {
        let window = WeekWindow::starting(Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap());
        let mut raw = record(window.start + Duration::hours(1), Category::Other, &[]);
        raw.enrichment = Enrichment::Raw;
        let enriched = record(window.start, Category::Tech, &[]);

        let digest = Digest::build(window, &[raw, enriched.clone()]);
        assert_eq!(digest.total_items, 2);
        assert_eq!(digest.highlights.len(), 1);
        assert_eq!(digest.highlights[0].feed_id, enriched.id);
    }

    #[test]
    fn test_render_escapes_html() {
        let window = WeekWindow::starting(Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap());
        let mut item = record(window.start, Category::Tech, &["rust"]);
        item.title = "<script>alert(1)</script>".into();

        let rendered = RenderedReport::render(&Digest::build(window, &[item]), None).unwrap();
        assert_eq!(rendered.subject, "Your NeoFeed week: 2025-03-03 to 2025-03-09");
        assert!(rendered.markdown.contains("## Highlights"));
        assert!(rendered
            .markdown
            .contains("### 1. [<script>alert(1)</script>](https://a.example/x)"));
        assert!(rendered.markdown.contains("- tech: 1\n"));
        assert!(rendered.markdown.contains("#rust (1)"));
        assert!(!rendered.markdown.contains("## This week"));
        assert!(!rendered.html.contains("<script>"));
        assert!(rendered.html.contains("&lt;script&gt;"));
        assert!(rendered.html.contains("<li>tech: 1</li>"));
    }

    #[test]
    fn test_render_places_narrative_first() {
        let window = WeekWindow::starting(Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap());
        let mut item = record(window.start, Category::Tech, &[]);
        item.url = None;
        item.title = "Ownership".into();
        let digest = Digest::build(window, &[item]);

        let narrative = "A week of Rust.\n\nMostly <b>ownership</b> & borrowing.";
        let rendered = RenderedReport::render(&digest, Some(narrative)).unwrap();

        let md = &rendered.markdown;
        assert!(md.starts_with("# NeoFeed Weekly Report\n\n**2025-03-03 to 2025-03-09** · 1 items captured\n\n## This week\n\nA week of Rust."));
        assert!(md.find("## This week").unwrap() < md.find("## Highlights").unwrap());
        assert!(md.contains("### 1. Ownership\n\nsummary\n"));

        assert!(rendered.html.contains("<p>A week of Rust.</p>"));
        assert!(rendered
            .html
            .contains("<p>Mostly &lt;b&gt;ownership&lt;&#x2f;b&gt; &amp; borrowing.</p>"));
        assert!(rendered.html.contains("<h3>1. Ownership</h3>"));

        // Blank narratives render like none at all
        let blank = RenderedReport::render(&digest, Some("  ")).unwrap();
        assert_eq!(blank, RenderedReport::render(&digest, None).unwrap());
    }
}
