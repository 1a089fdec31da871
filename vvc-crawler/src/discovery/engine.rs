//! Search-to-candidate conversion
//!
//! Cursor pagination with four stop conditions: the server reports no more
//! results, a page comes back empty, the configured maximum result count is
//! reached (trimmed to the exact count), or the hard safety page ceiling is
//! hit. A fixed cooldown runs between pages. Candidates are rejected on
//! metadata alone (duration bounds, view floor, exclude keywords) before
//! any download is attempted.

use crate::config::CrawlerConfig;
use crate::services::{PlatformClient, SearchPage, VideoMeta};
use crate::utils::retry::retry_transient;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use vvc_common::Result;

/// What one discovery sweep produced.
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    pub accepted: Vec<VideoMeta>,
    pub rejected_filtered: usize,
    pub rejected_duplicate: usize,
    pub pages_fetched: usize,
}

pub struct DiscoveryEngine {
    client: Arc<dyn PlatformClient>,
    config: CrawlerConfig,
}

enum Source<'a> {
    Query(&'a str),
    Channel(&'a str),
}

impl DiscoveryEngine {
    pub fn new(client: Arc<dyn PlatformClient>, config: CrawlerConfig) -> Self {
        Self { client, config }
    }

    /// Discover candidates for one keyword query.
    ///
    /// `known_urls` is the union of both dedup layers: the collected-URLs
    /// file and manifest records with a successful download.
    pub async fn discover_query(
        &self,
        query: &str,
        known_urls: &HashSet<String>,
    ) -> Result<DiscoveryOutcome> {
        self.paginate(Source::Query(query), known_urls, self.config.max_results_per_query)
            .await
    }

    /// Discover every video of one channel (bounded by the safety page
    /// cap). Used by channel mining, which wants exhaustive coverage.
    pub async fn discover_channel(
        &self,
        username: &str,
        known_urls: &HashSet<String>,
    ) -> Result<DiscoveryOutcome> {
        self.paginate(Source::Channel(username), known_urls, usize::MAX)
            .await
    }

    async fn paginate(
        &self,
        source: Source<'_>,
        known_urls: &HashSet<String>,
        max_results: usize,
    ) -> Result<DiscoveryOutcome> {
        let label = match source {
            Source::Query(q) => format!("query '{}'", q),
            Source::Channel(c) => format!("channel '{}'", c),
        };

        let mut outcome = DiscoveryOutcome::default();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.fetch_page(&source, cursor.as_deref()).await?;
            outcome.pages_fetched += 1;

            if page.items.is_empty() {
                tracing::debug!(source = %label, "Empty result page; stopping");
                break;
            }

            for meta in &page.items {
                if known_urls.contains(&meta.url)
                    || outcome.accepted.iter().any(|a| a.url == meta.url)
                {
                    outcome.rejected_duplicate += 1;
                    continue;
                }
                if let Some(reason) = self.rejection_reason(meta) {
                    tracing::debug!(
                        video_id = %meta.video_id,
                        reason,
                        "Candidate rejected by metadata filter"
                    );
                    outcome.rejected_filtered += 1;
                    continue;
                }
                outcome.accepted.push(meta.clone());
            }

            if outcome.accepted.len() >= max_results {
                outcome.accepted.truncate(max_results);
                tracing::info!(source = %label, max_results, "Maximum result count reached");
                break;
            }

            if !page.has_more || page.cursor.is_none() {
                break;
            }

            if outcome.pages_fetched >= self.config.max_pages_per_query {
                tracing::warn!(
                    source = %label,
                    pages = outcome.pages_fetched,
                    "Safety page ceiling hit; stopping pagination"
                );
                break;
            }

            cursor = page.cursor;
            tokio::time::sleep(Duration::from_millis(self.config.page_cooldown_ms)).await;
        }

        tracing::info!(
            source = %label,
            accepted = outcome.accepted.len(),
            filtered = outcome.rejected_filtered,
            duplicates = outcome.rejected_duplicate,
            pages = outcome.pages_fetched,
            "Discovery sweep complete"
        );
        Ok(outcome)
    }

    async fn fetch_page(&self, source: &Source<'_>, cursor: Option<&str>) -> Result<SearchPage> {
        let client = &self.client;
        retry_transient(
            "search page",
            self.config.max_retries,
            self.config.retry_backoff_ms,
            || async move {
                match source {
                    Source::Query(query) => client.search_page(query, cursor).await,
                    Source::Channel(username) => client.channel_page(username, cursor).await,
                }
            },
        )
        .await
    }

    /// Metadata-only filtering; `None` means the candidate is acceptable.
    fn rejection_reason(&self, meta: &VideoMeta) -> Option<&'static str> {
        if meta.video_id.trim().is_empty() || meta.url.trim().is_empty() {
            return Some("missing id or url");
        }

        if let Some(duration) = meta.duration_seconds {
            if duration < self.config.min_duration_seconds {
                return Some("below minimum duration");
            }
            if duration > self.config.max_duration_seconds {
                return Some("above maximum duration");
            }
        }

        if let Some(views) = meta.view_count {
            if views < self.config.min_view_count {
                return Some("below view-count floor");
            }
        }

        let haystack = format!("{} {}", meta.title, meta.description).to_lowercase();
        if self
            .config
            .exclude_keywords
            .iter()
            .any(|kw| !kw.is_empty() && haystack.contains(&kw.to_lowercase()))
        {
            return Some("contains excluded keyword");
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use vvc_common::Error;

    /// Scripted platform client returning pre-built pages in order.
    struct ScriptedClient {
        pages: Mutex<Vec<Result<SearchPage>>>,
    }

    impl ScriptedClient {
        fn new(pages: Vec<Result<SearchPage>>) -> Self {
            Self {
                pages: Mutex::new(pages),
            }
        }
    }

    #[async_trait]
    impl PlatformClient for ScriptedClient {
        async fn search_page(&self, _query: &str, _cursor: Option<&str>) -> Result<SearchPage> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                return Ok(SearchPage::default());
            }
            pages.remove(0)
        }

        async fn channel_page(&self, username: &str, cursor: Option<&str>) -> Result<SearchPage> {
            self.search_page(username, cursor).await
        }
    }

    fn meta(id: &str, duration: f64, views: u64) -> VideoMeta {
        VideoMeta {
            video_id: id.to_string(),
            url: format!("https://x/{}", id),
            title: format!("title {}", id),
            description: String::new(),
            channel: "chan".to_string(),
            duration_seconds: Some(duration),
            view_count: Some(views),
        }
    }

    fn config() -> CrawlerConfig {
        CrawlerConfig {
            min_duration_seconds: 10.0,
            max_duration_seconds: 100.0,
            min_view_count: 50,
            max_results_per_query: 10,
            max_pages_per_query: 3,
            page_cooldown_ms: 0,
            max_retries: 0,
            retry_backoff_ms: 1,
            ..CrawlerConfig::default()
        }
    }

    fn page(items: Vec<VideoMeta>, cursor: Option<&str>, has_more: bool) -> Result<SearchPage> {
        Ok(SearchPage {
            items,
            cursor: cursor.map(|c| c.to_string()),
            has_more,
        })
    }

    #[tokio::test]
    async fn filters_and_dedups_candidates() {
        let client = ScriptedClient::new(vec![page(
            vec![
                meta("keep", 30.0, 100),
                meta("short", 2.0, 100),
                meta("unpopular", 30.0, 3),
                meta("dup", 30.0, 100),
            ],
            None,
            false,
        )]);
        let engine = DiscoveryEngine::new(Arc::new(client), config());

        let known: HashSet<String> = ["https://x/dup".to_string()].into_iter().collect();
        let outcome = engine.discover_query("q", &known).await.unwrap();

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].video_id, "keep");
        assert_eq!(outcome.rejected_filtered, 2);
        assert_eq!(outcome.rejected_duplicate, 1);
    }

    #[tokio::test]
    async fn exclude_keywords_reject_by_title() {
        let mut cfg = config();
        cfg.exclude_keywords = vec!["karaoke".to_string()];
        let mut bad = meta("k1", 30.0, 100);
        bad.title = "Karaoke night".to_string();
        let client = ScriptedClient::new(vec![page(vec![bad, meta("ok", 30.0, 100)], None, false)]);
        let engine = DiscoveryEngine::new(Arc::new(client), cfg);

        let outcome = engine.discover_query("q", &HashSet::new()).await.unwrap();
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].video_id, "ok");
    }

    #[tokio::test]
    async fn stops_at_safety_page_ceiling() {
        // Every page advertises more work; only the ceiling stops us
        let pages: Vec<Result<SearchPage>> = (0..10)
            .map(|i| {
                page(
                    vec![meta(&format!("v{}", i), 30.0, 100)],
                    Some("next"),
                    true,
                )
            })
            .collect();
        let engine = DiscoveryEngine::new(Arc::new(ScriptedClient::new(pages)), config());

        let outcome = engine.discover_query("q", &HashSet::new()).await.unwrap();
        assert_eq!(outcome.pages_fetched, 3);
        assert_eq!(outcome.accepted.len(), 3);
    }

    #[tokio::test]
    async fn trims_to_exact_max_results() {
        let mut cfg = config();
        cfg.max_results_per_query = 3;
        let pages = vec![
            page(
                (0..2).map(|i| meta(&format!("a{}", i), 30.0, 100)).collect(),
                Some("c1"),
                true,
            ),
            page(
                (0..5).map(|i| meta(&format!("b{}", i), 30.0, 100)).collect(),
                Some("c2"),
                true,
            ),
        ];
        let engine = DiscoveryEngine::new(Arc::new(ScriptedClient::new(pages)), cfg);

        let outcome = engine.discover_query("q", &HashSet::new()).await.unwrap();
        assert_eq!(outcome.accepted.len(), 3);
    }

    #[tokio::test]
    async fn quota_exhaustion_propagates() {
        let client = ScriptedClient::new(vec![Err(Error::QuotaExhausted("all keys".into()))]);
        let engine = DiscoveryEngine::new(Arc::new(client), config());

        let err = engine.discover_query("q", &HashSet::new()).await.unwrap_err();
        assert!(err.is_quota());
    }
}
