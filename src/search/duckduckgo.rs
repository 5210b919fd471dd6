//! DuckDuckGo search via HTML scraping
//!
//! DuckDuckGo has no free web search API, so results are scraped from the
//! HTML endpoint. Parsing is tolerant: if the result markup changes, the
//! visible `result__url` links are used as a fallback.

use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{SearchProvider, SearchResults};
use crate::error::CollaboratorError;
use crate::state::Source;

pub const DEFAULT_BASE_URL: &str = "https://html.duckduckgo.com";

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

// =============================================================================
// ERRORS
// =============================================================================
#[derive(Error, Debug)]
pub enum DuckDuckGoError {
    #[error("Failed to perform web search: {0}")]
    SearchFailed(String),

    #[error("Rate limited by search provider, please wait")]
    RateLimited,

    #[error("Search provider unavailable: HTTP {0}")]
    Unavailable(u16),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl From<DuckDuckGoError> for CollaboratorError {
    fn from(e: DuckDuckGoError) -> Self {
        let message = format!("DuckDuckGo error: {e}");
        match e {
            DuckDuckGoError::RateLimited
            | DuckDuckGoError::Unavailable(_)
            | DuckDuckGoError::NetworkError(_) => CollaboratorError::search_transient(message),
            DuckDuckGoError::SearchFailed(_) => CollaboratorError::search_permanent(message),
        }
    }
}

// =============================================================================
// SEARCH PROVIDER
// =============================================================================
#[derive(Debug, Clone)]
pub struct DuckDuckGoSearch {
    /// Maximum results to return per search
    max_results: usize,
    base_url: String,
    timeout: Duration,
}

impl DuckDuckGoSearch {
    pub fn new(max_results: usize) -> Self {
        Self {
            max_results: max_results.max(1),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch(&self, query: &str) -> Result<String, DuckDuckGoError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        let url = format!("{}/html/?q={}", self.base_url, urlencoding::encode(query));
        debug!(url = %url, "Fetching search results");

        let response = client.get(&url).send().await?;
        let status = response.status();

        if !status.is_success() {
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(DuckDuckGoError::RateLimited);
            }
            if status.is_server_error() {
                return Err(DuckDuckGoError::Unavailable(status.as_u16()));
            }
            return Err(DuckDuckGoError::SearchFailed(format!("HTTP {status}")));
        }

        Ok(response.text().await?)
    }

    /// Parse DuckDuckGo HTML into sources, trying the structured result
    /// blocks first and the visible URLs second
    fn parse_html(&self, html: &str) -> Vec<Source> {
        let mut hits: Vec<(String, String, String)> = Vec::new();
        let mut seen_urls = HashSet::new();

        // Strategy 1: result blocks; the title link carries the target in `uddg=`
        for block in html.split("class=\"result__a\"").skip(1) {
            if hits.len() >= self.max_results {
                break;
            }
            let Some(url) = decode_redirect(block) else {
                continue;
            };
            if !seen_urls.insert(url.clone()) {
                continue;
            }
            let title = element_text(block)
                .filter(|t| !t.is_empty())
                .or_else(|| extract_domain(&url))
                .unwrap_or_else(|| "Result".to_string());
            let snippet = block
                .find("result__snippet")
                .and_then(|idx| element_text(&block[idx..]))
                .unwrap_or_default();
            hits.push((title, snippet, url));
        }

        // Strategy 2: result__url class which contains visible URLs
        if hits.len() < self.max_results {
            for segment in html.split("result__url").skip(1) {
                if hits.len() >= self.max_results {
                    break;
                }
                let Some(href_start) = segment.find("href=\"") else {
                    continue;
                };
                let after_href = &segment[href_start + 6..];
                let Some(href_end) = after_href.find('"') else {
                    continue;
                };
                let href = &after_href[..href_end];
                let url = if let Some(stripped) = href.strip_prefix("//") {
                    format!("https://{stripped}")
                } else if href.starts_with("http") {
                    href.to_string()
                } else {
                    continue;
                };

                if !url.contains("duckduckgo.com") && seen_urls.insert(url.clone()) {
                    let title = extract_domain(&url).unwrap_or_else(|| "Result".to_string());
                    hits.push((title, String::new(), url));
                }
            }
        }

        hits.into_iter()
            .take(self.max_results)
            .enumerate()
            .map(|(i, (title, snippet, url))| {
                Source::new(format!("ddg-{}", i + 1), title, snippet, url)
            })
            .collect()
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    async fn search(&self, query: &str) -> Result<SearchResults, CollaboratorError> {
        info!(query = %query, "Performing web search");

        let html = self.fetch(query).await.map_err(|e| {
            warn!(error = %e, "DuckDuckGo search failed");
            CollaboratorError::from(e)
        })?;
        let results = self.parse_html(&html);

        if results.is_empty() {
            warn!(query = %query, "No search results found");
        } else {
            info!(query = %query, count = results.len(), "Search completed");
        }

        Ok(SearchResults::new(results))
    }

    fn name(&self) -> &str {
        "duckduckgo"
    }
}

/// Decode the target of a DuckDuckGo redirect link
fn decode_redirect(block: &str) -> Option<String> {
    let start = block.find("uddg=")? + 5;
    let rest = &block[start..];
    let end = rest.find(['&', '"', '\''])?;
    let url = urlencoding::decode(&rest[..end]).ok()?.into_owned();
    (url.starts_with("http") && !url.contains("duckduckgo.com")).then_some(url)
}

/// Text content of the first element in `fragment`, with inline tags removed
fn element_text(fragment: &str) -> Option<String> {
    let open_end = fragment.find('>')? + 1;
    let rest = &fragment[open_end..];
    let close = rest.find("</a>").or_else(|| rest.find("</div>"))?;
    Some(decode_entities(&strip_tags(&rest[..close])).trim().to_string())
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

/// Extract the domain name from a URL.
fn extract_domain(url: &str) -> Option<String> {
    url.split("//")
        .nth(1)?
        .split('/')
        .next()
        .map(|s| s.to_string())
}
