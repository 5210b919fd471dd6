//! Serper Search - Google results through the Serper API
//!
//! Errors are typed so the run can tell a flaky upstream (timeouts, rate
//! limits, 5xx) from one that will never succeed (bad key, bad request).
//! Nothing here retries; a failed call ends the run.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use serde_json::{Map, Value};

use super::{KnowledgeGraph, RelatedQuestion, SearchContext, SearchProvider, SearchResults};
use crate::error::{CollaboratorError, FailureKind};
use crate::state::Source;

/// Default Serper endpoint
pub const DEFAULT_BASE_URL: &str = "https://google.serper.dev";

/// Default timeout for one Serper request
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Typed errors for the Serper API
#[derive(Debug, thiserror::Error)]
pub enum SerperError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized - check SERPER_API_KEY")]
    Unauthorized,

    #[error("Rate limited - too many requests")]
    RateLimited,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("HTTP error ({0}): {1}")]
    HttpError(u16, String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl SerperError {
    /// Whether calling again later could succeed
    fn is_transient(&self) -> bool {
        matches!(
            self,
            SerperError::Timeout
                | SerperError::Connection(_)
                | SerperError::Network(_)
                | SerperError::RateLimited
                | SerperError::ServerError(_, _)
        )
    }
}

impl From<SerperError> for CollaboratorError {
    fn from(e: SerperError) -> Self {
        let kind = if e.is_transient() {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        };
        CollaboratorError::new(
            crate::error::Collaborator::Search,
            kind,
            format!("Serper API error: {e}"),
        )
    }
}

/// Request body for the Serper API
#[derive(Debug, Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: usize,
}

/// Related searches and questions kept for the report writer
const MAX_RELATED: usize = 3;

/// Knowledge graph keys that carry no facts
const KNOWLEDGE_GRAPH_SKIP: [&str; 3] = ["type", "title", "imageUrl"];

/// Response from the Serper API. Only organic results become sources; the
/// rest becomes [`SearchContext`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
    #[serde(default)]
    knowledge_graph: Option<Map<String, Value>>,
    #[serde(default)]
    related_searches: Vec<SerperRelatedSearch>,
    #[serde(default)]
    people_also_ask: Vec<SerperQuestion>,
}

#[derive(Debug, Deserialize)]
struct SerperRelatedSearch {
    #[serde(default)]
    query: String,
}

#[derive(Debug, Deserialize)]
struct SerperQuestion {
    #[serde(default)]
    question: String,
    snippet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SerperOrganic {
    #[serde(default)]
    title: String,
    link: Option<String>,
    #[serde(default)]
    snippet: String,
    position: Option<u32>,
}

/// Google search through Serper
pub struct SerperSearch {
    api_key: String,
    base_url: String,
    client: Client,
    timeout: Duration,
    max_results: usize,
}

impl SerperSearch {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: Client::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_results: 5,
        }
    }

    /// Point at a different endpoint (tests, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    async fn execute_request(&self, query: &str) -> Result<SerperResponse, SerperError> {
        let url = format!("{}/search", self.base_url);
        debug!(url = %url, "Querying Serper");

        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&SerperRequest {
                q: query,
                num: self.max_results,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SerperError::Timeout
                } else if e.is_connect() {
                    SerperError::Connection(e.to_string())
                } else {
                    SerperError::Network(e.to_string())
                }
            })?;

        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| SerperError::ParseError(e.to_string()));
        }

        let error_text = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 | 403 => Err(SerperError::Unauthorized),
            429 => Err(SerperError::RateLimited),
            400 => Err(SerperError::BadRequest(error_text)),
            500..=599 => Err(SerperError::ServerError(status.as_u16(), error_text)),
            _ => Err(SerperError::HttpError(status.as_u16(), error_text)),
        }
    }
}

fn to_results(response: SerperResponse) -> SearchResults {
    let context = SearchContext {
        knowledge_graph: response.knowledge_graph.as_ref().and_then(to_knowledge_graph),
        related_searches: response
            .related_searches
            .into_iter()
            .map(|r| r.query)
            .filter(|q| !q.trim().is_empty())
            .take(MAX_RELATED)
            .collect(),
        related_questions: response
            .people_also_ask
            .into_iter()
            .filter(|q| !q.question.trim().is_empty())
            .take(MAX_RELATED)
            .map(|q| RelatedQuestion {
                question: q.question,
                answer: q
                    .snippet
                    .unwrap_or_else(|| "No answer available".to_string()),
            })
            .collect(),
    };
    SearchResults::new(to_sources(response.organic)).with_context(context)
}

fn to_knowledge_graph(graph: &Map<String, Value>) -> Option<KnowledgeGraph> {
    let mut facts: Vec<(String, String)> = graph
        .iter()
        .filter(|(key, _)| !KNOWLEDGE_GRAPH_SKIP.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), fact_text(value)))
        .collect();
    facts.sort_by(|a, b| a.0.cmp(&b.0));
    if facts.is_empty() {
        return None;
    }
    let title = graph
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("the topic")
        .to_string();
    Some(KnowledgeGraph { title, facts })
}

fn fact_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(fact_text).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

fn to_sources(organic: Vec<SerperOrganic>) -> Vec<Source> {
    organic
        .into_iter()
        .enumerate()
        .filter_map(|(i, hit)| {
            let url = hit.link.filter(|l| !l.trim().is_empty())?;
            let position = hit.position.map(|p| p as usize).unwrap_or(i + 1);
            Some(Source::new(
                format!("serper-{position}"),
                hit.title,
                hit.snippet,
                url,
            ))
        })
        .collect()
}

#[async_trait]
impl SearchProvider for SerperSearch {
    async fn search(&self, query: &str) -> Result<SearchResults, CollaboratorError> {
        info!(query = %query, "Performing Serper search");

        let response = self.execute_request(query).await.map_err(|e| {
            warn!(error = %e, "Serper search failed");
            CollaboratorError::from(e)
        })?;

        let results = to_results(response);
        info!(
            query = %query,
            count = results.sources.len(),
            extras = !results.context.is_empty(),
            "Serper search completed"
        );
        Ok(results)
    }

    fn name(&self) -> &str {
        "serper"
    }
}
