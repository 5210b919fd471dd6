//! # Search Module
//!
//! The search collaborator turns a query into a ranked list of [`Source`]s.
//! Two backends ship with the agent:
//! - [`SerperSearch`]: Google results through the Serper API (needs a key)
//! - [`DuckDuckGoSearch`]: free HTML scraping, used when no key is configured

pub mod duckduckgo;
pub mod serper;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Config, SearchBackend};
use crate::error::CollaboratorError;
use crate::state::Source;

pub use duckduckgo::DuckDuckGoSearch;
pub use serper::SerperSearch;

/// What one search returns: ranked sources plus optional extra material
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    pub sources: Vec<Source>,
    pub context: SearchContext,
}

impl SearchResults {
    pub fn new(sources: Vec<Source>) -> Self {
        Self {
            sources,
            context: SearchContext::default(),
        }
    }

    pub fn with_context(mut self, context: SearchContext) -> Self {
        self.context = context;
        self
    }
}

impl From<Vec<Source>> for SearchResults {
    fn from(sources: Vec<Source>) -> Self {
        Self::new(sources)
    }
}

/// Search material that is not a source: a knowledge panel, related
/// searches and common questions. It is shown to the report writer only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchContext {
    pub knowledge_graph: Option<KnowledgeGraph>,
    pub related_searches: Vec<String>,
    pub related_questions: Vec<RelatedQuestion>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeGraph {
    pub title: String,
    /// Attribute name and value, sorted by name
    pub facts: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelatedQuestion {
    pub question: String,
    pub answer: String,
}

impl SearchContext {
    pub fn is_empty(&self) -> bool {
        self.knowledge_graph.is_none()
            && self.related_searches.is_empty()
            && self.related_questions.is_empty()
    }

    /// One text block per kind of material, skipping kinds with nothing in them
    pub fn blocks(&self) -> Vec<String> {
        let mut blocks = Vec::new();

        if let Some(graph) = self.knowledge_graph.as_ref().filter(|g| !g.facts.is_empty()) {
            let facts: Vec<String> = graph
                .facts
                .iter()
                .map(|(key, value)| format!("{key}: {value}"))
                .collect();
            blocks.push(format!(
                "Knowledge Graph about {}:\n{}",
                graph.title,
                facts.join("\n")
            ));
        }

        if !self.related_searches.is_empty() {
            let items: Vec<String> = self
                .related_searches
                .iter()
                .map(|s| format!("- {s}"))
                .collect();
            blocks.push(format!("Related Searches:\n{}", items.join("\n")));
        }

        if !self.related_questions.is_empty() {
            let items: Vec<String> = self
                .related_questions
                .iter()
                .map(|q| format!("Q: {}\nA: {}", q.question, q.answer))
                .collect();
            blocks.push(format!("People Also Ask:\n{}", items.join("\n\n")));
        }

        blocks
    }
}

/// Turns a research query into candidate sources
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run one search. Every failure must say whether it is transient.
    async fn search(&self, query: &str) -> Result<SearchResults, CollaboratorError>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Build the search provider selected by the configuration
pub fn from_config(config: &Config) -> anyhow::Result<Arc<dyn SearchProvider>> {
    let provider: Arc<dyn SearchProvider> = match config.search_backend {
        SearchBackend::Serper => {
            let api_key = config.serper_api_key.clone().ok_or_else(|| {
                anyhow::anyhow!("SEARCH_PROVIDER=serper requires SERPER_API_KEY")
            })?;
            Arc::new(
                SerperSearch::new(api_key)
                    .with_base_url(config.serper_base_url.clone())
                    .with_max_results(config.max_search_results),
            )
        }
        SearchBackend::DuckDuckGo => Arc::new(DuckDuckGoSearch::new(config.max_search_results)),
    };
    Ok(provider)
}
