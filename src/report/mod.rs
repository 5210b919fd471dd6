//! Report generation collaborator
//!
//! A report is written one [`ReportSection`] at a time. Each call returns a
//! stream of text chunks. Joined in order, the chunks of all sections make
//! up the final report.

pub mod llm;

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::Config;
use crate::error::CollaboratorError;
use crate::search::SearchContext;
use crate::state::{ReportSection, Source};

pub use llm::{RigBackend, RigReportGenerator};

/// Everything a section writer can see
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRequest {
    pub query: String,
    pub sources: Vec<Source>,
    /// Extra search material shown after the sources
    pub context: SearchContext,
    /// Report text produced by the earlier sections
    pub draft: String,
}

impl ReportRequest {
    pub fn new(query: impl Into<String>, sources: Vec<Source>) -> Self {
        Self {
            query: query.into(),
            sources,
            context: SearchContext::default(),
            draft: String::new(),
        }
    }

    pub fn with_context(mut self, context: SearchContext) -> Self {
        self.context = context;
        self
    }

    /// Research material in the layout the section prompts expect
    pub fn research_material(&self) -> String {
        let organic = self
            .sources
            .iter()
            .map(|s| {
                let snippet = if s.snippet.is_empty() {
                    "No preview"
                } else {
                    s.snippet.as_str()
                };
                format!("Title: {}\nSnippet: {}\nLink: {}", s.title, snippet, s.url)
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut blocks = self.context.blocks();
        if blocks.is_empty() {
            return organic;
        }
        blocks.insert(0, organic);
        blocks.join("\n\n===\n\n")
    }
}

/// Ordered text chunks of one section
pub struct ReportStream {
    inner: Pin<Box<dyn Stream<Item = Result<String, CollaboratorError>> + Send>>,
}

impl ReportStream {
    /// Create a new stream from any compatible async stream
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<String, CollaboratorError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Stream a finished text paragraph by paragraph
    pub fn from_complete(text: impl AsRef<str>) -> Self {
        Self::from_chunks(chunk_paragraphs(text.as_ref()))
    }

    pub fn from_chunks(chunks: Vec<String>) -> Self {
        Self::new(futures::stream::iter(chunks.into_iter().map(Ok)))
    }

    pub fn empty() -> Self {
        Self::from_chunks(Vec::new())
    }

    pub fn into_inner(self) -> Pin<Box<dyn Stream<Item = Result<String, CollaboratorError>> + Send>> {
        self.inner
    }
}

impl std::fmt::Debug for ReportStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportStream").finish_non_exhaustive()
    }
}

/// Writes report sections
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Produce the text of `section`. An empty stream is allowed; the run
    /// fails only when every section comes back empty.
    async fn generate(
        &self,
        request: &ReportRequest,
        section: ReportSection,
    ) -> Result<ReportStream, CollaboratorError>;

    /// Generator name for logging
    fn name(&self) -> &str;
}

/// Split text at blank lines. Concatenating the pieces gives back `text`.
pub fn chunk_paragraphs(text: &str) -> Vec<String> {
    text.split_inclusive("\n\n")
        .filter(|piece| !piece.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build the report generator selected by the configuration
pub fn from_config(config: &Config) -> anyhow::Result<Arc<dyn ReportGenerator>> {
    Ok(Arc::new(RigReportGenerator::from_config(config)?))
}
