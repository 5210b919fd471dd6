//! Report sections written by a language model through Rig
//!
//! Each section is one completion. The model sees the research material, the
//! draft so far, and instructions for the one section it has to write. The
//! outline heading and the source list are deterministic and never hit the
//! model.

use anyhow::Result;
use async_trait::async_trait;
use rig::client::{CompletionClient, ProviderClient};
use rig::completion::Prompt;
use rig::providers::{ollama, openai};
use tracing::{debug, info, warn};

use super::{ReportGenerator, ReportRequest, ReportStream};
use crate::config::{Config, ReportBackend};
use crate::error::CollaboratorError;
use crate::state::ReportSection;

// =============================================================================
// SYSTEM PROMPT
// =============================================================================
const REPORT_SYSTEM_PROMPT: &str = r#"
You are writing one section of a comprehensive research report, using the provided search results.

Include relevant facts, statistics, and quotes from the sources when available.
Maintain a professional, objective tone throughout.
Use markdown formatting, with ## for the section heading and ### for subheadings.
Write ONLY the requested section. Do not repeat sections that are already in the draft.
"#;

/// Instructions for the sections the model writes
fn section_instructions(section: ReportSection) -> Option<&'static str> {
    match section {
        ReportSection::Outline => None,
        ReportSection::ExecutiveSummary => Some(
            "## Executive Summary\nA brief overview of the topic and key findings (2-3 sentences).",
        ),
        ReportSection::Introduction => Some(
            "## Introduction\nBackground information on the topic and why it matters.",
        ),
        ReportSection::KeyFindings => Some(
            "## Key Findings\nThe main insights, organized as bullet points.",
        ),
        ReportSection::Analysis => Some(
            "## Detailed Analysis\nIn-depth exploration of the topic with subsections as needed. \
             Include answers to common questions when available and address related topics \
             identified in the research.",
        ),
        ReportSection::Conclusions => Some(
            "## Conclusions\nSummary of the most important takeaways.",
        ),
        ReportSection::Finalize => Some(
            "## Further Research\nSuggest related topics worth exploring, as a short bullet list.",
        ),
    }
}

// =============================================================================
// RIG BACKEND
// =============================================================================
/// The model provider behind the generator
pub enum RigBackend {
    Ollama(ollama::Client),
    OpenAi(openai::Client),
}

impl RigBackend {
    fn name(&self) -> &'static str {
        match self {
            RigBackend::Ollama(_) => "ollama",
            RigBackend::OpenAi(_) => "openai",
        }
    }
}

pub struct RigReportGenerator {
    backend: RigBackend,
    model: String,
    temperature: f32,
}

impl RigReportGenerator {
    pub fn new(backend: RigBackend, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            backend,
            model: model.into(),
            temperature,
        }
    }

    /// Connect to the provider named in the configuration.
    ///
    /// Rig clients read their endpoints and keys from the environment, so
    /// the Ollama host is exported before the client is created.
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = match config.report_backend {
            ReportBackend::Ollama => {
                std::env::set_var("OLLAMA_API_BASE_URL", &config.ollama_host);
                debug!(host = %config.ollama_host, "Using Ollama for report generation");
                RigBackend::Ollama(ollama::Client::from_env())
            }
            ReportBackend::OpenAi => {
                if std::env::var("OPENAI_API_KEY").is_err() {
                    anyhow::bail!("REPORT_PROVIDER=openai requires OPENAI_API_KEY");
                }
                RigBackend::OpenAi(openai::Client::from_env())
            }
        };

        info!(
            provider = backend.name(),
            model = %config.report_model,
            "Report generator configured"
        );

        Ok(Self::new(backend, &config.report_model, config.temperature))
    }

    /// One completion with the report preamble
    async fn complete(&self, prompt: &str) -> Result<String, CollaboratorError> {
        let temperature = f64::from(self.temperature);
        let response = match &self.backend {
            RigBackend::Ollama(client) => {
                let agent = client
                    .agent(&self.model)
                    .preamble(REPORT_SYSTEM_PROMPT)
                    .temperature(temperature)
                    .build();
                agent.prompt(prompt).await
            }
            RigBackend::OpenAi(client) => {
                let agent = client
                    .agent(&self.model)
                    .preamble(REPORT_SYSTEM_PROMPT)
                    .temperature(temperature)
                    .build();
                agent.prompt(prompt).await
            }
        };

        response.map_err(|e| {
            warn!(error = %e, provider = self.backend.name(), "Completion failed");
            classify_prompt_error(&e.to_string())
        })
    }
}

/// Rig surfaces provider failures as text; sort them by what the message says
fn classify_prompt_error(message: &str) -> CollaboratorError {
    let lowered = message.to_lowercase();
    let transient = TRANSIENT_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
        || has_retryable_status(&lowered);

    let message = format!("Rig completion error: {message}");
    if transient {
        CollaboratorError::report_transient(message)
    } else {
        CollaboratorError::report_permanent(message)
    }
}

const TRANSIENT_PHRASES: [&str; 9] = [
    "timeout",
    "timed out",
    "connection refused",
    "connection reset",
    "connection closed",
    "error sending request",
    "rate limit",
    "overloaded",
    "temporarily unavailable",
];

/// Words that sit next to an HTTP status code in provider error text
const STATUS_BEFORE: [&str; 4] = ["status", "http", "code", "error"];
const STATUS_AFTER: [&str; 5] = ["too", "internal", "bad", "service", "gateway"];

/// True when the text carries a 429 or 5xx status code. A bare number only
/// counts as a status when a status word is right before or after it.
fn has_retryable_status(lowered: &str) -> bool {
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    words.iter().enumerate().any(|(i, word)| {
        let retryable =
            word.len() == 3 && matches!(word.parse::<u16>(), Ok(429) | Ok(500..=599));
        let before = i.checked_sub(1).map(|j| words[j]);
        let after = words.get(i + 1).copied();
        retryable
            && (before.is_some_and(|w| STATUS_BEFORE.contains(&w))
                || after.is_some_and(|w| STATUS_AFTER.contains(&w)))
    })
}

fn section_prompt(request: &ReportRequest, instructions: &str) -> String {
    let draft = if request.draft.trim().is_empty() {
        "(nothing written yet)"
    } else {
        request.draft.as_str()
    };
    format!(
        "Research topic: {}\n\nSearch results:\n\n{}\n\n===\n\nDraft so far:\n\n{}\n\n===\n\nWrite this section now:\n{}",
        request.query,
        request.research_material(),
        draft,
        instructions
    )
}

/// Numbered source list closing the report
fn sources_section(request: &ReportRequest) -> String {
    let mut out = String::from("## Sources\n\n");
    for (i, source) in request.sources.iter().enumerate() {
        out.push_str(&format!("{}. [{}]({})\n", i + 1, source.title, source.url));
    }
    out
}

/// Make sure consecutive sections stay separate paragraphs
fn as_block(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n\n")
    }
}

#[async_trait]
impl ReportGenerator for RigReportGenerator {
    async fn generate(
        &self,
        request: &ReportRequest,
        section: ReportSection,
    ) -> Result<ReportStream, CollaboratorError> {
        let Some(instructions) = section_instructions(section) else {
            return Ok(ReportStream::from_complete(format!(
                "# Research Report: {}\n\n",
                request.query
            )));
        };

        debug!(?section, model = %self.model, "Generating report section");
        let text = self
            .complete(&section_prompt(request, instructions))
            .await?;
        let mut body = as_block(&text);

        if section == ReportSection::Finalize {
            body.push_str(&sources_section(request));
        }

        Ok(ReportStream::from_complete(body))
    }

    fn name(&self) -> &str {
        self.backend.name()
    }
}
