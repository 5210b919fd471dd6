//! # Configuration Module
//!
//! Loads the agent configuration from environment variables (and a `.env`
//! file during development). Every key has a default, so an empty
//! environment gives a working local setup: DuckDuckGo search plus a local
//! Ollama model.

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

// =============================================================================
// PROVIDER SELECTION
// =============================================================================
/// Which search collaborator to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBackend {
    Serper,
    DuckDuckGo,
}

impl FromStr for SearchBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serper" => Ok(SearchBackend::Serper),
            "duckduckgo" | "ddg" => Ok(SearchBackend::DuckDuckGo),
            other => anyhow::bail!("unknown search provider {other:?} (expected serper or duckduckgo)"),
        }
    }
}

/// Which model provider writes the report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportBackend {
    Ollama,
    OpenAi,
}

impl FromStr for ReportBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(ReportBackend::Ollama),
            "openai" => Ok(ReportBackend::OpenAi),
            other => anyhow::bail!("unknown report provider {other:?} (expected ollama or openai)"),
        }
    }
}

// =============================================================================
// CONFIGURATION STRUCT
// =============================================================================
/// Main configuration for the research agent.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the AG-UI endpoint listens on
    pub http_addr: String,

    pub search_backend: SearchBackend,

    /// Serper API key; selects Serper by default when present
    pub serper_api_key: Option<String>,

    pub serper_base_url: String,

    /// Maximum number of sources kept for the report
    pub max_search_results: usize,

    pub report_backend: ReportBackend,

    /// Model that writes the report (e.g., "llama3.2", "gpt-4o-mini")
    pub report_model: String,

    /// Ollama server URL (default: http://localhost:11434)
    pub ollama_host: String,

    /// Temperature for report generation.
    /// Lower values produce more focused, factual reports
    pub temperature: f32,

    /// Budget for one search call
    pub search_timeout: Duration,

    /// Budget for one report section
    pub report_timeout: Duration,

    /// Events buffered between a run and its client before the run waits
    pub event_buffer: usize,

    /// Deliver the report text generated so far when a later section fails
    pub partial_report_on_error: bool,

    /// Log level for the application
    pub log_level: String,
}

// =============================================================================
// DEFAULT IMPLEMENTATION
// =============================================================================
impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8000".to_string(),
            search_backend: SearchBackend::DuckDuckGo,
            serper_api_key: None,
            serper_base_url: crate::search::serper::DEFAULT_BASE_URL.to_string(),
            max_search_results: 5,
            report_backend: ReportBackend::Ollama,
            report_model: "llama3.2".to_string(),
            ollama_host: "http://localhost:11434".to_string(),
            // Reports should stay close to the sources
            temperature: 0.5,
            search_timeout: Duration::from_secs(30),
            report_timeout: Duration::from_secs(120),
            event_buffer: 64,
            partial_report_on_error: false,
            log_level: "info".to_string(),
        }
    }
}

// =============================================================================
// CONFIGURATION LOADING
// =============================================================================
impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Example
    /// ```no_run
    /// use ag_ui_research_agent::config::Config;
    ///
    /// let config = Config::from_env()?;
    /// println!("Using model: {}", config.report_model);
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (silently ignore if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from any key lookup, starting from the defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(val) = lookup("HTTP_ADDR") {
            config.http_addr = val;
        }

        if let Some(val) = lookup("SERPER_API_KEY").filter(|v| !v.trim().is_empty()) {
            config.serper_api_key = Some(val);
            config.search_backend = SearchBackend::Serper;
        }

        if let Some(val) = lookup("SEARCH_PROVIDER") {
            config.search_backend = val.parse().context("SEARCH_PROVIDER is invalid")?;
        }

        if let Some(val) = lookup("SERPER_BASE_URL") {
            config.serper_base_url = val;
        }

        if let Some(val) = lookup("MAX_SEARCH_RESULTS") {
            config.max_search_results = val
                .parse()
                .context("MAX_SEARCH_RESULTS must be a valid positive integer")?;
        }

        if let Some(val) = lookup("REPORT_PROVIDER") {
            config.report_backend = val.parse().context("REPORT_PROVIDER is invalid")?;
        }

        // REPORT_MODEL wins over the older OLLAMA_MODEL name
        if let Some(val) = lookup("REPORT_MODEL").or_else(|| lookup("OLLAMA_MODEL")) {
            config.report_model = val;
        }

        if let Some(val) = lookup("OLLAMA_API_BASE_URL") {
            config.ollama_host = val;
        }

        if let Some(val) = lookup("TEMPERATURE") {
            config.temperature = val
                .parse()
                .context("TEMPERATURE must be a valid floating-point number (e.g., 0.5)")?;
        }

        if let Some(val) = lookup("SEARCH_TIMEOUT_SECS") {
            config.search_timeout = Duration::from_secs(
                val.parse()
                    .context("SEARCH_TIMEOUT_SECS must be a whole number of seconds")?,
            );
        }

        if let Some(val) = lookup("REPORT_TIMEOUT_SECS") {
            config.report_timeout = Duration::from_secs(
                val.parse()
                    .context("REPORT_TIMEOUT_SECS must be a whole number of seconds")?,
            );
        }

        if let Some(val) = lookup("EVENT_BUFFER") {
            config.event_buffer = val
                .parse()
                .context("EVENT_BUFFER must be a valid positive integer")?;
        }

        if let Some(val) = lookup("PARTIAL_REPORT_ON_ERROR") {
            config.partial_report_on_error = parse_bool(&val)
                .context("PARTIAL_REPORT_ON_ERROR must be true or false")?;
        }

        if let Some(val) = lookup("RUST_LOG") {
            config.log_level = val;
        }

        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Fails fast with a clear error instead of failing mid-run.
    pub fn validate(&self) -> Result<()> {
        // Temperature must be between 0 and 2 (OpenAI/Ollama range)
        if !(0.0..=2.0).contains(&self.temperature) {
            anyhow::bail!(
                "Temperature must be between 0.0 and 2.0, got: {}",
                self.temperature
            );
        }

        if self.max_search_results == 0 {
            anyhow::bail!("MAX_SEARCH_RESULTS must be at least 1");
        }

        if self.report_model.trim().is_empty() {
            anyhow::bail!("REPORT_MODEL cannot be empty");
        }

        if self.search_backend == SearchBackend::Serper && self.serper_api_key.is_none() {
            anyhow::bail!("SEARCH_PROVIDER=serper requires SERPER_API_KEY");
        }

        if self.search_timeout.is_zero() || self.report_timeout.is_zero() {
            anyhow::bail!("Collaborator timeouts must be at least one second");
        }

        if self.event_buffer == 0 {
            anyhow::bail!("EVENT_BUFFER must be at least 1");
        }

        self.socket_addr()?;

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.http_addr
            .parse()
            .with_context(|| format!("HTTP_ADDR {:?} is not a socket address", self.http_addr))
    }
}

fn parse_bool(val: &str) -> Result<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("not a boolean: {other:?}"),
    }
}

// =============================================================================
// UNIT TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.report_model, "llama3.2");
        assert_eq!(config.ollama_host, "http://localhost:11434");
        assert!((config.temperature - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.max_search_results, 5);
        assert_eq!(config.search_backend, SearchBackend::DuckDuckGo);
        assert_eq!(config.event_buffer, 64);
        assert!(!config.partial_report_on_error);
    }

    #[test]
    fn test_config_validation_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_temperature() {
        let mut config = Config::default();
        config.temperature = 3.0; // Invalid: above 2.0
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_search_results() {
        let mut config = Config::default();
        config.max_search_results = 0; // Invalid: must be at least 1
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serper_key_selects_serper() {
        let config = from_pairs(&[("SERPER_API_KEY", "abc")]).unwrap();
        assert_eq!(config.search_backend, SearchBackend::Serper);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_provider_overrides_key() {
        let config = from_pairs(&[
            ("SERPER_API_KEY", "abc"),
            ("SEARCH_PROVIDER", "duckduckgo"),
        ])
        .unwrap();
        assert_eq!(config.search_backend, SearchBackend::DuckDuckGo);
    }

    #[test]
    fn test_serper_without_key_is_invalid() {
        let config = from_pairs(&[("SEARCH_PROVIDER", "serper")]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("OLLAMA_MODEL", "qwen2.5"),
            ("REPORT_PROVIDER", "openai"),
            ("SEARCH_TIMEOUT_SECS", "5"),
            ("PARTIAL_REPORT_ON_ERROR", "true"),
            ("EVENT_BUFFER", "8"),
        ])
        .unwrap();
        assert_eq!(config.report_model, "qwen2.5");
        assert_eq!(config.report_backend, ReportBackend::OpenAi);
        assert_eq!(config.search_timeout, Duration::from_secs(5));
        assert!(config.partial_report_on_error);
        assert_eq!(config.event_buffer, 8);
    }

    #[test]
    fn test_report_model_wins_over_ollama_model() {
        let config =
            from_pairs(&[("OLLAMA_MODEL", "old"), ("REPORT_MODEL", "new")]).unwrap();
        assert_eq!(config.report_model, "new");
    }

    #[test]
    fn test_unparseable_values_are_errors() {
        assert!(from_pairs(&[("TEMPERATURE", "warm")]).is_err());
        assert!(from_pairs(&[("SEARCH_PROVIDER", "bing")]).is_err());
        assert!(from_pairs(&[("PARTIAL_REPORT_ON_ERROR", "maybe")]).is_err());
    }

    #[test]
    fn test_invalid_http_addr() {
        let mut config = Config::default();
        config.http_addr = "localhost".into();
        assert!(config.validate().is_err());
    }
}
