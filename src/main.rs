//! # AG-UI Research Agent
//!
//! A research agent that searches the web, writes a structured report with
//! a language model, and streams every step to the UI as AG-UI events.
//!
//! ## Quick Start
//! ```bash
//! # Serve the AG-UI endpoint on HTTP_ADDR (default 0.0.0.0:8000)
//! cargo run -- serve
//!
//! # Run one research task and print the event stream
//! cargo run -- research "What are the latest developments in Rust?"
//! ```

// =============================================================================
// IMPORTS
// =============================================================================
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ag_ui_research_agent::config::Config;
use ag_ui_research_agent::protocol::{Event, EventEncoder};
use ag_ui_research_agent::run::{ResearchService, RunRequest};
use ag_ui_research_agent::server;

// =============================================================================
// CLI ARGUMENTS
// =============================================================================
#[derive(Parser, Debug)]
#[command(
    name = "ai-research-agent",
    version,
    about = "A research agent that streams its progress over the AG-UI protocol",
    long_about = r#"
AG-UI Research Agent

Searches the web for a topic, organizes the sources, and writes a structured
report section by section. Every state change is streamed to the client as
an AG-UI event over Server-Sent Events.

PREREQUISITES (default local setup):
  1. Install Ollama: https://ollama.ai
  2. Pull a model: ollama pull llama3.2
  3. Start Ollama: ollama serve

Set SERPER_API_KEY to search with Google through Serper instead of DuckDuckGo.

EXAMPLES:
  # Serve POST /run on port 8000
  ai-research-agent serve

  # Print the SSE stream of one run
  ai-research-agent research "Climate change mitigation"

  # Print only the final report
  ai-research-agent research --report-only "Rust web frameworks"
"#
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// The model that writes the report (overrides REPORT_MODEL)
    #[arg(short = 'm', long = "model", global = true, help = "Model used for the report")]
    model: Option<String>,

    /// Verbose output (debug logging)
    #[arg(
        short = 'v',
        long = "verbose",
        global = true,
        help = "Enable verbose/debug logging",
        default_value = "false"
    )]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the AG-UI endpoint
    Serve {
        /// Listen address (overrides HTTP_ADDR)
        #[arg(long = "addr", value_name = "ADDR")]
        addr: Option<String>,
    },

    /// Run one research task from the command line
    Research {
        /// The topic to research
        #[arg(value_name = "QUERY")]
        query: String,

        /// Print only the report instead of the event stream
        #[arg(long = "report-only", default_value = "false")]
        report_only: bool,
    },
}

// =============================================================================
// MAIN FUNCTION
// =============================================================================
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose)?;

    info!("AG-UI Research Agent starting up...");

    // Load configuration from environment/.env file
    let mut config = Config::from_env()?;

    if let Some(model) = args.model {
        info!(model = %model, "Using model from command line");
        config.report_model = model;
    }
    if let Command::Serve {
        addr: Some(addr), ..
    } = &args.command
    {
        config.http_addr = addr.clone();
    }

    config.validate()?;

    info!(
        search = ?config.search_backend,
        report = ?config.report_backend,
        model = %config.report_model,
        "Configuration loaded"
    );

    let service = ResearchService::from_config(&config)?;

    match args.command {
        Command::Serve { .. } => server::serve(&config, service).await,
        Command::Research { query, report_only } => {
            research_once(&service, query, report_only).await
        }
    }
}

// =============================================================================
// ONE-SHOT RESEARCH
// =============================================================================
/// Run a single query, writing SSE frames (or just the report) to stdout
async fn research_once(service: &ResearchService, query: String, report_only: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    let mut handle = service.start_run(RunRequest::new(query), cancel.clone());

    // Ctrl-C stops the run at the next stage boundary
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let encoder = EventEncoder::new();
    let mut stdout = std::io::stdout();
    let mut failure = None;

    while let Some(event) = handle.events.recv().await {
        if report_only {
            if let Event::TextMessageContent { delta, .. } = &event {
                write!(stdout, "{delta}")?;
            }
        } else {
            stdout.write_all(&encoder.encode(&event)?)?;
        }
        stdout.flush()?;

        if let Event::RunError { message, code } = event {
            failure = Some((message, code));
        }
    }

    let summary = handle.task.await?;
    info!(?summary, "Research run ended");

    if let Some((message, code)) = failure {
        error!(code = ?code, "Research failed");
        eprintln!("\nResearch failed: {message}");
        if message.contains("connection refused") || message.contains("error sending request") {
            eprintln!("\nTip: Make sure Ollama is running:");
            eprintln!("   ollama serve");
        }
        anyhow::bail!("research failed: {message}");
    }

    Ok(())
}

// =============================================================================
// LOGGING INITIALIZATION
// =============================================================================
/// Initialize the tracing subscriber for structured logging.
///
/// RUST_LOG takes precedence; otherwise `--verbose` selects debug over info.
/// Logs go to stderr so stdout carries only the event stream.
fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true) // Show the module that logged
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
