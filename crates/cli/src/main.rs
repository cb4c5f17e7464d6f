//! TaskPilot CLI: run one request through the default agent.
//!
//! The request comes from `--message` or, when absent, one line of stdin.
//! The run summary is printed to stdout; logs go to stderr.

use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use taskpilot_agent::default_agent;
use taskpilot_config::{ApiType, AppConfig};
use taskpilot_core::event::EventBus;
use taskpilot_providers::GatewayRegistry;
use tracing::{info, warn};

mod logging;

#[derive(Parser)]
#[command(
    name = "taskpilot",
    about = "TaskPilot: autonomous task agent",
    version
)]
struct Cli {
    /// Configuration file (defaults to config/config.toml)
    #[arg(short, long, env = "TASKPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Run this request instead of reading one from stdin
    #[arg(short, long)]
    message: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn read_request() -> std::io::Result<String> {
    eprint!("Enter your prompt: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    }
    .map_err(|e| format!("Failed to load config: {e}"))?;
    logging::init(&config.logging, cli.verbose);

    if !config.has_api_key() && config.llm.api_type != ApiType::Ollama {
        warn!("No API key configured; set TASKPILOT_API_KEY or OPENAI_API_KEY, or add api_key to [llm]");
    }

    let request = match cli.message {
        Some(message) => message,
        None => read_request()?,
    };
    let request = request.trim();
    if request.is_empty() {
        warn!("Empty prompt provided.");
        return Ok(());
    }

    let events = EventBus::default();
    let gateways = GatewayRegistry::new(config.llm.clone()).with_events(events.clone());
    let mut agent = default_agent(&config, &gateways, events)?;

    info!(agent = %agent.name(), "Processing your request...");
    tokio::select! {
        result = agent.run(Some(request)) => {
            let summary = result?;
            println!("{summary}");
            info!("Request processing completed.");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Operation interrupted.");
        }
    }

    Ok(())
}
