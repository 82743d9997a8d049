mod memory_cmds;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use engram_config::EngramConfig;
use engram_llm::FallbackLlmClient;
use engram_memory::index::NullIndex;
use engram_memory::llm_client::LlmClient;
use engram_memory::Orchestrator;

#[derive(Debug, Parser)]
#[command(
    name = "engram",
    version,
    about = "Local, file-backed long-term memory subsystem for conversational agents"
)]
struct Cli {
    /// Root directory holding this memory root's on-disk state.
    #[arg(long, global = true, default_value = ".engram")]
    memory_dir: PathBuf,

    /// Path to a TOML config file; falls back to defaults when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Item counts by status and category, extraction count, open-box state.
    Stats,
    /// Run the retrieval planner against a query and print the ranked items.
    Search {
        query: String,
        #[arg(short = 'n', long = "n", default_value_t = 10)]
        n: usize,
    },
    /// Print the durable behavioral-observation profile document.
    Profile,
    /// List known entities and their accumulated facts.
    Entities,
    /// Force the extraction/consolidation pipeline to run on the buffered window.
    Extract,
    /// List open questions the extraction pipeline has raised.
    Questions {
        /// Include resolved questions too (default: unresolved only).
        #[arg(short = 'a', long = "all")]
        all: bool,
    },
    /// Print the agent's IDENTITY self-reflection document.
    Identity,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from("engram.toml"));
    let config = EngramConfig::load_from(&config_path)?;

    let llm: Arc<dyn LlmClient> = Arc::new(FallbackLlmClient::new(
        &config.llm.fallback_chain,
        config.llm.max_retries,
        config.llm.cooldown_trip_after,
        config.llm.cooldown_seconds,
    ));

    let orchestrator = Orchestrator::open(&cli.memory_dir, config, llm, Arc::new(NullIndex))?;

    match cli.command {
        Commands::Stats => memory_cmds::run_stats(&orchestrator).await,
        Commands::Search { query, n } => memory_cmds::run_search(&orchestrator, &query, n).await,
        Commands::Profile => memory_cmds::run_profile(&orchestrator).await,
        Commands::Entities => memory_cmds::run_entities(&orchestrator).await,
        Commands::Extract => memory_cmds::run_extract(&orchestrator).await,
        Commands::Questions { all } => memory_cmds::run_questions(&orchestrator, all).await,
        Commands::Identity => memory_cmds::run_identity(&orchestrator).await,
    }
}
