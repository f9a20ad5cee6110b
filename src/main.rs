mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use tome::config::TomeConfig;
use tome::server;

#[derive(Parser)]
#[command(name = "tome", version, about = "Personal knowledge base with semantic search")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server
    Serve {
        /// Overrides `server.transport` from the config file
        #[arg(long, value_enum)]
        transport: Option<Transport>,
    },
    /// Rank records by meaning against a query
    Search {
        query: String,
        /// Number of results (defaults to `search.default_k`)
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// List records most similar to an existing record
    Similar {
        id: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Add a record
    Add {
        title: String,
        content: String,
        #[arg(long)]
        summary: Option<String>,
    },
    /// Rebuild the vector index from stored vectors
    Reindex {
        /// Recompute every vector with the configured model first
        #[arg(long)]
        re_embed: bool,
    },
    /// Check database, index and model health
    Doctor,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.tome/models/
    Download,
}

#[derive(Clone, Copy, ValueEnum)]
enum Transport {
    Stdio,
    Sse,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = TomeConfig::load()?;

    // stderr keeps stdout clean for MCP JSON-RPC
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { transport } => {
            let transport = match transport {
                Some(Transport::Stdio) => "stdio".to_string(),
                Some(Transport::Sse) => "sse".to_string(),
                None => config.server.transport.clone(),
            };
            match transport.as_str() {
                "sse" => server::serve_sse(config).await?,
                "stdio" => server::serve_stdio(config).await?,
                other => anyhow::bail!("unknown transport '{other}'. Supported: stdio, sse"),
            }
        }
        Command::Search { query, k } => cli::search::search(config, &query, k).await?,
        Command::Similar { id, k } => cli::similar::similar(config, &id, k).await?,
        Command::Add {
            title,
            content,
            summary,
        } => cli::add::add(config, title, content, summary).await?,
        Command::Reindex { re_embed } => cli::reindex::reindex(config, re_embed).await?,
        Command::Doctor => cli::doctor::doctor(config).await?,
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.embedding).await?;
            }
        },
    }

    Ok(())
}
