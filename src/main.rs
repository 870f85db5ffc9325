//! # Campus Assist CLI (`campus`)
//!
//! ```bash
//! campus --config ./config/campus.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `campus init` | Create the SQLite database and schema |
//! | `campus seed` | Load the bundled starter knowledge base |
//! | `campus add` | Contribute a question/answer pair |
//! | `campus search "<query>"` | Search the knowledge base |
//! | `campus embed pending` | Embed entries missing a vector |
//! | `campus embed rebuild` | Re-embed every entry |
//! | `campus serve` | Start the HTTP server and web UI |

use campus_assist::models::{ContributionRequest, TagsInput};
use campus_assist::{config, embed_cmd, knowledge, migrate, search, seed, server};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Campus Assist: a college chat assistant backed by a community knowledge base.
#[derive(Parser)]
#[command(name = "campus", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/campus.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Load the bundled starter entries (upsert by id).
    Seed,

    /// Contribute a question/answer pair.
    Add {
        #[arg(long)]
        question: String,

        #[arg(long)]
        answer: String,

        /// Comma-separated tags.
        #[arg(long)]
        tags: Option<String>,

        #[arg(long)]
        author: Option<String>,
    },

    /// Search the knowledge base. An empty query lists the newest entries.
    Search {
        query: String,

        /// Maximum number of results to print.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Start the HTTP server.
    Serve,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed entries whose vector is missing or stale.
    Pending {
        /// Maximum number of entries to embed in this run.
        #[arg(long)]
        limit: Option<i64>,

        /// Show counts without embedding anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Clear all vectors and embed every entry again.
    Rebuild,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the API key may come from the real environment.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Seed => {
            seed::run_seed(&cfg).await?;
        }
        Commands::Add {
            question,
            answer,
            tags,
            author,
        } => {
            let request = ContributionRequest {
                question: Some(question),
                answer: Some(answer),
                tags: tags.map(TagsInput::Csv),
                author,
            };
            knowledge::run_add(&cfg, request).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending { limit, dry_run } => {
                embed_cmd::run_embed_pending(&cfg, limit, dry_run).await?;
            }
            EmbedAction::Rebuild => {
                embed_cmd::run_embed_rebuild(&cfg).await?;
            }
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
