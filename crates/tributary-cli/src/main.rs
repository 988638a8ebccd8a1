use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "tributary")]
#[command(about = "Mirror GitHub installations and crawled sites into a local document store")]
#[command(version)]
struct Cli {
    /// Path to the mirror database
    #[arg(long, global = true, default_value = "tributary.db")]
    db: PathBuf,

    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect a GitHub installation (user or organization login)
    Add {
        installation: String,

        /// Destination data source identifier
        #[arg(long, default_value = "default")]
        data_source: String,
    },

    /// Connect a site for crawling
    AddSite {
        url: String,

        /// Destination data source identifier
        #[arg(long, default_value = "default")]
        data_source: String,
    },

    /// Run a full sync for a connector
    Sync {
        connector_id: i64,

        /// Resync code overviews only, skipping issues and discussions
        #[arg(long)]
        code_only: bool,
    },

    /// Crawl a site connector
    Crawl { connector_id: i64 },

    /// Garbage-collect a connector's mirror against upstream
    Gc { connector_id: i64 },

    /// Show a connector's sync status
    Status {
        connector_id: i64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List a crawled connector's folder/page tree
    Tree {
        connector_id: i64,

        /// Folder identifier to list; top level if omitted
        #[arg(long)]
        folder: Option<String>,
    },

    /// Remove a connector and everything mirrored under it
    Remove { connector_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let ctx = commands::Context::load(&cli.db, cli.config.as_deref()).await?;

    match cli.command {
        Commands::Add {
            installation,
            data_source,
        } => commands::add::run(&ctx, &installation, &data_source).await,
        Commands::AddSite { url, data_source } => {
            commands::add::run_site(&ctx, &url, &data_source).await
        }
        Commands::Sync {
            connector_id,
            code_only,
        } => commands::sync::run(&ctx, connector_id, code_only).await,
        Commands::Crawl { connector_id } => commands::crawl::run(&ctx, connector_id).await,
        Commands::Gc { connector_id } => commands::gc::run(&ctx, connector_id).await,
        Commands::Status { connector_id, json } => {
            commands::status::run(&ctx, connector_id, json).await
        }
        Commands::Tree {
            connector_id,
            folder,
        } => commands::tree::run(&ctx, connector_id, folder.as_deref()).await,
        Commands::Remove { connector_id } => commands::remove::run(&ctx, connector_id).await,
    }
}
