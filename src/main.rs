//! cricket-chat: HTTP server and knowledge-base loader.
//!
//! ```bash
//! # Serve the API
//! cricket-chat serve
//!
//! # Load documents into the knowledge base
//! cricket-chat ingest rules.md players.pdf
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cricket_chat::commands::knowledge::ingest_file;
use cricket_chat::{AppState, Config};

#[derive(Parser)]
#[command(name = "cricket-chat")]
#[command(about = "Cricket question-answering chatbot backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,

    /// Chunk, embed and store documents
    Ingest {
        /// .txt, .md or .pdf files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    cricket_chat::init_tracing(&config);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => cricket_chat::start_server(config).await?,

        Commands::Ingest { files } => {
            let state = AppState::from_config(config)?;
            let upstream_timeout = state.config.upstream_timeout();
            let mut failed = 0usize;
            for path in &files {
                match ingest_file(&state.db, state.embedder.as_ref(), path, upstream_timeout).await {
                    Ok(documents) => {
                        println!("{}: stored {} chunks", path.display(), documents.len());
                    }
                    Err(e) => {
                        failed += 1;
                        eprintln!("{}: {e}", path.display());
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} of {} files failed to ingest", files.len());
            }
        }
    }

    Ok(())
}
