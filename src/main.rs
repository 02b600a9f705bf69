//! # RAG Harness CLI (`rag`)
//!
//! The `rag` binary manages the index and runs the chat pipeline from the
//! command line, or starts the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag init` | Create the SQLite database and run schema migrations |
//! | `rag ingest <paths..>` | Ingest files or directory trees |
//! | `rag files` | List indexed files, most recent first |
//! | `rag delete <fingerprint>` | Remove a file from the index |
//! | `rag chat "<question>"` | Ask a question within a session |
//! | `rag serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! rag init --config ./config/rag.toml
//! rag ingest ./docs
//! rag chat "What is the refund policy?" --session s1
//! rag chat "And for international orders?" --session s1 --stream
//! rag serve
//! ```

use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rag_harness::app::App;
use rag_harness::config::{self, Config};
use rag_harness::embedding::DisabledEmbedder;
use rag_harness::index::IndexManager;
use rag_harness::store::SqliteStore;
use rag_harness::{db, logging, migrate, server};

/// RAG Harness CLI: idempotent document ingestion and session-aware
/// question answering over the indexed documents.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "RAG Harness: ingest documents and answer questions over them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Ingest files or directories (walked recursively).
    ///
    /// Re-ingesting unchanged content replaces the previous entries
    /// instead of duplicating them.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// List indexed files, most recent upload first.
    Files,

    /// Remove a file's index entries and ledger row.
    Delete { fingerprint: String },

    /// Ask a question.
    Chat {
        query: String,

        /// Conversation session id.
        #[arg(long, default_value = "default_session")]
        session: String,

        /// Print the answer as it is generated.
        #[arg(long)]
        stream: bool,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let _log_guard = logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { paths } => run_ingest(&cfg, &paths).await?,
        Commands::Files => run_files(&cfg).await?,
        Commands::Delete { fingerprint } => run_delete(&cfg, &fingerprint).await?,
        Commands::Chat {
            query,
            session,
            stream,
        } => run_chat(&cfg, &query, &session, stream).await?,
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}

/// Ledger-only access; no model credentials required.
async fn open_index(cfg: &Config) -> anyhow::Result<IndexManager> {
    let pool = db::connect(cfg).await?;
    migrate::migrate_pool(&pool).await?;
    Ok(IndexManager::new(
        Arc::new(SqliteStore::new(pool)),
        Arc::new(DisabledEmbedder),
        cfg.retrieval.batch_size,
    ))
}

async fn run_ingest(cfg: &Config, paths: &[PathBuf]) -> anyhow::Result<()> {
    let app = App::open(cfg).await?;
    let mut failed = 0usize;

    for path in paths {
        let report = app.ingestor.ingest_path(path).await;
        for done in &report.ingested {
            let note = if done.replaced { " (replaced)" } else { "" };
            println!(
                "  {}  {}  {} chunks{}",
                &done.fingerprint[..12],
                done.file_name,
                done.chunk_count,
                note
            );
        }
        for fail in &report.failed {
            println!("  FAILED  {}  [{}] {}", fail.path, fail.code, fail.message);
        }
        println!(
            "ingest {}: {} ingested, {} failed, {} skipped",
            path.display(),
            report.ingested.len(),
            report.failed.len(),
            report.skipped
        );
        failed += report.failed.len();
    }

    if failed > 0 {
        anyhow::bail!("{} file(s) failed to ingest", failed);
    }
    println!("ok");
    Ok(())
}

async fn run_files(cfg: &Config) -> anyhow::Result<()> {
    let index = open_index(cfg).await?;
    let files = index.list_files().await?;

    if files.is_empty() {
        println!("No files indexed.");
        return Ok(());
    }
    for f in files {
        println!(
            "{}  {}  {:>5} chunks  {}",
            f.fingerprint,
            f.upload_time.format("%Y-%m-%d %H:%M:%S"),
            f.chunk_count,
            f.file_name
        );
    }
    Ok(())
}

async fn run_delete(cfg: &Config, fingerprint: &str) -> anyhow::Result<()> {
    let index = open_index(cfg).await?;
    if !index.delete(fingerprint).await? {
        anyhow::bail!("no file with fingerprint {}", fingerprint);
    }
    println!("Deleted {}", fingerprint);
    Ok(())
}

async fn run_chat(cfg: &Config, query: &str, session: &str, stream: bool) -> anyhow::Result<()> {
    let app = App::open(cfg).await?;

    let sources = if stream {
        let started = app.pipeline.chat_stream(session, query).await?;
        let mut tokens = started.tokens;
        let mut stdout = std::io::stdout();
        while let Some(token) = tokens.next().await {
            write!(stdout, "{}", token?)?;
            stdout.flush()?;
        }
        println!();
        started.sources
    } else {
        let limit = Duration::from_secs(cfg.server.chat_timeout_secs);
        let answer = app.pipeline.chat_with_timeout(session, query, limit).await?;
        if answer.standalone_question != query {
            println!("(searched for: {})\n", answer.standalone_question);
        }
        println!("{}", answer.answer);
        answer.sources
    };

    if !sources.is_empty() {
        println!("\nSources:");
        for s in sources {
            println!("  [{}] {}", s.index, s.file_name);
        }
    }
    Ok(())
}
