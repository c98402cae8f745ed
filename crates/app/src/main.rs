use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::PathBuf;
use study_rag_core::{
    ingest_all_pdfs, retrieve_with_citations, CharacterNgramEmbedder, CorruptPolicy,
    IngestionOptions, OllamaEmbedder, VectorIndex, DEFAULT_OLLAMA_MODEL, DEFAULT_TOP_K,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "study-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the persistent vector index
    #[arg(long, env = "STUDY_RAG_INDEX_DIR", default_value = "storage/vector_index")]
    index_dir: PathBuf,

    /// Embedding backend used for both indexing and queries
    #[arg(long, value_enum, env = "STUDY_RAG_EMBEDDER", default_value_t = EmbedderKind::Ngram)]
    embedder: EmbedderKind,

    /// Ollama base URL
    #[arg(long, env = "STUDY_RAG_EMBED_URL", default_value = "http://localhost:11434")]
    embed_url: String,

    /// Ollama embedding model
    #[arg(long, env = "STUDY_RAG_EMBED_MODEL", default_value = DEFAULT_OLLAMA_MODEL)]
    embed_model: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmbedderKind {
    /// Offline hashed character trigrams
    Ngram,
    /// Remote Ollama embeddings endpoint
    Ollama,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every PDF in the staging folder into the vector index.
    Ingest {
        /// Folder with staged PDFs (not searched recursively).
        #[arg(long, env = "STUDY_RAG_STAGING_DIR", default_value = "storage/uploads")]
        staging_dir: PathBuf,
        /// Target passage length in characters.
        #[arg(long, default_value = "900")]
        chunk_size: usize,
        /// Characters shared between neighbouring passages.
        #[arg(long, default_value = "150")]
        chunk_overlap: usize,
        /// Record unreadable PDFs and keep going instead of aborting.
        #[arg(long, default_value_t = false)]
        skip_corrupt: bool,
        /// Skip passages already present in the index.
        #[arg(long, default_value_t = false)]
        dedupe: bool,
    },
    /// Retrieve cited context for a question.
    Retrieve {
        /// Question or topic
        #[arg(long)]
        query: String,
        /// Number of passages to return.
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        /// Print `{context, citations}` as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show what the index holds.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "study-rag boot"
    );

    // the index and the blocking embedding client stay off the async workers
    tokio::task::spawn_blocking(move || run(cli))
        .await
        .context("worker thread panicked")?
}

fn open_index(cli: &Cli) -> anyhow::Result<VectorIndex> {
    let index = match cli.embedder {
        EmbedderKind::Ngram => {
            VectorIndex::open(&cli.index_dir, CharacterNgramEmbedder::default())?
        }
        EmbedderKind::Ollama => VectorIndex::open(
            &cli.index_dir,
            OllamaEmbedder::new(&cli.embed_url, cli.embed_model.clone())?,
        )?,
    };
    Ok(index)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let index = open_index(&cli)?;

    match cli.command {
        Command::Ingest {
            staging_dir,
            chunk_size,
            chunk_overlap,
            skip_corrupt,
            dedupe,
        } => {
            let options = IngestionOptions {
                chunk_size,
                chunk_overlap,
                on_corrupt: if skip_corrupt {
                    CorruptPolicy::Skip
                } else {
                    CorruptPolicy::Abort
                },
                deduplicate: dedupe,
            };

            let summary = ingest_all_pdfs(&index, &staging_dir, options)?;
            if !summary.skipped_files.is_empty() {
                warn!(
                    "skipped_files={} for staging_dir={}",
                    summary.skipped_files.len(),
                    staging_dir.display()
                );
            }
            info!(
                staging_dir = %staging_dir.display(),
                pdf_count = summary.pdf_count,
                chunks_added = summary.chunks_added,
                "ingestion finished"
            );

            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Retrieve { query, top_k, json } => {
            let result = retrieve_with_citations(&index, &query, top_k)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.is_empty() {
                println!("no passages indexed yet; stage PDFs and run `ingest` first");
            } else {
                println!("{}", result.context);
                println!();
                for (rank, citation) in result.citations.iter().enumerate() {
                    println!(
                        "[{}] {} p.{}: {}",
                        rank + 1,
                        citation.source,
                        citation.page,
                        citation.snippet
                    );
                }
            }
        }
        Command::Stats => {
            let stats = json!({
                "path": index.path().display().to_string(),
                "model": index.model_name(),
                "entries": index.len(),
                "dimensions": index.dimensions(),
            });
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
