use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use vitality_core::chat::{ChatManager, FixedHealthSummary};
use vitality_core::config::Config;
use vitality_core::extract::{DocumentFormat, TextExtractor};
use vitality_core::ingest::{Document, IngestOutcome, IngestionPipeline, MemoryDocumentStore};
use vitality_core::models::{self, ModelRole};
use vitality_core::rag::{create_vector_index, Embedder, MetadataFilter, Retriever, VectorIndex};
use vitality_core::{create_embedding_provider, create_language_model, Chunker};

#[derive(Parser)]
#[command(name = "vitality")]
#[command(about = "Index health documents and ask questions about them", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Model management commands")]
    Model {
        #[command(subcommand)]
        command: ModelCommands,
    },

    #[command(about = "Preview how a file would be chunked")]
    Chunk {
        file: PathBuf,

        #[arg(short, long, help = "Declared format (defaults to the file extension)")]
        format: Option<String>,
    },

    #[command(about = "Show extraction statistics for a file")]
    Stats {
        file: PathBuf,

        #[arg(short, long)]
        format: Option<String>,
    },

    #[command(about = "Extract, chunk, embed and index a file")]
    Ingest {
        file: PathBuf,

        #[arg(short, long)]
        user: String,

        #[arg(long, help = "Document id (defaults to the file name)")]
        id: Option<String>,

        #[arg(short, long)]
        format: Option<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        title: Option<String>,
    },

    #[command(about = "Ask a question about a user's documents")]
    Ask {
        question: String,

        #[arg(short, long)]
        user: String,

        #[arg(long, help = "Pre-formatted health metric summary to include")]
        health: Option<String>,
    },

    #[command(about = "Delete indexed vectors for a user or one of their documents")]
    Remove {
        #[arg(short, long)]
        user: String,

        #[arg(long)]
        document: Option<String>,
    },
}

#[derive(Subcommand)]
enum ModelCommands {
    #[command(about = "Show current models")]
    Show,

    #[command(about = "Set the answering model")]
    Set {
        #[arg(help = "Model name (e.g., 'llama3.2' or 'sonar-pro')")]
        model: String,
    },

    #[command(about = "List known chat and embedding models")]
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Show => show_config(&cli.config),
        Commands::Model { command } => match command {
            ModelCommands::Show => show_model(&cli.config),
            ModelCommands::Set { model } => set_model(&cli.config, &model),
            ModelCommands::List => list_models(),
        },
        Commands::Chunk { file, format } => preview_chunks(&cli.config, &file, format.as_deref()),
        Commands::Stats { file, format } => show_stats(&file, format.as_deref()),
        Commands::Ingest {
            file,
            user,
            id,
            format,
            category,
            title,
        } => {
            let options = IngestOptions {
                user,
                id,
                format,
                category,
                title,
            };
            ingest_file(&cli.config, &file, options).await
        }
        Commands::Ask {
            question,
            user,
            health,
        } => ask(&cli.config, &user, &question, health).await,
        Commands::Remove { user, document } => remove(&cli.config, &user, document.as_deref()).await,
    }
}

/// Loads the config file if present, applies environment overrides and validates.
fn load_config(config_path: &Path) -> Result<Config> {
    let mut config = if config_path.exists() {
        Config::load(config_path).context("Failed to load config")?
    } else {
        debug!(path = %config_path.display(), "Config file not found, using defaults");
        Config::default()
    };
    config.apply_env();
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn show_config(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    println!("{}", "Current Configuration:".bold().green());
    println!();
    println!("{}", "LLM:".bold());
    println!("  Provider:       {:?}", config.llm.provider);
    println!("  Model:          {}", config.llm.model.cyan());
    println!("  Base URL:       {}", config.llm.base_url);
    println!("  Temperature:    {}", config.llm.temperature);
    println!("  Max Tokens:     {}", config.llm.max_tokens);
    println!();
    println!("{}", "Embedding:".bold());
    println!("  Provider:       {:?}", config.embedding.provider);
    println!("  Model:          {}", config.embedding.model.cyan());
    match config.embedding_dimensions() {
        Some(dims) => println!("  Dimensions:     {}", dims),
        None => println!("  Dimensions:     {}", "unknown".yellow()),
    }
    println!();
    println!("{}", "RAG:".bold());
    println!("  Chunk Size:     {}", config.rag.chunk_size);
    println!("  Chunk Overlap:  {}", config.rag.chunk_overlap);
    println!("  Top K:          {}", config.rag.top_k);
    println!("  Context Bytes:  {}", config.rag.max_context_bytes);
    println!();
    println!("{}", "Storage:".bold());
    println!("  Mode:           {:?}", config.storage.storage_mode);
    println!("  Collection:     {}", config.storage.collection_name);

    Ok(())
}

fn show_model(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    println!("{}: {}", "Answering model".bold(), config.llm.model.cyan());
    if let Some(model) = models::lookup(&config.llm.model) {
        println!("  {}", model.description.dimmed());
    }
    println!("{}: {}", "Embedding model".bold(), config.embedding.model.cyan());
    if let Some(model) = models::lookup(&config.embedding.model) {
        println!("  {}", model.description.dimmed());
    }
    Ok(())
}

fn set_model(config_path: &Path, model: &str) -> Result<()> {
    let content = std::fs::read_to_string(config_path)
        .context("Failed to read config file")?;

    let mut config: serde_yaml::Value = serde_yaml::from_str(&content)
        .context("Failed to parse config")?;

    let llm_map = config
        .get_mut("llm")
        .and_then(|llm| llm.as_mapping_mut())
        .context("Config has no 'llm' section")?;
    llm_map.insert(
        serde_yaml::Value::String("model".to_string()),
        serde_yaml::Value::String(model.to_string()),
    );

    let updated_content = serde_yaml::to_string(&config)
        .context("Failed to serialize config")?;

    // refuse to write a file that would no longer load
    Config::from_yaml(&updated_content).context("Updated config is invalid")?;

    std::fs::write(config_path, updated_content)
        .context("Failed to write config file")?;

    println!(
        "{} Model updated to: {}",
        "✓".green().bold(),
        model.cyan()
    );

    Ok(())
}

fn list_models() -> Result<()> {
    let known = models::known_models();

    println!("{}", "Chat models:".bold().green());
    for model in known {
        if let ModelRole::Chat { context_tokens } = model.role {
            println!("  {} {} ({} tokens)", "•".cyan(), model.id.bold(), context_tokens);
        }
    }
    println!();
    println!("{}", "Embedding models:".bold().green());
    for model in known {
        if let ModelRole::Embedding { dimensions } = model.role {
            println!("  {} {} ({} dimensions)", "•".cyan(), model.id.bold(), dimensions);
        }
    }
    println!();
    println!("Use {} to set a model", "vitality -c config.yaml model set <model>".bold());

    Ok(())
}

fn read_document(file: &Path, format: Option<&str>) -> Result<(Vec<u8>, DocumentFormat)> {
    let bytes = std::fs::read(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let format = match format {
        Some(declared) => declared.parse()?,
        None => DocumentFormat::from_file_name(&file.to_string_lossy())?,
    };
    Ok((bytes, format))
}

fn preview_chunks(config_path: &Path, file: &Path, format: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let (bytes, format) = read_document(file, format)?;

    let text = TextExtractor::new().extract(&bytes, format)?;
    let chunker = Chunker::from_config(&config.rag)?;
    let chunks = chunker.chunk(&text);

    println!(
        "{} {} chunks (size {}, overlap {})",
        "→".blue(),
        chunks.len().to_string().bold(),
        chunker.max_size(),
        chunker.overlap()
    );
    for (i, chunk) in chunks.iter().enumerate() {
        println!();
        println!("{}", format!("#{} ({} chars)", i, chunk.chars().count()).bold());
        println!("{}", chunk);
    }

    Ok(())
}

fn show_stats(file: &Path, format: Option<&str>) -> Result<()> {
    let (bytes, format) = read_document(file, format)?;
    let stats = TextExtractor::new().extract_metadata(&bytes, format);

    let show = |value: Option<usize>| value.map_or_else(|| "-".dimmed().to_string(), |v| v.to_string());

    println!("{}", "Document Statistics:".bold().green());
    println!("  File Type:      {}", stats.file_type.cyan());
    println!("  File Size:      {} bytes", stats.file_size);
    println!("  Characters:     {}", show(stats.character_count));
    println!("  Words:          {}", show(stats.word_count));
    println!("  Lines:          {}", show(stats.line_count));
    if format.is_paginated() {
        println!("  Pages:          {}", show(stats.page_count));
    }

    Ok(())
}

/// Builds the configured index without connecting to it.
fn build_index(config: &Config) -> Result<Arc<dyn VectorIndex>> {
    let dimensions = config
        .index_dimensions()
        .context("Index dimensionality unknown; set storage.dimensions or embedding.dimensions")?;
    Ok(create_vector_index(&config.storage, dimensions))
}

/// Builds the dimension-checked embedder and the configured index.
fn build_retrieval(config: &Config) -> Result<(Embedder, Arc<dyn VectorIndex>)> {
    let index = build_index(config)?;
    let provider = create_embedding_provider(config)?;
    let embedder = Embedder::new(provider, index.dimensions())?;
    Ok((embedder, index))
}

/// Cancelled on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Cancelling...".yellow());
            child.cancel();
        }
    });
    token
}

struct IngestOptions {
    user: String,
    id: Option<String>,
    format: Option<String>,
    category: Option<String>,
    title: Option<String>,
}

async fn ingest_file(config_path: &Path, file: &Path, options: IngestOptions) -> Result<()> {
    let config = load_config(config_path)?;
    let (bytes, format) = read_document(file, options.format.as_deref())?;

    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .context("Path has no file name")?;
    let mut document = Document::new(
        options.id.unwrap_or_else(|| file_name.clone()),
        &options.user,
        &file_name,
        format.as_str(),
    );
    if let Some(category) = options.category {
        document = document.with_category(category);
    }
    if let Some(title) = options.title {
        document = document.with_title(title);
    }
    let document_id = document.id.clone();

    let store = Arc::new(MemoryDocumentStore::new());
    store.insert(document, bytes).await;

    let (embedder, index) = build_retrieval(&config)?;
    let pipeline = IngestionPipeline::new(store, Chunker::from_config(&config.rag)?, embedder, index)?
        .with_config(&config.ingest);

    println!("{} Ingesting {}...", "→".blue(), file.display());
    match pipeline.ingest_document(&document_id, &shutdown_token()).await {
        Ok(IngestOutcome::Indexed { chunks, stats }) => {
            println!(
                "{} Indexed {} as {} ({} chunks, {} words)",
                "✓".green().bold(),
                file_name.cyan(),
                document_id.bold(),
                chunks,
                stats.word_count.unwrap_or_default()
            );
            Ok(())
        }
        Ok(IngestOutcome::AlreadyIndexed { chunks }) => {
            println!("{} Already indexed ({} chunks)", "✓".green().bold(), chunks);
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "✗".red().bold(), e.user_message());
            Err(e.into())
        }
    }
}

async fn ask(config_path: &Path, user: &str, question: &str, health: Option<String>) -> Result<()> {
    let config = load_config(config_path)?;
    let (embedder, index) = build_retrieval(&config)?;
    let retriever = Retriever::new(embedder, index, config.rag.max_context_bytes)?;
    let llm = create_language_model(&config)?;

    let mut manager = ChatManager::from_config(&config, retriever, llm);
    if let Some(summary) = health {
        manager = manager.with_health_source(Arc::new(FixedHealthSummary(summary)));
    }

    match manager.answer(user, question).await {
        Ok(answer) => {
            println!("{}", answer.answer);
            if !answer.sources.is_empty() {
                println!();
                println!("{}", "Sources:".bold());
                for (i, source) in answer.sources.iter().enumerate() {
                    println!(
                        "  [{}] {} ({:.3})",
                        i + 1,
                        source.chunk_id.cyan(),
                        source.score
                    );
                }
            }
            println!();
            println!("{}", format!("{} tokens", answer.tokens_used).dimmed());
            Ok(())
        }
        Err(e) => {
            println!("{}", e.user_message().red());
            Err(e.into())
        }
    }
}

async fn remove(config_path: &Path, user: &str, document: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let index = build_index(&config)?;
    let removed = remove_vectors(index.as_ref(), user, document).await?;
    println!("{} Removed {} vectors", "✓".green().bold(), removed);
    Ok(())
}

/// Deletes a user's vectors, or only one document's, and returns how many
/// matched. Needs no embedding provider.
async fn remove_vectors(index: &dyn VectorIndex, user: &str, document: Option<&str>) -> Result<usize> {
    let filter = match document {
        Some(document_id) => MetadataFilter::for_owner(user).with_document(document_id),
        None => MetadataFilter::for_owner(user),
    };
    let matched = index.count(&filter).await?;
    index.delete_by_filter(&filter).await?;
    debug!(user, document, matched, "Removed vectors");
    Ok(matched)
}
