//! # Orange CLI (`orange`)
//!
//! Command-line front end for the study assistant: register material, ask
//! grounded questions, generate quizzes and review notes, and run the
//! quality harness.
//!
//! ## Usage
//!
//! ```bash
//! orange --config ./config/orange.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `orange init` | Create the index and run migrations |
//! | `orange add <file>` | Register a text, PDF, or image file |
//! | `orange add-text "<text>"` | Register pasted text |
//! | `orange sources` | List registered sources |
//! | `orange remove <source>` | Delete one source's chunks |
//! | `orange clear` | Delete everything in the collection |
//! | `orange search "<query>"` | Show raw similarity hits |
//! | `orange ask "<query>"` | Answer a question from the material |
//! | `orange summarize <file>` | Summarize a document |
//! | `orange review` | Summarize all material as review notes |
//! | `orange quiz` | Generate a multiple-choice quiz |
//! | `orange test` | Run the canned-query harness |
//!
//! Logs go to stderr (`RUST_LOG` controls the filter); results go to stdout.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orange_rag::app::Services;
use orange_rag::classify::TaskHint;
use orange_rag::config::{self, Config};
use orange_rag::error::PipelineError;
use orange_rag::harness::default_test_cases;
use orange_rag::models::{ChunkMeta, SourceKind};
use orange_rag::pipeline::PipelineOutput;
use orange_rag::quiz::{self, Difficulty};

const MANUAL_SOURCE: &str = "직접입력";

/// Orange: ask questions about your study material.
#[derive(Parser)]
#[command(
    name = "orange",
    about = "Orange: a retrieval-augmented study assistant",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when it is missing.
    #[arg(long, global = true, default_value = "./config/orange.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index and run migrations. Safe to repeat.
    Init,

    /// Register a file: .txt/.md as text, .pdf with OCR fallback, images via OCR.
    Add {
        file: PathBuf,
        /// Skip OCR for PDF pages without a text layer.
        #[arg(long)]
        no_ocr: bool,
        /// Source name to record instead of the file name.
        #[arg(long)]
        name: Option<String>,
    },

    /// Register pasted text.
    AddText {
        text: String,
        #[arg(long)]
        title: Option<String>,
    },

    /// List registered sources and the chunk count.
    Sources,

    /// Delete every chunk from one source.
    Remove { source: String },

    /// Delete everything in the collection.
    Clear,

    /// Show the nearest chunks with similarity scores.
    Search {
        query: String,
        #[arg(long)]
        k: Option<usize>,
    },

    /// Answer a question from the registered material.
    Ask {
        query: String,
        /// auto, summarize, qa, concept, compare, or apply.
        #[arg(long, default_value = "auto")]
        task: String,
        #[arg(long)]
        k: Option<usize>,
        /// Print the answer as it is generated.
        #[arg(long)]
        stream: bool,
        /// Print the full output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Register a document temporarily and summarize it.
    Summarize { file: PathBuf },

    /// Summarize all registered material as review notes.
    Review,

    /// Generate a multiple-choice quiz from the material.
    Quiz {
        #[arg(long, default_value_t = 5)]
        num: usize,
        /// easy, normal, or hard.
        #[arg(long, default_value = "normal")]
        difficulty: String,
        #[arg(long)]
        json: bool,
    },

    /// Run the canned-query harness and print the summary.
    Test {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orange_rag=info,orange=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = load_or_default(&cli.config)?;
    let services = Services::from_config(&cfg).await?;
    let store = &services.store;
    let pipeline = &services.pipeline;

    match cli.command {
        Commands::Init => {
            println!("Index ready: {}", describe_index(&cfg));
        }
        Commands::Add { file, no_ocr, name } => {
            let kind = SourceKind::for_filename(&file_name(&file));
            let source = name.unwrap_or_else(|| file_name(&file));
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let ids = store.add_file(bytes, kind, &source, !no_ocr).await?;
            if ids.is_empty() {
                println!("No text found in {}; nothing added.", source);
            } else {
                println!("Added {} chunks from {}", ids.len(), source);
            }
        }
        Commands::AddText { text, title } => {
            let source = title.unwrap_or_else(|| MANUAL_SOURCE.to_string());
            let ids = store
                .add_document(&text, &ChunkMeta::new(&source, SourceKind::Manual))
                .await?;
            println!("Added {} chunks as {}", ids.len(), source);
        }
        Commands::Sources => {
            let stats = store.stats().await?;
            let sources = store.sources().await?;
            println!("{}: {} chunks", stats.name, stats.count);
            for source in sources {
                println!("  {}", source);
            }
        }
        Commands::Remove { source } => {
            let removed = store.delete_source(&source).await?;
            println!("Removed {} chunks from {}", removed, source);
        }
        Commands::Clear => {
            store.clear().await?;
            println!("Collection cleared.");
        }
        Commands::Search { query, k } => {
            let k = k.unwrap_or(cfg.retrieval.k);
            let hits = pipeline.retriever().search_with_score(&query, k).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} ({}, chunk {})",
                    i + 1,
                    hit.score,
                    hit.chunk.source,
                    hit.chunk.kind,
                    hit.chunk.chunk_index
                );
                println!("   {}", preview_line(&hit.chunk.content));
            }
        }
        Commands::Ask {
            query,
            task,
            k,
            stream,
            json,
        } => {
            let mut input = pipeline.input(query).with_task(task.parse::<TaskHint>()?);
            if let Some(k) = k {
                input = input.with_k(k);
            }
            tracing::debug!(input = ?input.to_summary(), "ask");

            let result = if stream && !json {
                let result = pipeline
                    .process_stream_with(input, |fragment| {
                        print!("{}", fragment);
                        let _ = std::io::stdout().flush();
                    })
                    .await;
                println!();
                result
            } else {
                pipeline.process(&input).await
            };
            let output = result.unwrap_or_else(|e| apologize(&e));
            print_output(&output, json, !stream)?;
        }
        Commands::Summarize { file } => {
            let source = file_name(&file);
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let text = store
                .extract_text(bytes, SourceKind::for_filename(&source), &source)
                .await?;
            let output = pipeline
                .summarize_document(&text, &source)
                .await
                .unwrap_or_else(|e| apologize(&e));
            print_output(&output, false, true)?;
        }
        Commands::Review => {
            let output = pipeline.review_summary().await.unwrap_or_else(|e| apologize(&e));
            print_output(&output, false, true)?;
        }
        Commands::Quiz {
            num,
            difficulty,
            json,
        } => {
            let difficulty: Difficulty = difficulty.parse()?;
            let questions = quiz::generate_quiz(pipeline, num, difficulty)
                .await
                .unwrap_or_else(|e| apologize(&e));
            if json {
                println!("{}", serde_json::to_string_pretty(&questions)?);
            } else {
                for (i, q) in questions.iter().enumerate() {
                    println!("Q{}. {}", i + 1, q.question);
                    for (j, option) in q.options.iter().enumerate() {
                        println!("   {}) {}", j + 1, option);
                    }
                    println!();
                }
            }
        }
        Commands::Test { json } => {
            pipeline.run_test(&default_test_cases()).await;
            match pipeline.test_summary() {
                Some(summary) if json => {
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                }
                Some(summary) => {
                    println!("Total:        {}", summary.total_tests);
                    println!("Successful:   {}", summary.successful);
                    println!("Failed:       {}", summary.failed);
                    println!("Success rate: {}%", summary.success_rate);
                    println!("Avg latency:  {}ms", summary.avg_response_time_ms);
                    println!("Avg relevance: {}", summary.avg_context_relevance);
                    for (task, stats) in &summary.by_task_type {
                        println!(
                            "  {}: {}/{} ok, avg {}ms",
                            task, stats.success, stats.count, stats.avg_time
                        );
                    }
                    for failed in pipeline.test_results().iter().filter(|r| !r.success) {
                        println!(
                            "  failed: {} ({})",
                            failed.query,
                            failed.error.as_deref().unwrap_or("")
                        );
                    }
                }
                None => println!("No test results."),
            }
        }
    }

    Ok(())
}

/// Load the config file when present, otherwise built-in defaults.
fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        return config::load_config(path);
    }
    tracing::debug!(path = %path.display(), "config file not found, using defaults");
    let mut cfg = Config::default();
    cfg.llm.apply_env_overrides();
    Ok(cfg)
}

fn describe_index(cfg: &Config) -> String {
    match cfg.index.backend.as_str() {
        "memory" => format!("in-memory collection '{}'", cfg.index.collection),
        _ => format!(
            "{} (collection '{}')",
            cfg.index.path.display(),
            cfg.index.collection
        ),
    }
}

fn print_output(output: &PipelineOutput, json: bool, print_response: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(output)?);
        return Ok(());
    }
    if print_response {
        println!("{}", output.response);
    }
    if !output.sources.is_empty() {
        println!();
        println!("Sources:");
        for citation in &output.sources {
            println!("  [{}] {} ({})", citation.index, citation.source, citation.kind);
        }
    }
    eprintln!(
        "{} | {} chunks | {}ms total ({}ms retrieval, {}ms generation)",
        output.task,
        output.metrics.context_chunks,
        output.metrics.total_time_ms,
        output.metrics.retrieval_time_ms,
        output.metrics.llm_time_ms
    );
    Ok(())
}

/// Report a generation failure and exit non-zero.
fn apologize(err: &PipelineError) -> ! {
    if err.is_retryable() {
        eprintln!("죄송합니다. 답변을 생성하지 못했어요. 잠시 후 다시 시도해주세요.");
    } else {
        eprintln!("죄송합니다. 요청을 처리하지 못했어요.");
    }
    eprintln!("({})", err);
    std::process::exit(1);
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn preview_line(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > 120 {
        format!("{}...", flat.chars().take(120).collect::<String>())
    } else {
        flat
    }
}
