//! `saloon`: write a book with a team of negotiating agents.
//!
//! ## Commands
//!
//! - `create`: negotiate title, outline and every section of a new book
//! - `continue`: generate the missing (or selected) sections of a saved book
//! - `export`: render a saved book as Markdown and/or plain text
//! - `list`, `agents`, `config`: inspect books, the team and the configuration

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use saloon_agents::archive::TranscriptArchive;
use saloon_agents::book::Book;
use saloon_agents::config::{roles_for, JudgeKind, SaloonConfig};
use saloon_agents::generators::{build_coordinator, BookPipeline, GenerateError, SectionTally};
use saloon_agents::irc_log::IrcLog;
use saloon_agents::prompts::persona_for;
use saloon_agents::providers::{http_client, provider_for, ModelJudge, ProviderRouter};
use saloon_agents::store::{BookStore, ExportFormat};
use saloon_coordination::negotiation::ConsensusStrategy;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "saloon", version, about = "Collaborative book writing with negotiating agents", long_about = None)]
struct Cli {
    /// Configuration file (default: ./saloon.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable coloured conversation output
    #[arg(long, global = true)]
    no_color: bool,

    /// Do not write the conversation log file
    #[arg(long, global = true)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new book about a topic
    Create {
        topic: String,

        /// Use this title instead of negotiating one
        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        min_chapters: Option<u32>,

        #[arg(long)]
        max_chapters: Option<u32>,

        #[arg(long)]
        min_words: Option<u32>,

        #[arg(long)]
        max_words: Option<u32>,

        /// Agents to seat, e.g. zero,gustave,camille (default: all configured)
        #[arg(long, value_delimiter = ',')]
        agents: Vec<String>,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Generate missing sections of a saved book
    Continue {
        book_id: String,

        /// Only these section ids, e.g. 1.1,2.3
        #[arg(long, value_delimiter = ',')]
        sections: Vec<String>,
    },

    /// Export a saved book
    Export {
        book_id: String,

        /// markdown, text or all
        #[arg(long, default_value = "all")]
        format: ExportFormat,
    },

    /// List saved books
    List,

    /// Show the configured agents
    Agents,

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();

    let mut config = SaloonConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Create {
            ref topic,
            ref title,
            min_chapters,
            max_chapters,
            min_words,
            max_words,
            ref agents,
            ref output_dir,
        } => {
            if let Some(n) = min_chapters {
                config.toc.min_chapters = n;
            }
            if let Some(n) = max_chapters {
                config.toc.max_chapters = n;
            }
            if let Some(n) = min_words {
                config.section.min_words = n;
            }
            if let Some(n) = max_words {
                config.section.max_words = n;
            }
            if let Some(dir) = output_dir {
                config.output_dir = dir.clone();
            }
            config.agents = config.select_agents(agents).map_err(anyhow::Error::msg)?;
            config.validate().map_err(anyhow::Error::msg)?;

            let store = BookStore::new(&config.output_dir);
            let mut book = Book::new(topic.as_str());
            store
                .save(&book)
                .with_context(|| format!("Failed to create book {}", book.id))?;
            info!(book = %book.id, topic = %book.topic, "Creating book");

            let log = open_log(&config, &cli)?;
            let pipeline = pipeline(&config, &store, &book, log.clone())?;
            let result = pipeline.create_book(&mut book, title.clone(), &store).await;
            finish(&store, &book, result, &log)?;
        }
        Commands::Continue {
            ref book_id,
            ref sections,
        } => {
            let store = BookStore::new(&config.output_dir);
            let mut book = store
                .load(book_id)
                .with_context(|| format!("Failed to load book {}", book_id))?;
            info!(book = %book.id, sections = sections.len(), "Continuing book");

            let log = open_log(&config, &cli)?;
            let pipeline = pipeline(&config, &store, &book, log.clone())?;
            let result = if book.sections.is_empty() {
                let title = book.title.clone();
                pipeline.create_book(&mut book, title, &store).await
            } else {
                pipeline.write_sections(&mut book, sections, &store).await
            };
            finish(&store, &book, result, &log)?;
        }
        Commands::Export {
            ref book_id,
            format,
        } => {
            let store = BookStore::new(&config.output_dir);
            let book = store
                .load(book_id)
                .with_context(|| format!("Failed to load book {}", book_id))?;
            for path in store.export(&book, format)? {
                println!("{}", path.display());
            }
        }
        Commands::List => {
            let store = BookStore::new(&config.output_dir);
            let books = store.list()?;
            if books.is_empty() {
                println!("No books in {}", store.root().display());
            }
            for book in books {
                println!(
                    "{:<45} {:<10} {:>3}/{:<3} {}",
                    book.id, book.status, book.written, book.total, book.title
                );
            }
        }
        Commands::Agents => {
            for agent in &config.agents {
                let persona = persona_for(&agent.name, agent.role);
                let model = agent
                    .model
                    .clone()
                    .unwrap_or_else(|| config.providers.get(agent.provider).model.clone());
                println!(
                    "{:<10} {:<9} {}: {}",
                    agent.name,
                    agent.role.to_string(),
                    format!("{}/{}", agent.provider, model),
                    persona.description
                );
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

fn open_log(config: &SaloonConfig, cli: &Cli) -> Result<Arc<IrcLog>> {
    let log = IrcLog::stdout(config.logging.use_colors && !cli.no_color);
    let log = if config.logging.log_to_file && !cli.no_log_file {
        log.with_log_dir(&config.logging.log_dir)?
    } else {
        log
    };
    if let Some(path) = log.file_path() {
        info!(path = %path.display(), "Conversation log opened");
    }
    Ok(Arc::new(log))
}

/// Wire providers, judge, coordinator and shutdown handling for one book.
fn pipeline(
    config: &SaloonConfig,
    store: &BookStore,
    book: &Book,
    log: Arc<IrcLog>,
) -> Result<BookPipeline> {
    let http = http_client()?;
    let client = Arc::new(ProviderRouter::from_config(config, &http, &config.agents));
    let judge: Option<Arc<dyn ConsensusStrategy>> = match config.negotiation.judge {
        JudgeKind::Jaccard => None,
        JudgeKind::Model => Some(Arc::new(ModelJudge::new(provider_for(
            config,
            &http,
            config.negotiation.judge_provider,
            None,
        )))),
    };
    let coordinator = build_coordinator(config, client, judge, Some(log.clone()));

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling running sessions");
            on_signal.cancel();
        }
    });

    Ok(BookPipeline::new(coordinator, roles_for(&config.agents), config)
        .with_shutdown(shutdown)
        .with_archive(TranscriptArchive::new(&store.book_dir(&book.id)))
        .with_log(log))
}

fn finish(
    store: &BookStore,
    book: &Book,
    result: Result<SectionTally, GenerateError>,
    log: &IrcLog,
) -> Result<()> {
    let outcome = match result {
        Ok(tally) => {
            let (written, total) = book.progress();
            let message = format!(
                "{}: {}/{} sections written ({} converged, {} forced, {} failed, {} cancelled), {} words",
                book.display_title(),
                written,
                total,
                tally.converged,
                tally.forced,
                tally.failed,
                tally.cancelled,
                book.total_words()
            );
            if tally.failed + tally.cancelled > 0 {
                log.warning(&message);
                log.warning(&format!("Resume with: saloon continue {}", book.id));
            } else {
                log.success(&message);
            }
            store
                .export(book, ExportFormat::All)
                .map(|paths| {
                    for path in &paths {
                        log.system(&format!("Exported {}", path.display()));
                    }
                })
                .with_context(|| format!("Failed to export book {}", book.id))
        }
        Err(e) => {
            log.error(&format!("Book {} stopped: {}", book.id, e));
            Err(anyhow::Error::new(e).context(format!("Failed to write book {}", book.id)))
        }
    };
    log.close();
    outcome
}
