//! Book pipeline end to end: scripted providers behind the role router,
//! real coordinator, book store and transcript archive on a temp directory.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use saloon_agents::archive::TranscriptArchive;
use saloon_agents::book::{Book, BookStatus};
use saloon_agents::config::{roles_for, SaloonConfig};
use saloon_agents::generators::{build_coordinator, BookPipeline, GenerateError};
use saloon_agents::providers::{ChatProvider, ProviderRouter};
use saloon_agents::store::BookStore;
use saloon_coordination::negotiation::{AgentError, ContentKind, Role, SessionStatus};

const TOC_JSON: &str = r#"[
  {"title": "Currents", "sections": [{"title": "Gulf Stream"}, {"title": "Kuroshio"}]},
  {"title": "Tides", "sections": [{"title": "Moon"}, {"title": "Sun"}]}
]"#;

/// Answers by content kind, recognised from the task line of the user prompt.
struct Scripted {
    toc: &'static str,
    calls: AtomicU32,
}

impl Scripted {
    fn new(toc: &'static str) -> Arc<Self> {
        Arc::new(Self {
            toc,
            calls: AtomicU32::new(0),
        })
    }
}

fn reply_for(user: &str, toc: &str) -> String {
    if user.contains("title for a book about") {
        "<zero>Love it!</zero>\n<content>Book Title: Salt and Iron</content>\nConsensus: True".into()
    } else if user.contains("table of contents") {
        format!("<content>{}</content>\nConsensus: True", toc)
    } else {
        "<content>Tides move the ocean in slow patient rhythms every single day.</content>\nConsensus: True"
            .into()
    }
}

#[async_trait]
impl ChatProvider for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "script-1"
    }

    async fn complete(&self, _system: &str, user: &str) -> Result<String, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(reply_for(user, self.toc))
    }
}

/// Fails its first `failures_left` calls with a transient error.
struct Flaky {
    failures_left: AtomicU32,
}

#[async_trait]
impl ChatProvider for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn model(&self) -> &str {
        "flaky-1"
    }

    async fn complete(&self, _system: &str, user: &str) -> Result<String, AgentError> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AgentError::Transient("connection reset".into()));
        }
        Ok(reply_for(user, TOC_JSON))
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("saloon_agents=debug,saloon_coordination=info")
        .with_test_writer()
        .try_init();
}

fn test_config() -> SaloonConfig {
    let mut config = SaloonConfig::default();
    config.title.max_rounds = 3;
    config.toc.max_rounds = 3;
    config.toc.min_chapters = 2;
    config.toc.max_chapters = 4;
    config.section.max_rounds = 3;
    config.section.min_words = 5;
    config.section.max_words = 200;
    config.max_concurrency = 2;
    config
}

fn pipeline_with(config: &SaloonConfig, provider: Arc<dyn ChatProvider>) -> BookPipeline {
    let router = [Role::Creative, Role::Reviewer, Role::Editor]
        .into_iter()
        .fold(ProviderRouter::new(), |router, role| {
            router.with_member(role, provider.clone())
        });
    let coordinator = build_coordinator(config, Arc::new(router), None, None);
    BookPipeline::new(coordinator, roles_for(&config.agents), config)
}

#[tokio::test(start_paused = true)]
async fn test_create_book_end_to_end() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config();
    let store = BookStore::new(dir.path());
    let mut book = Book::new("ocean currents");
    let archive = TranscriptArchive::new(&store.book_dir(&book.id));
    let provider = Scripted::new(TOC_JSON);
    let pipeline = pipeline_with(&config, provider.clone()).with_archive(archive.clone());

    let tally = pipeline.create_book(&mut book, None, &store).await.unwrap();

    assert_eq!(book.title.as_deref(), Some("Salt and Iron"));
    let ids: Vec<&str> = book.sections.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, ["1", "1.1", "1.2", "2", "2.1", "2.2"]);
    assert_eq!(tally.total(), 6);
    assert_eq!(tally.converged, 6);
    assert_eq!(book.status, BookStatus::Complete);

    let gulf = book.section("1.1").unwrap().content.clone().unwrap();
    assert!(gulf.starts_with("# Gulf Stream\n\nTides move the ocean"));
    assert!(!gulf.contains("Consensus"));

    // Two identical proposals per session: 8 sessions.
    assert_eq!(provider.calls.load(Ordering::SeqCst), 16);
    assert_eq!(archive.list().unwrap().len(), 8);

    let reloaded = store.load(&book.id).unwrap();
    assert_eq!(reloaded.progress(), (6, 6));
    assert_eq!(store.list().unwrap()[0].title, "Salt and Iron");
}

#[tokio::test(start_paused = true)]
async fn test_transcripts_record_sections() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config();
    let store = BookStore::new(dir.path());
    let mut book = Book::new("tides");
    let archive = TranscriptArchive::new(&store.book_dir(&book.id));
    let pipeline = pipeline_with(&config, Scripted::new(TOC_JSON)).with_archive(archive.clone());

    pipeline
        .create_book(&mut book, Some("Given Title".into()), &store)
        .await
        .unwrap();
    assert_eq!(book.display_title(), "Given Title");

    let transcripts: Vec<_> = archive
        .list()
        .unwrap()
        .iter()
        .map(|id| archive.read(id).unwrap())
        .collect();
    // Title was supplied, so only the outline and six sections were negotiated.
    assert_eq!(transcripts.len(), 7);
    assert_eq!(
        transcripts.iter().filter(|t| t.kind == ContentKind::Toc).count(),
        1
    );
    let mut sections: Vec<String> = transcripts
        .iter()
        .filter_map(|t| t.section_id.clone())
        .collect();
    sections.sort();
    assert_eq!(sections, ["1", "1.1", "1.2", "2", "2.1", "2.2"]);
    assert!(transcripts.iter().all(|t| t.status == SessionStatus::Converged));
}

#[tokio::test(start_paused = true)]
async fn test_short_outline_uses_placeholder() {
    let config = test_config();
    let pipeline = pipeline_with(&config, Scripted::new("Chapter 1: Only One"));

    let toc = pipeline.generate_toc("tides", "Salt and Iron").await.unwrap();

    assert!(toc.fallback);
    assert_eq!(toc.value.len(), 2);
    assert!(toc.value.iter().all(|c| c.sections.len() == 3));
    assert_eq!(toc.outcome.status, SessionStatus::Converged);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    init_tracing();
    let config = test_config();
    let provider = Arc::new(Flaky {
        failures_left: AtomicU32::new(2),
    });
    let pipeline = pipeline_with(&config, provider);

    let title = pipeline.generate_title("tides").await.unwrap();

    assert_eq!(title.value, "Salt and Iron");
    assert!(!title.fallback);
    assert_eq!(title.outcome.status, SessionStatus::Converged);
    assert_eq!(title.outcome.history.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_continue_writes_only_selected_sections() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config();
    let store = BookStore::new(dir.path());
    let mut book = Book::new("tides");
    book.set_title("Salt and Iron");
    book.set_toc(saloon_agents::extract::parse_toc(TOC_JSON));
    let pipeline = pipeline_with(&config, Scripted::new(TOC_JSON));

    let tally = pipeline
        .write_sections(&mut book, &["2.1".to_string(), "9.9".to_string()], &store)
        .await
        .unwrap();

    assert_eq!(tally.total(), 1);
    assert_eq!(book.progress(), (1, 6));
    assert!(book.section("2.1").unwrap().is_written());
    assert_eq!(book.status, BookStatus::Writing);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_sessions() {
    let config = test_config();
    let token = tokio_util::sync::CancellationToken::new();
    let pipeline = pipeline_with(&config, Scripted::new(TOC_JSON)).with_shutdown(token.clone());
    token.cancel();

    let err = pipeline.generate_title("tides").await.unwrap_err();

    assert!(matches!(
        err,
        GenerateError::Cancelled {
            kind: ContentKind::Title
        }
    ));
    assert!(pipeline.manager().list().await.is_empty());
}
