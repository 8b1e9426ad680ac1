//! Content pipelines: one negotiation session per title, outline and section.
//!
//! ```text
//! topic ──► title session ──► toc session ──► section sessions (concurrent)
//!                                                   │
//!                          shared SemaphoreGate ◄───┘  (max_concurrency permits)
//! ```
//!
//! Each session's transcript is archived under the book directory, and the
//! book is saved after every stage so `saloon continue` can pick up where a
//! run stopped.

use std::sync::Arc;

use saloon_coordination::negotiation::{
    AgentClient, ConsensusDetector, ConsensusStrategy, Constraints, ContentKind, Coordinator,
    CoordinatorError, FanOut, JaccardSimilarity, Role, SemaphoreGate, SessionFailure,
    SessionHandle, SessionManager, SessionObserver, SessionOutcome, SessionStatus,
    TracingObserver,
};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::archive::{SessionTranscript, TranscriptArchive};
use crate::book::{compare_ids, Book, SectionBrief};
use crate::config::{roster_for, SaloonConfig, SectionConfig, TitleConfig, TocConfig};
use crate::extract::{artifact, toc_or_fallback, with_heading, TocChapter};
use crate::irc_log::IrcLog;
use crate::store::{BookStore, StoreError};

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("{kind} negotiation failed: {failure}")]
    Failed {
        kind: ContentKind,
        failure: SessionFailure,
    },

    #[error("{kind} negotiation was cancelled")]
    Cancelled { kind: ContentKind },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A negotiated artifact and the session that produced it.
#[derive(Debug, Clone)]
pub struct Generated<T> {
    pub value: T,
    pub outcome: SessionOutcome,
    /// The artifact was replaced by a placeholder because it could not be parsed.
    pub fallback: bool,
}

/// Result of one section session.
#[derive(Debug)]
pub struct SectionResult {
    pub id: String,
    pub result: Result<Generated<String>, GenerateError>,
}

/// Totals of a section run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionTally {
    pub converged: usize,
    pub forced: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl SectionTally {
    pub fn total(&self) -> usize {
        self.converged + self.forced + self.failed + self.cancelled
    }
}

/// Wire the coordinator for a run: roster, threshold, judge, shared gate and observers.
pub fn build_coordinator(
    config: &SaloonConfig,
    client: Arc<dyn AgentClient>,
    judge: Option<Arc<dyn ConsensusStrategy>>,
    log: Option<Arc<IrcLog>>,
) -> Coordinator {
    let strategy: Arc<dyn ConsensusStrategy> = judge.unwrap_or_else(|| Arc::new(JaccardSimilarity));
    let mut observers = FanOut::new(vec![Arc::new(TracingObserver)]);
    if let Some(log) = log {
        observers.push(log as Arc<dyn SessionObserver>);
    }
    Coordinator::new(client)
        .with_config(config.coordinator_config())
        .with_detector(ConsensusDetector::new(
            strategy,
            config.negotiation.consensus_threshold,
        ))
        .with_gate(Arc::new(SemaphoreGate::new(config.max_concurrency)))
        .with_roster(roster_for(&config.agents))
        .with_observer(Arc::new(observers))
}

/// Runs the title, outline and section negotiations for one book.
#[derive(Clone)]
pub struct BookPipeline {
    manager: Arc<SessionManager>,
    roles: Vec<Role>,
    title: TitleConfig,
    toc: TocConfig,
    section: SectionConfig,
    shutdown: CancellationToken,
    archive: Option<TranscriptArchive>,
    log: Option<Arc<IrcLog>>,
}

impl BookPipeline {
    pub fn new(coordinator: Coordinator, roles: Vec<Role>, config: &SaloonConfig) -> Self {
        Self {
            manager: Arc::new(SessionManager::new(coordinator)),
            roles,
            title: config.title.clone(),
            toc: config.toc.clone(),
            section: config.section.clone(),
            shutdown: CancellationToken::new(),
            archive: None,
            log: None,
        }
    }

    /// Cancelling `token` cancels every running session.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn with_archive(mut self, archive: TranscriptArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_log(mut self, log: Arc<IrcLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    fn announce(&self, message: &str) {
        if let Some(log) = &self.log {
            log.system(message);
        }
    }

    /// Run one session to a terminal status, honouring the shutdown token.
    async fn drive(&self, handle: &SessionHandle) -> Result<SessionOutcome, CoordinatorError> {
        let run = self.manager.run_session(handle);
        tokio::pin!(run);
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => handle.cancel(),
            outcome = &mut run => return outcome,
        }
        run.await
    }

    async fn negotiate(
        &self,
        kind: ContentKind,
        topic: &str,
        constraints: Constraints,
        max_rounds: u32,
        section_id: Option<&str>,
    ) -> Result<SessionOutcome, GenerateError> {
        let handle = self
            .manager
            .start_session(kind, topic, constraints, self.roles.clone(), max_rounds)
            .await?;
        let result = self.drive(&handle).await;
        self.manager.remove(handle.id()).await;
        let outcome = result?;

        if let Some(archive) = &self.archive {
            let transcript = SessionTranscript::new(kind, section_id, &outcome);
            if let Err(e) = archive.write(&transcript) {
                warn!(session = %outcome.session_id, error = %e, "Failed to archive transcript");
            }
        }
        info!(session = %outcome.session_id, %kind, summary = %outcome.summary_line(), "Session finished");

        if outcome.is_success() {
            Ok(outcome)
        } else if let Some(failure) = outcome.failure.clone() {
            Err(GenerateError::Failed { kind, failure })
        } else {
            Err(GenerateError::Cancelled { kind })
        }
    }

    /// Negotiate a title for `topic`. Falls back to "Book about <topic>".
    pub async fn generate_title(&self, topic: &str) -> Result<Generated<String>, GenerateError> {
        self.announce(&format!("Generating title for topic: {}", topic));
        let outcome = self
            .negotiate(
                ContentKind::Title,
                topic,
                Constraints::default(),
                self.title.max_rounds,
                None,
            )
            .await?;
        let title = artifact(outcome.final_content.as_deref().unwrap_or_default());
        let fallback = title.is_empty();
        let value = if fallback {
            format!("Book about {}", topic)
        } else {
            title
        };
        Ok(Generated {
            value,
            outcome,
            fallback,
        })
    }

    /// Negotiate a table of contents. Outlines with too few chapters are
    /// replaced by a placeholder of `min_chapters` x 3 sections.
    pub async fn generate_toc(
        &self,
        topic: &str,
        title: &str,
    ) -> Result<Generated<Vec<TocChapter>>, GenerateError> {
        self.announce(&format!("Generating table of contents for: {}", title));
        let constraints = Constraints::default()
            .with_note(format!("The book is titled '{}'.", title))
            .with_note(format!(
                "The book should have between {} and {} chapters, each with 2-5 sections.",
                self.toc.min_chapters, self.toc.max_chapters
            ))
            .with_note("Structure the table of contents as JSON with chapters and sections.");
        let outcome = self
            .negotiate(ContentKind::Toc, topic, constraints, self.toc.max_rounds, None)
            .await?;
        let content = artifact(outcome.final_content.as_deref().unwrap_or_default());
        let (toc, fallback) = toc_or_fallback(&content, self.toc.min_chapters, self.toc.max_chapters);
        if fallback {
            warn!(session = %outcome.session_id, chapters = toc.len(), "Outline unusable, using placeholder structure");
            if let Some(log) = &self.log {
                log.warning("Invalid table of contents, using a placeholder structure");
            }
        }
        Ok(Generated {
            value: toc,
            outcome,
            fallback,
        })
    }

    /// Negotiate the body of one section. The result starts with a heading.
    pub async fn generate_section(
        &self,
        topic: &str,
        book_title: &str,
        brief: &SectionBrief,
    ) -> Result<Generated<String>, GenerateError> {
        let mut constraints = Constraints::words(self.section.min_words, self.section.max_words)
            .with_note(format!(
                "Write section {} '{}' of the book '{}'.",
                brief.id, brief.title, book_title
            ));
        if let Some(parent) = &brief.parent_title {
            constraints = constraints.with_note(format!("This section is part of '{}'.", parent));
        }
        if !brief.previous_titles.is_empty() {
            constraints = constraints.with_note(format!(
                "Previous sections in this chapter: {}.",
                brief.previous_titles.join("; ")
            ));
        }
        constraints = constraints.with_note("Keep it well-structured, informative and engaging.");

        let outcome = self
            .negotiate(
                ContentKind::Section,
                topic,
                constraints,
                self.section.max_rounds,
                Some(&brief.id),
            )
            .await?;
        let body = artifact(outcome.final_content.as_deref().unwrap_or_default());
        Ok(Generated {
            value: with_heading(&body, &brief.title),
            outcome,
            fallback: false,
        })
    }

    /// Negotiate many sections concurrently, one session each. Results come
    /// back in reading order.
    pub async fn generate_sections(
        &self,
        topic: &str,
        book_title: &str,
        briefs: Vec<SectionBrief>,
    ) -> Vec<SectionResult> {
        let mut tasks = JoinSet::new();
        for brief in briefs {
            let pipeline = self.clone();
            let topic = topic.to_string();
            let book_title = book_title.to_string();
            tasks.spawn(async move {
                let result = pipeline.generate_section(&topic, &book_title, &brief).await;
                SectionResult {
                    id: brief.id,
                    result,
                }
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "Section task aborted"),
            }
        }
        results.sort_by(|a, b| compare_ids(&a.id, &b.id));
        results
    }

    /// Title, outline and every section of a new book, saving after each stage.
    pub async fn create_book(
        &self,
        book: &mut Book,
        title_override: Option<String>,
        store: &BookStore,
    ) -> Result<SectionTally, GenerateError> {
        let title = match title_override {
            Some(title) => title,
            None => self.generate_title(&book.topic).await?.value,
        };
        book.set_title(title.clone());
        store.save(book)?;
        self.announce(&format!("Book title: {}", title));

        let topic = book.topic.clone();
        let toc = self.generate_toc(&topic, &title).await?;
        book.set_toc(toc.value);
        store.save(book)?;

        self.write_sections(book, &[], store).await
    }

    /// Generate `ids`, or every unwritten section, and save the book.
    pub async fn write_sections(
        &self,
        book: &mut Book,
        ids: &[String],
        store: &BookStore,
    ) -> Result<SectionTally, GenerateError> {
        let briefs = book.briefs(ids);
        self.announce(&format!("Writing {} section(s)", briefs.len()));
        let topic = book.topic.clone();
        let title = book.display_title().to_string();
        let results = self.generate_sections(&topic, &title, briefs).await;

        let mut tally = SectionTally::default();
        for SectionResult { id, result } in results {
            match result {
                Ok(generated) => {
                    let status = generated.outcome.status;
                    if status == SessionStatus::Converged {
                        tally.converged += 1;
                    } else {
                        tally.forced += 1;
                    }
                    book.set_section_content(&id, generated.value, &status.to_string());
                }
                Err(GenerateError::Cancelled { .. }) => tally.cancelled += 1,
                Err(e) => {
                    warn!(section = %id, error = %e, "Section not written");
                    if let Some(log) = &self.log {
                        log.error(&format!("Section {} not written: {}", id, e));
                    }
                    tally.failed += 1;
                }
            }
        }
        store.save(book)?;
        Ok(tally)
    }
}
