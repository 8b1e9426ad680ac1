//! Book model: title, table of contents and hierarchical sections.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use saloon_coordination::negotiation::state::word_count;
use serde::{Deserialize, Serialize};

use crate::extract::TocChapter;

/// Lifecycle of a book on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    Initialized,
    Outlined,
    Writing,
    Complete,
}

impl std::fmt::Display for BookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::Outlined => write!(f, "outlined"),
            Self::Writing => write!(f, "writing"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// One node of the book: chapter (level 1), section (2) or subsection (3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSection {
    /// Dotted position, e.g. `"1"`, `"1.2"`, `"1.2.3"`.
    pub id: String,
    pub title: String,
    pub level: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Status of the session that produced the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_status: Option<String>,
}

impl BookSection {
    fn new(id: String, title: &str, level: u8) -> Self {
        Self {
            id,
            title: title.to_string(),
            level,
            content: None,
            session_status: None,
        }
    }

    pub fn is_written(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.trim().is_empty())
    }

    pub fn word_count(&self) -> usize {
        self.content.as_deref().map(word_count).unwrap_or(0)
    }

    /// Id of the enclosing node, if any.
    pub fn parent_id(&self) -> Option<&str> {
        self.id.rsplit_once('.').map(|(parent, _)| parent)
    }

    fn path(&self) -> Vec<u32> {
        section_path(&self.id)
    }
}

fn section_path(id: &str) -> Vec<u32> {
    id.split('.').filter_map(|part| part.parse().ok()).collect()
}

/// Ordering of dotted ids by numeric path: `1.2` < `1.10` < `2`.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    section_path(a).cmp(&section_path(b))
}

/// What a section session needs to know about its place in the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionBrief {
    pub id: String,
    pub title: String,
    pub parent_title: Option<String>,
    /// Earlier sibling sections of the same chapter.
    pub previous_titles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub title: Option<String>,
    pub author: String,
    pub status: BookStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub toc: Vec<TocChapter>,
    /// Flattened in reading order.
    #[serde(default)]
    pub sections: Vec<BookSection>,
}

impl Book {
    pub fn new(topic: impl Into<String>) -> Self {
        let topic = topic.into();
        let now = Utc::now();
        Self {
            id: book_id(&topic, now),
            topic,
            title: None,
            author: "AI Writing Team".to_string(),
            status: BookStatus::Initialized,
            created_at: now,
            updated_at: now,
            toc: Vec::new(),
            sections: Vec::new(),
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.topic)
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
        self.touch();
    }

    /// Replace the outline. Content of sections whose id and title survive is kept.
    pub fn set_toc(&mut self, toc: Vec<TocChapter>) {
        let previous = std::mem::take(&mut self.sections);
        let mut sections = Vec::new();
        for (c, chapter) in toc.iter().enumerate() {
            let chapter_id = format!("{}", c + 1);
            sections.push(BookSection::new(chapter_id.clone(), &chapter.title, 1));
            for (s, section) in chapter.sections.iter().enumerate() {
                let section_id = format!("{}.{}", chapter_id, s + 1);
                sections.push(BookSection::new(section_id.clone(), &section.title, 2));
                for (u, sub) in section.subsections.iter().enumerate() {
                    sections.push(BookSection::new(
                        format!("{}.{}", section_id, u + 1),
                        &sub.title,
                        3,
                    ));
                }
            }
        }
        for section in &mut sections {
            if let Some(old) = previous
                .iter()
                .find(|old| old.id == section.id && old.title == section.title)
            {
                section.content = old.content.clone();
                section.session_status = old.session_status.clone();
            }
        }
        self.toc = toc;
        self.sections = sections;
        self.status = BookStatus::Outlined;
        self.touch();
    }

    pub fn section(&self, id: &str) -> Option<&BookSection> {
        self.sections.iter().find(|s| s.id == id)
    }

    /// Store generated content. Returns false for unknown ids.
    pub fn set_section_content(&mut self, id: &str, content: String, session_status: &str) -> bool {
        let Some(section) = self.sections.iter_mut().find(|s| s.id == id) else {
            return false;
        };
        section.content = Some(content);
        section.session_status = Some(session_status.to_string());
        self.status = if self.sections.iter().all(BookSection::is_written) {
            BookStatus::Complete
        } else {
            BookStatus::Writing
        };
        self.touch();
        true
    }

    /// Briefs for `ids`, or for every unwritten section when `ids` is empty.
    /// Unknown ids are skipped.
    pub fn briefs(&self, ids: &[String]) -> Vec<SectionBrief> {
        self.sections
            .iter()
            .filter(|s| {
                if ids.is_empty() {
                    !s.is_written()
                } else {
                    ids.iter().any(|id| id.trim() == s.id)
                }
            })
            .map(|s| self.brief(s))
            .collect()
    }

    fn brief(&self, section: &BookSection) -> SectionBrief {
        let parent_title = section
            .parent_id()
            .and_then(|pid| self.section(pid))
            .map(|p| p.title.clone());
        let path = section.path();
        let previous_titles = if section.level == 2 {
            self.sections
                .iter()
                .filter(|s| s.level == 2)
                .filter(|s| {
                    let other = s.path();
                    match (other.first(), other.get(1), path.first(), path.get(1)) {
                        (Some(chapter), Some(n), Some(own_chapter), Some(own_n)) => {
                            chapter == own_chapter && n < own_n
                        }
                        _ => false,
                    }
                })
                .map(|s| s.title.clone())
                .collect()
        } else {
            Vec::new()
        };
        SectionBrief {
            id: section.id.clone(),
            title: section.title.clone(),
            parent_title,
            previous_titles,
        }
    }

    pub fn progress(&self) -> (usize, usize) {
        let written = self.sections.iter().filter(|s| s.is_written()).count();
        (written, self.sections.len())
    }

    pub fn total_words(&self) -> usize {
        self.sections.iter().map(BookSection::word_count).sum()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// `<topic-slug>-<unix seconds>`, slug capped at 30 characters.
pub fn book_id(topic: &str, at: DateTime<Utc>) -> String {
    let slug: String = topic
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let slug: String = slug
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .take(30)
        .collect();
    let slug = slug.trim_end_matches('-');
    let slug = if slug.is_empty() { "book" } else { slug };
    format!("{}-{}", slug, at.timestamp())
}
