//! Book persistence and export.
//!
//! Layout under the output directory:
//!
//! ```text
//! <output_dir>/<book_id>/book.json
//! <output_dir>/<book_id>/book.md
//! <output_dir>/<book_id>/book.txt
//! <output_dir>/<book_id>/transcripts/<session_id>.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::book::{compare_ids, Book, BookSection};

const BOOK_FILE: &str = "book.json";

static MD_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s+(.+?)$").expect("MD_HEADING regex should compile"));
static MD_BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("MD_BOLD regex should compile"));
static MD_ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*(.*?)\*").expect("MD_ITALIC regex should compile"));
static MD_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`(.*?)`").expect("MD_CODE regex should compile"));

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("book not found: {0}")]
    NotFound(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Export targets for `saloon export`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Markdown,
    Text,
    All,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "text" | "txt" => Ok(Self::Text),
            "all" => Ok(Self::All),
            other => Err(format!("unknown export format '{}'", other)),
        }
    }
}

/// Summary row for `saloon list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSummary {
    pub id: String,
    pub title: String,
    pub status: String,
    pub written: usize,
    pub total: usize,
}

/// Books on disk under one output directory.
#[derive(Debug, Clone)]
pub struct BookStore {
    root: PathBuf,
}

impl BookStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn book_dir(&self, book_id: &str) -> PathBuf {
        self.root.join(book_id)
    }

    /// Write `book.json`, creating the book directory. Returns the directory.
    pub fn save(&self, book: &Book) -> Result<PathBuf, StoreError> {
        let dir = self.book_dir(&book.id);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        let path = dir.join(BOOK_FILE);
        let json = serde_json::to_string_pretty(book).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        let tmp = dir.join(format!("{}.tmp", BOOK_FILE));
        fs::write(&tmp, json).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        Ok(dir)
    }

    pub fn load(&self, book_id: &str) -> Result<Book, StoreError> {
        let path = self.book_dir(book_id).join(BOOK_FILE);
        if !path.exists() {
            return Err(StoreError::NotFound(book_id.to_string()));
        }
        let text = fs::read_to_string(&path).map_err(io_err(&path))?;
        serde_json::from_str(&text).map_err(|source| StoreError::Json { path, source })
    }

    /// Every readable book, newest first. Unreadable directories are skipped.
    pub fn list(&self) -> Result<Vec<BookSummary>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut books = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(io_err(&self.root))? {
            let entry = entry.map_err(io_err(&self.root))?;
            if !entry.path().join(BOOK_FILE).is_file() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            if let Ok(book) = self.load(&id) {
                books.push(book);
            }
        }
        books.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(books
            .into_iter()
            .map(|book| {
                let (written, total) = book.progress();
                BookSummary {
                    title: book.display_title().to_string(),
                    status: book.status.to_string(),
                    id: book.id,
                    written,
                    total,
                }
            })
            .collect())
    }

    /// Write the requested exports next to `book.json`. Returns the written paths.
    pub fn export(&self, book: &Book, format: ExportFormat) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.book_dir(&book.id);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        let mut written = Vec::new();
        if matches!(format, ExportFormat::Markdown | ExportFormat::All) {
            let path = dir.join("book.md");
            fs::write(&path, render_markdown(book)).map_err(io_err(&path))?;
            written.push(path);
        }
        if matches!(format, ExportFormat::Text | ExportFormat::All) {
            let path = dir.join("book.txt");
            fs::write(&path, render_text(book)).map_err(io_err(&path))?;
            written.push(path);
        }
        Ok(written)
    }
}

fn toc_lines(book: &Book) -> String {
    let mut out = String::new();
    for (c, chapter) in book.toc.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", c + 1, chapter.title));
        for (s, section) in chapter.sections.iter().enumerate() {
            out.push_str(&format!("   {}.{}. {}\n", c + 1, s + 1, section.title));
            for (u, sub) in section.subsections.iter().enumerate() {
                out.push_str(&format!("      {}.{}.{}. {}\n", c + 1, s + 1, u + 1, sub.title));
            }
        }
    }
    out
}

fn ordered(book: &Book) -> Vec<&BookSection> {
    let mut sections: Vec<&BookSection> = book.sections.iter().filter(|s| s.is_written()).collect();
    sections.sort_by(|a, b| compare_ids(&a.id, &b.id));
    sections
}

/// Strip a leading heading that repeats the section title.
fn body_of(section: &BookSection) -> &str {
    let content = section.content.as_deref().unwrap_or("").trim();
    match content.split_once('\n') {
        Some((first, rest)) if first.trim_start_matches('#').trim() == section.title => rest.trim(),
        None if content.trim_start_matches('#').trim() == section.title => "",
        _ => content,
    }
}

/// Markdown with front matter, table of contents and every written section.
pub fn render_markdown(book: &Book) -> String {
    let title = book.display_title();
    let mut out = format!(
        "---\ntitle: \"{}\"\nauthor: \"{}\"\ndate: \"{}\"\n---\n\n# {}\n\nBy {}\n\n## Table of Contents\n\n{}\n\n",
        title.replace('"', "\\\""),
        book.author,
        book.created_at.format("%Y-%m-%d"),
        title,
        book.author,
        toc_lines(book)
    );
    for section in ordered(book) {
        let level = usize::from(section.level.clamp(1, 5)) + 1;
        out.push_str(&format!("{} {}\n\n", "#".repeat(level), section.title));
        let body = body_of(section);
        if !body.is_empty() {
            out.push_str(body);
            out.push_str("\n\n");
        }
    }
    out
}

/// Plain text: underlined headings, Markdown emphasis and headings removed.
pub fn render_text(book: &Book) -> String {
    let title = book.display_title();
    let mut out = format!(
        "{}\n{}\n\nBy {}\n\nTABLE OF CONTENTS\n{}\n\n{}\n",
        title.to_uppercase(),
        "=".repeat(title.chars().count()),
        book.author,
        "=".repeat(17),
        toc_lines(book)
    );
    for section in ordered(book) {
        let heading = &section.title;
        let width = heading.chars().count();
        match section.level {
            1 => out.push_str(&format!("\n\n{}\n{}\n\n", heading.to_uppercase(), "=".repeat(width))),
            2 => out.push_str(&format!("\n\n{}\n{}\n\n", heading, "-".repeat(width))),
            _ => out.push_str(&format!("\n\n{}\n\n", heading)),
        }
        out.push_str(&plain(body_of(section)));
        out.push_str("\n\n");
    }
    out
}

fn plain(markdown: &str) -> String {
    let text = MD_HEADING.replace_all(markdown, "$1");
    let text = MD_BOLD.replace_all(&text, "$1");
    let text = MD_ITALIC.replace_all(&text, "$1");
    MD_CODE.replace_all(&text, "$1").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{TocChapter, TocSection};

    fn book() -> Book {
        let mut book = Book::new("tides");
        book.set_title("Salt & Iron");
        book.set_toc(vec![TocChapter {
            title: "Currents".into(),
            sections: vec![TocSection {
                title: "Gulf Stream".into(),
                subsections: vec![],
            }],
        }]);
        book.set_section_content("1.1", "# Gulf Stream\n\nA **warm** current.".into(), "converged");
        book
    }

    #[test]
    fn test_markdown_export() {
        let md = render_markdown(&book());
        assert!(md.starts_with("---\ntitle: \"Salt & Iron\""));
        assert!(md.contains("1. Currents\n   1.1. Gulf Stream\n"));
        assert!(md.contains("### Gulf Stream\n\nA **warm** current."));
        assert!(!md.contains("# Gulf Stream\n\n# Gulf Stream"));
    }

    #[test]
    fn test_text_export_strips_markdown() {
        let txt = render_text(&book());
        assert!(txt.starts_with("SALT & IRON\n==========="));
        assert!(txt.contains("Gulf Stream\n-----------\n\nA warm current."));
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!("md".parse::<ExportFormat>().unwrap(), ExportFormat::Markdown);
        assert_eq!("ALL".parse::<ExportFormat>().unwrap(), ExportFormat::All);
        assert!("pdf".parse::<ExportFormat>().is_err());
    }
}
