//! Pulling artifacts out of free-form agent replies.
//!
//! Replies mix persona commentary, the artifact and a consensus marker.
//! [`shape_reply`] reduces a reply to the artifact alone (plus a normalized
//! marker line) so the consensus rules compare like with like.

use std::sync::LazyLock;

use regex::Regex;
use saloon_coordination::negotiation::consensus::{has_agreement_marker, substance};
use saloon_coordination::negotiation::{AgentError, ContentKind};
use serde::{Deserialize, Serialize};

static CONTENT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<content>(.*?)</content>").expect("CONTENT_BLOCK regex should compile")
});

static BOOK_TITLE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)book title:[ \t]*(.*?)[ \t]*$").expect("BOOK_TITLE_LINE regex should compile")
});

static QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"\n]+)"|'([^'\n]+)'"#).expect("QUOTED regex should compile")
});

static DOUBLE_QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)""#).expect("DOUBLE_QUOTED regex should compile"));

static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("JSON_FENCE regex should compile")
});

static CHAPTER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:Chapter\s+)?(\d+)[:.]\s+(.*)").expect("CHAPTER_LINE regex should compile")
});

static SECTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+\.\d+)[:.]?\s+(.*)").expect("SECTION_LINE regex should compile")
});

static SUBSECTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+\.\d+\.\d+)[:.]?\s+(.*)").expect("SUBSECTION_LINE regex should compile")
});

static PERSONA_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<([a-z][a-z0-9_-]*)>.*?</([a-z][a-z0-9_-]*)>")
        .expect("PERSONA_BLOCK regex should compile")
});

static MARKER_LINES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^.*?(consensus:\s*(true|false)|handoff:|book title:).*$")
        .expect("MARKER_LINES regex should compile")
});

static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("BLANK_RUNS regex should compile"));

/// Text inside the first `<content>` block.
pub fn content_block(text: &str) -> Option<&str> {
    CONTENT_BLOCK
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
}

// ── Titles ────────────────────────────────────────────────────────────────

/// Title from a reply: `Book Title:` line, then the `<content>` block, then
/// the first quoted phrase, then the first short line that is not a sentence.
pub fn extract_title(text: &str) -> Option<String> {
    if let Some(title) = BOOK_TITLE_LINE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| clean_title(m.as_str()))
        .filter(|t| !t.is_empty())
    {
        return Some(title);
    }
    if let Some(block) = content_block(text) {
        if let Some(line) = block.lines().map(clean_title).find(|l| !l.is_empty()) {
            return Some(line);
        }
    }
    let body = PERSONA_BLOCK.replace_all(text, "");
    if let Some(quoted) = QUOTED
        .captures(&body)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty())
    {
        return Some(quoted);
    }
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            !["I think", "I suggest", "Consensus", "HANDOFF"]
                .iter()
                .any(|prefix| line.starts_with(prefix))
        })
        .find(|line| line.chars().count() < 100 && !line.ends_with(['.', '?', '!']))
        .map(clean_title)
        .filter(|t| !t.is_empty())
}

fn clean_title(raw: &str) -> String {
    let raw = raw.trim();
    let raw = raw
        .strip_prefix("Book Title:")
        .or_else(|| raw.strip_prefix("book title:"))
        .unwrap_or(raw);
    raw.trim()
        .trim_matches(|c: char| c == '"' || c == '*' || c == '#' || c == '\'')
        .trim()
        .to_string()
}

// ── Tables of contents ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocSubsection {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocSection {
    pub title: String,
    #[serde(default)]
    pub subsections: Vec<TocSubsection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocChapter {
    pub title: String,
    #[serde(default)]
    pub sections: Vec<TocSection>,
}

impl TocChapter {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            sections: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TocDocument {
    Chapters(Vec<TocChapter>),
    Wrapped { chapters: Vec<TocChapter> },
}

fn parse_toc_json(text: &str) -> Option<Vec<TocChapter>> {
    match serde_json::from_str::<TocDocument>(text.trim()).ok()? {
        TocDocument::Chapters(chapters) | TocDocument::Wrapped { chapters } => {
            (!chapters.is_empty()).then_some(chapters)
        }
    }
}

/// Table of contents from a reply: `<content>` JSON, bare JSON, fenced
/// JSON blocks, then a numbered text outline. Empty when nothing parses.
pub fn parse_toc(text: &str) -> Vec<TocChapter> {
    if let Some(chapters) = content_block(text)
        .and_then(parse_toc_json)
        .or_else(|| parse_toc_json(text))
    {
        return chapters;
    }
    if let Some(chapters) = JSON_FENCE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .find_map(|m| parse_toc_json(m.as_str()))
    {
        return chapters;
    }
    parse_text_toc(content_block(text).unwrap_or(text))
}

/// `Chapter 1: ...` / `1. ...`, `1.1 ...` and `1.1.1 ...` outlines.
pub fn parse_text_toc(text: &str) -> Vec<TocChapter> {
    let mut toc: Vec<TocChapter> = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let line = line.trim_start_matches(['-', '*', '#', ' ']);
        if let Some(c) = SUBSECTION_LINE.captures(line) {
            if let Some(section) = toc.last_mut().and_then(|ch| ch.sections.last_mut()) {
                section.subsections.push(TocSubsection {
                    title: c[2].trim().to_string(),
                });
            }
        } else if let Some(c) = SECTION_LINE.captures(line) {
            if let Some(chapter) = toc.last_mut() {
                chapter.sections.push(TocSection {
                    title: c[2].trim().to_string(),
                    subsections: Vec::new(),
                });
            }
        } else if let Some(c) = CHAPTER_LINE.captures(line) {
            toc.push(TocChapter::new(c[2].trim()));
        }
    }
    toc
}

/// Placeholder structure used when fewer than `min_chapters` chapters parse.
/// Quoted short phrases in the reply become chapter titles where available.
pub fn fallback_toc(text: &str, min_chapters: u32, max_chapters: u32) -> Vec<TocChapter> {
    let titles: Vec<String> = DOUBLE_QUOTED
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty() && t.split_whitespace().count() < 10)
        .collect();
    let count = (titles.len() as u32).max(min_chapters).min(max_chapters);
    (0..count as usize)
        .map(|i| TocChapter {
            title: titles
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("Chapter {}", i + 1)),
            sections: (1..=3)
                .map(|j| TocSection {
                    title: format!("Section {}", j),
                    subsections: Vec::new(),
                })
                .collect(),
        })
        .collect()
}

/// Parsed TOC, or the placeholder when it has fewer than `min_chapters`.
pub fn toc_or_fallback(text: &str, min_chapters: u32, max_chapters: u32) -> (Vec<TocChapter>, bool) {
    let toc = parse_toc(text);
    if toc.len() as u32 >= min_chapters {
        (toc, false)
    } else {
        (fallback_toc(text, min_chapters, max_chapters), true)
    }
}

// ── Sections ──────────────────────────────────────────────────────────────

/// Section body: the `<content>` block if present, otherwise the reply with
/// persona commentary and marker lines stripped. Blank runs are collapsed.
pub fn clean_section(text: &str) -> String {
    let body = match content_block(text) {
        Some(block) => block.to_string(),
        None => {
            let without_tags = PERSONA_BLOCK.replace_all(text, "");
            MARKER_LINES.replace_all(&without_tags, "").into_owned()
        }
    };
    BLANK_RUNS.replace_all(&body, "\n\n").trim().to_string()
}

/// Prefix a `# title` heading unless the body already starts with one.
pub fn with_heading(body: &str, title: &str) -> String {
    if body.is_empty() || body.starts_with('#') {
        body.to_string()
    } else {
        format!("# {}\n\n{}", title, body)
    }
}

// ── Shaping ───────────────────────────────────────────────────────────────

/// Reduce a raw reply to its artifact for `kind`, keeping agreement as a
/// trailing `Consensus: True` line.
///
/// Replies with no recognizable artifact are `Malformed`; blank replies are `Empty`.
pub fn shape_reply(kind: ContentKind, raw: &str) -> Result<String, AgentError> {
    if raw.trim().is_empty() {
        return Err(AgentError::Empty);
    }
    let artifact = match kind {
        ContentKind::Title => extract_title(raw)
            .ok_or_else(|| AgentError::Malformed("no book title found in the reply".into()))?,
        ContentKind::Toc => {
            let toc = parse_toc(raw);
            if toc.is_empty() {
                return Err(AgentError::Malformed(
                    "no table of contents found in the reply".into(),
                ));
            }
            serde_json::to_string_pretty(&toc)
                .map_err(|e| AgentError::Malformed(format!("unrenderable table of contents: {}", e)))?
        }
        ContentKind::Section => clean_section(raw),
    };
    if artifact.trim().is_empty() {
        return Err(AgentError::Empty);
    }
    if has_agreement_marker(raw) {
        Ok(format!("{}\n\nConsensus: True", artifact))
    } else {
        Ok(artifact)
    }
}

/// Artifact without the trailing marker line.
pub fn artifact(shaped: &str) -> String {
    substance(shaped)
}
