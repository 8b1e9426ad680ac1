//! Transcript archive: one versioned JSON document per finished session.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use saloon_coordination::negotiation::{
    ConsensusResult, ContentKind, Proposal, Role, SessionFailure, SessionOutcome, SessionStatus,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A finished session, as written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTranscript {
    /// Schema version for forward compatibility.
    pub version: u32,
    pub session_id: String,
    pub kind: ContentKind,
    /// Book section the session wrote, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    pub status: SessionStatus,
    pub final_content: Option<String>,
    pub failure: Option<SessionFailure>,
    pub consensus: Option<ConsensusResult>,
    pub forced_role: Option<Role>,
    pub rounds_completed: u32,
    pub history: Vec<Proposal>,
    pub archived_at: DateTime<Utc>,
}

impl SessionTranscript {
    /// Current schema version.
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(kind: ContentKind, section_id: Option<&str>, outcome: &SessionOutcome) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            session_id: outcome.session_id.clone(),
            kind,
            section_id: section_id.map(str::to_string),
            status: outcome.status,
            final_content: outcome.final_content.clone(),
            failure: outcome.failure.clone(),
            consensus: outcome.consensus.clone(),
            forced_role: outcome.forced_role,
            rounds_completed: outcome.rounds_completed,
            history: outcome.history.clone(),
            archived_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String, ArchiveError> {
        serde_json::to_string_pretty(self).map_err(|e| ArchiveError::SerializeFailed {
            reason: e.to_string(),
        })
    }

    /// Deserialize, rejecting documents written by a newer schema.
    pub fn from_json(json: &str) -> Result<Self, ArchiveError> {
        let transcript: Self =
            serde_json::from_str(json).map_err(|e| ArchiveError::DeserializeFailed {
                reason: e.to_string(),
            })?;

        if transcript.version > Self::CURRENT_VERSION {
            return Err(ArchiveError::VersionMismatch {
                expected: Self::CURRENT_VERSION,
                found: transcript.version,
            });
        }

        Ok(transcript)
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("serialize failed: {reason}")]
    SerializeFailed { reason: String },

    #[error("deserialize failed: {reason}")]
    DeserializeFailed { reason: String },

    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// `transcripts/` directory of one book.
#[derive(Debug, Clone)]
pub struct TranscriptArchive {
    dir: PathBuf,
}

impl TranscriptArchive {
    pub fn new(book_dir: &Path) -> Self {
        Self {
            dir: book_dir.join("transcripts"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, transcript: &SessionTranscript) -> Result<PathBuf, ArchiveError> {
        fs::create_dir_all(&self.dir).map_err(|source| ArchiveError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.dir.join(format!("{}.json", transcript.session_id));
        fs::write(&path, transcript.to_json()?).map_err(|source| ArchiveError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    pub fn read(&self, session_id: &str) -> Result<SessionTranscript, ArchiveError> {
        let path = self.dir.join(format!("{}.json", session_id));
        let text = fs::read_to_string(&path).map_err(|source| ArchiveError::Io {
            path: path.clone(),
            source,
        })?;
        SessionTranscript::from_json(&text)
    }

    /// Session ids with an archived transcript, sorted.
    pub fn list(&self) -> Result<Vec<String>, ArchiveError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|source| ArchiveError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut ids: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".json").map(str::to_string)
            })
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome() -> SessionOutcome {
        SessionOutcome {
            session_id: "abc".into(),
            status: SessionStatus::Forced,
            final_content: Some("Salt".into()),
            history: vec![Proposal::new("Zero", Role::Creative, "Salt", 0)],
            rounds_completed: 1,
            failure: None,
            consensus: None,
            forced_role: Some(Role::Editor),
        }
    }

    #[test]
    fn test_roundtrip_preserves_history() {
        let transcript = SessionTranscript::new(ContentKind::Title, None, &outcome());
        let restored = SessionTranscript::from_json(&transcript.to_json().unwrap()).unwrap();
        assert_eq!(restored.status, SessionStatus::Forced);
        assert_eq!(restored.history, transcript.history);
        assert_eq!(restored.forced_role, Some(Role::Editor));
    }

    #[test]
    fn test_rejects_newer_version() {
        let mut transcript = SessionTranscript::new(ContentKind::Title, None, &outcome());
        transcript.version = SessionTranscript::CURRENT_VERSION + 1;
        let err = SessionTranscript::from_json(&transcript.to_json().unwrap()).unwrap_err();
        assert!(matches!(err, ArchiveError::VersionMismatch { found: 2, .. }));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            SessionTranscript::from_json("{not json"),
            Err(ArchiveError::DeserializeFailed { .. })
        ));
    }
}
