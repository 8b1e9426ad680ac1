//! Consensus detection over the most recent proposals.
//!
//! Rules, in priority order:
//! 1. fewer than two proposals, or any empty/marker-only proposal: not reached
//! 2. the last two proposals are identical after whitespace normalization: reached, confidence 1.0
//! 3. the latest proposal carries an agreement marker (`Consensus: True` or an `ACCEPT` line): reached
//! 4. the pluggable [`ConsensusStrategy`] score strictly exceeds the threshold: reached
//!
//! Rules 1-3 are synchronous. Rule 4 may call a model, so the coordinator runs
//! it as a separate awaitable step under its retry and timeout discipline.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::AgentError;
use super::state::Proposal;

static CONSENSUS_TRUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)consensus:\s*true").expect("CONSENSUS_TRUE regex should compile")
});

static MARKER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(consensus:\s*(true|false)|accept)\s*\.?\s*$")
        .expect("MARKER_LINE regex should compile")
});

static ACCEPT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*accept\s*\.?\s*$").expect("ACCEPT_LINE regex should compile")
});

/// Which rule produced a [`ConsensusResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMethod {
    InsufficientHistory,
    InvalidContent,
    Identical,
    Marker,
    Strategy(String),
}

impl fmt::Display for ConsensusMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientHistory => write!(f, "insufficient_history"),
            Self::InvalidContent => write!(f, "invalid_content"),
            Self::Identical => write!(f, "identical"),
            Self::Marker => write!(f, "marker"),
            Self::Strategy(name) => write!(f, "strategy:{}", name),
        }
    }
}

/// Verdict for one evaluation. Only drives the next transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub reached: bool,
    /// 0.0..=1.0
    pub confidence: f64,
    pub reason: String,
    pub method: ConsensusMethod,
}

impl ConsensusResult {
    fn not_reached(method: ConsensusMethod, reason: impl Into<String>) -> Self {
        Self {
            reached: false,
            confidence: 0.0,
            reason: reason.into(),
            method,
        }
    }
}

/// Scores how close a window of proposals is to agreement.
#[async_trait]
pub trait ConsensusStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Whether scoring calls a provider. Remote strategies are admitted
    /// through the rate gate and retried like agent calls.
    fn is_remote(&self) -> bool {
        false
    }

    /// Agreement score in 0.0..=1.0. `window` holds at least two proposals,
    /// oldest first.
    async fn score(&self, window: &[Proposal]) -> Result<f64, AgentError>;
}

/// Token-set Jaccard similarity, lowercased and whitespace-split.
///
/// With more than two proposals the score is the lowest similarity between
/// the latest proposal and any other one in the window.
#[derive(Debug, Clone, Copy, Default)]
pub struct JaccardSimilarity;

impl JaccardSimilarity {
    pub fn similarity(a: &str, b: &str) -> f64 {
        let left = tokens(a);
        let right = tokens(b);
        let union = left.union(&right).count();
        if union == 0 {
            return 0.0;
        }
        left.intersection(&right).count() as f64 / union as f64
    }
}

#[async_trait]
impl ConsensusStrategy for JaccardSimilarity {
    fn name(&self) -> &str {
        "jaccard"
    }

    async fn score(&self, window: &[Proposal]) -> Result<f64, AgentError> {
        let Some((latest, others)) = window.split_last() else {
            return Ok(0.0);
        };
        let score = others
            .iter()
            .map(|p| Self::similarity(&substance(&p.content), &substance(&latest.content)))
            .fold(1.0_f64, f64::min);
        Ok(if others.is_empty() { 0.0 } else { score })
    }
}

fn tokens(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Collapse runs of whitespace and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Content with agreement markers removed.
pub fn substance(text: &str) -> String {
    MARKER_LINE.replace_all(text, "").trim().to_string()
}

/// Whether `text` states acceptance of the prior proposal.
pub fn has_agreement_marker(text: &str) -> bool {
    CONSENSUS_TRUE.is_match(text) || ACCEPT_LINE.is_match(text)
}

/// Applies the consensus rules with a pluggable fallback strategy.
#[derive(Clone)]
pub struct ConsensusDetector {
    strategy: Arc<dyn ConsensusStrategy>,
    threshold: f64,
}

impl fmt::Debug for ConsensusDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsensusDetector")
            .field("strategy", &self.strategy.name())
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl Default for ConsensusDetector {
    fn default() -> Self {
        Self::new(Arc::new(JaccardSimilarity), 0.8)
    }
}

impl ConsensusDetector {
    pub fn new(strategy: Arc<dyn ConsensusStrategy>, threshold: f64) -> Self {
        Self {
            strategy,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn strategy(&self) -> &Arc<dyn ConsensusStrategy> {
        &self.strategy
    }

    /// Proposals to evaluate: the last `max(2, role_count)` entries.
    pub fn window<'a>(&self, history: &'a [Proposal], role_count: usize) -> &'a [Proposal] {
        let size = role_count.max(2).min(history.len());
        &history[history.len() - size..]
    }

    /// Synchronous rules. `None` means the strategy must decide.
    pub fn precheck(&self, window: &[Proposal]) -> Option<ConsensusResult> {
        if window.len() < 2 {
            return Some(ConsensusResult::not_reached(
                ConsensusMethod::InsufficientHistory,
                format!("{} proposal(s), need at least 2", window.len()),
            ));
        }

        if let Some(bad) = window.iter().find(|p| substance(&p.content).is_empty()) {
            return Some(ConsensusResult::not_reached(
                ConsensusMethod::InvalidContent,
                format!("proposal from {} has no usable content", bad.agent_id),
            ));
        }

        let latest = &window[window.len() - 1];
        let previous = &window[window.len() - 2];
        if normalize_whitespace(&substance(&latest.content))
            == normalize_whitespace(&substance(&previous.content))
        {
            return Some(ConsensusResult {
                reached: true,
                confidence: 1.0,
                reason: format!("{} repeated the previous proposal", latest.agent_id),
                method: ConsensusMethod::Identical,
            });
        }

        if has_agreement_marker(&latest.content) {
            return Some(ConsensusResult {
                reached: true,
                confidence: 1.0,
                reason: format!("{} accepted the proposal", latest.agent_id),
                method: ConsensusMethod::Marker,
            });
        }

        None
    }

    /// Turn a strategy score into a verdict (strictly above threshold).
    pub fn judge(&self, score: f64) -> ConsensusResult {
        let confidence = if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let reached = confidence > self.threshold;
        ConsensusResult {
            reached,
            confidence,
            reason: format!(
                "{} score {:.2} {} threshold {:.2}",
                self.strategy.name(),
                confidence,
                if reached { "above" } else { "at or below" },
                self.threshold
            ),
            method: ConsensusMethod::Strategy(self.strategy.name().to_string()),
        }
    }

    /// Full evaluation with a single direct strategy call.
    pub async fn evaluate(&self, window: &[Proposal]) -> Result<ConsensusResult, AgentError> {
        if let Some(result) = self.precheck(window) {
            return Ok(result);
        }
        let score = self.strategy.score(window).await?;
        Ok(self.judge(score))
    }
}
